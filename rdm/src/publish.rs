//! Publication of a record version.
//!
//! Resolves the parent of the version chain, registers the record PIDs and produces the rows
//! of the record, its bucket and its files in foreign key order. Used by the publish actions
//! and by the records table generator, so both paths leave the same state behind.

use etl::error::EtlResult;
use etl::ids::{PidStatus, uuid};
use etl::operation::Operation;
use etl::state::{CommunityState, FileRecordState, ParentState, PidState, RecordState, StateStore};
use etl::types::{Row, dict_get, row_from};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::models::{
    FILES_BUCKET, FILES_FILES, FILES_OBJECT, RDM_PARENTS_COMMUNITY, RDM_PARENTS_METADATA,
    RDM_RECORDS_FILES, RDM_RECORDS_METADATA,
};
use crate::pids::{self, DOI, OAI, RECID};
use crate::rows;

/// Keys of a source record document that are moved out of the stored document.
const LIFTED_KEYS: [&str; 3] = ["conceptrecid", "doi", "communities"];

/// The source rows of one record version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordVersion {
    pub record: Row,
    pub bucket: Option<Row>,
    pub file_instances: Vec<Row>,
    pub object_versions: Vec<Row>,
    pub files: Vec<Row>,
}

/// Outcome of a publication.
#[derive(Debug, Clone)]
pub struct Publication {
    pub operations: Vec<Operation>,
    pub parent_id: String,
    /// Whether the parent was created by this publication.
    pub new_parent: bool,
    pub record_id: String,
    pub index: i64,
}

/// A parent resolved against the state.
#[derive(Debug, Clone)]
pub struct Parent {
    pub recid: String,
    pub id: String,
    pub created: bool,
    pub pid_pk: Option<i64>,
}

/// Maps community slugs to community ids, dropping unknown slugs.
pub fn resolve_communities(state: &StateStore, slugs: Option<&Value>) -> EtlResult<Vec<String>> {
    let Some(Value::Array(slugs)) = slugs else {
        return Ok(Vec::new());
    };

    let mut ids = Vec::new();
    for slug in slugs.iter().filter_map(Value::as_str) {
        match state.get_as::<CommunityState>(slug)? {
            Some(community) => ids.push(community.id),
            None => warn!(slug, "unknown community, dropping it from the parent"),
        }
    }
    Ok(ids)
}

/// Returns the parent keyed by `recid`, creating it and its recid PID when it is new.
///
/// A new parent is not added to the state: the caller knows whether it points at a version
/// or at a draft.
pub fn resolve_parent(
    state: &mut StateStore,
    recid: &str,
    created: &str,
    status: PidStatus,
    communities: &[String],
    operations: &mut Vec<Operation>,
) -> EtlResult<Parent> {
    if let Some(parent) = state.get_as::<ParentState>(recid)? {
        return Ok(Parent {
            recid: parent.recid,
            id: parent.id,
            created: false,
            pid_pk: parent.pid_pk,
        });
    }

    let id = uuid();
    let (pid, pid_insert) = pids::mint_tracked(state, RECID, recid, status, Some(&id), created)?;
    let mut json = json!({"id": recid, "pid": pid.to_value()});
    if let Some(default) = communities.first() {
        json["communities"] = json!({"ids": communities, "default": default});
    }

    operations.push(Operation::insert(
        &RDM_PARENTS_METADATA,
        row_from(json!({
            "id": id,
            "json": json,
            "created": created,
            "updated": created,
            "version_id": 1,
        })),
    ));
    operations.push(pid_insert);

    Ok(Parent {
        recid: recid.to_string(),
        id,
        created: true,
        pid_pk: Some(pid.pk),
    })
}

/// Registers the PID `value` for `object_uuid`: a tracked PID is moved to registered, an
/// unknown one is minted. Returns the PID descriptor.
pub fn register(
    state: &mut StateStore,
    pid_type: &str,
    value: &str,
    object_uuid: &str,
    timestamp: &str,
    operations: &mut Vec<Operation>,
) -> EtlResult<Value> {
    match state.get_as::<PidState>(value)? {
        Some(tracked) if tracked.status == PidStatus::Registered.as_str() => {}
        Some(tracked) => operations.push(pids::set_status(
            state,
            &tracked,
            PidStatus::Registered,
            Some(object_uuid),
            timestamp,
        )?),
        None => {
            let (_, insert) = pids::mint_tracked(
                state,
                pid_type,
                value,
                PidStatus::Registered,
                Some(object_uuid),
                timestamp,
            )?;
            operations.push(insert);
        }
    }

    Ok(pids::descriptor(state, value)?.unwrap_or(Value::Null))
}

/// Returns the DOI of a source record document.
pub fn doi(json: &Row, recid: &str) -> String {
    dict_get(json, "doi")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| pids::default_doi(recid))
}

/// Builds the stored record document from a source document.
pub fn record_json(source: &Row, pid: &Value, doi: &str, recid: &str) -> Value {
    let mut json = source.clone();
    for key in LIFTED_KEYS {
        json.remove(key);
    }
    json.insert("id".to_string(), json!(recid));
    json.insert("pid".to_string(), pid.clone());
    json.insert("pids".to_string(), pids::external_pids(doi, recid));
    Value::Object(json)
}

/// Builds the stored draft document from a source document. A DOI is only listed when the
/// source carries one.
pub fn draft_json(source: &Row, pid: &Value, recid: &str) -> Value {
    let mut json = source.clone();
    let doi = json.get("doi").and_then(Value::as_str).map(str::to_string);
    for key in LIFTED_KEYS {
        json.remove(key);
    }
    json.insert("id".to_string(), json!(recid));
    json.insert("pid".to_string(), pid.clone());
    let external = match doi {
        Some(doi) => json!({"doi": {"identifier": doi, "provider": "datacite", "client": "datacite"}}),
        None => json!({}),
    };
    json.insert("pids".to_string(), external);
    Value::Object(json)
}

/// Returns the recid PID descriptor of `recid`, preferring the one of the published record.
pub fn recid_descriptor(state: &StateStore, recid: &str) -> EtlResult<Value> {
    if let Some(record) = state.get_as::<RecordState>(recid)? {
        if let Some(pid) = record.pids.get("recid").filter(|pid| !pid.is_null()) {
            return Ok(pid.clone());
        }
    }
    Ok(pids::descriptor(state, recid)?.unwrap_or(Value::Null))
}

/// Returns whether the record of `record` is already published under its recid.
pub fn is_published(state: &StateStore, record: &Row) -> EtlResult<bool> {
    let (Ok(id), Ok(recid)) = (rows::required_str(record, "id"), rows::key(record, "json.id")) else {
        return Ok(false);
    };

    Ok(state
        .get_as::<RecordState>(&recid)?
        .is_some_and(|tracked| tracked.id == id))
}

/// Publishes `version` and records it in the state.
pub fn publish(state: &mut StateStore, version: RecordVersion) -> EtlResult<Publication> {
    let RecordVersion {
        record,
        bucket,
        file_instances,
        object_versions,
        files,
    } = version;

    let id = rows::required_str(&record, "id")?.to_string();
    let recid = rows::key(&record, "json.id")?;
    let conceptrecid = rows::key(&record, "json.conceptrecid")?;
    let (created, updated) = rows::timestamps(&record)?;
    let source_json = dict_get(&record, "json")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let communities = resolve_communities(state, source_json.get("communities"))?;

    let mut operations = Vec::new();
    let bucket_id = match &bucket {
        Some(bucket) => Some(rows::required_str(bucket, "id")?.to_string()),
        None => dict_get(&record, "bucket_id")
            .and_then(Value::as_str)
            .map(str::to_string),
    };
    if let Some(bucket) = &bucket {
        operations.push(Operation::insert(&FILES_BUCKET, rows::project(&FILES_BUCKET, bucket)));
    }
    for instance in &file_instances {
        operations.push(Operation::insert(&FILES_FILES, rows::project(&FILES_FILES, instance)));
    }
    for object_version in &object_versions {
        operations.push(Operation::insert(
            &FILES_OBJECT,
            rows::project(&FILES_OBJECT, object_version),
        ));
    }

    let parent = resolve_parent(
        state,
        &conceptrecid,
        &created,
        PidStatus::Registered,
        &communities,
        &mut operations,
    )?;
    if !parent.created {
        if let Some(tracked) = state.get_as::<PidState>(&conceptrecid)? {
            if tracked.status != PidStatus::Registered.as_str() {
                operations.push(pids::set_status(
                    state,
                    &tracked,
                    PidStatus::Registered,
                    Some(&parent.id),
                    &created,
                )?);
            }
        }
    }
    let pid = register(state, RECID, &recid, &id, &created, &mut operations)?;
    let doi = doi(&source_json, &recid);
    register(state, DOI, &doi, &id, &created, &mut operations)?;
    let (_, oai) = pids::mint(
        state,
        OAI,
        &pids::oai_identifier(&recid),
        PidStatus::Registered,
        Some(&id),
        &created,
    )?;
    operations.push(oai);

    let parent_state = state.get_as::<ParentState>(&conceptrecid)?;
    let index = match dict_get(&record, "index").and_then(Value::as_i64) {
        Some(index) => index,
        None => parent_state
            .as_ref()
            .and_then(|parent| parent.latest_index)
            .map_or(1, |latest| latest + 1),
    };
    let version_id = dict_get(&record, "version_id")
        .and_then(Value::as_i64)
        .unwrap_or(1);
    let deletion_status = dict_get(&record, "deletion_status")
        .and_then(Value::as_str)
        .unwrap_or("P");

    operations.push(Operation::insert(
        &RDM_RECORDS_METADATA,
        row_from(json!({
            "id": id,
            "json": record_json(&source_json, &pid, &doi, &recid),
            "created": created,
            "updated": updated,
            "version_id": version_id,
            "index": index,
            "bucket_id": bucket_id,
            "parent_id": parent.id,
            "deletion_status": deletion_status,
        })),
    ));

    for file in &files {
        let (file_record, tracked) = record_file(file, &id, &object_versions, &created)?;
        operations.push(Operation::insert(&RDM_RECORDS_FILES, file_record));
        state.add_as(&tracked)?;
    }

    if parent.created {
        for community_id in &communities {
            operations.push(Operation::insert(
                &RDM_PARENTS_COMMUNITY,
                row_from(json!({"community_id": community_id, "record_id": parent.id})),
            ));
        }
    }

    state.add_as(&RecordState {
        recid: recid.clone(),
        id: id.clone(),
        parent_id: parent.id.clone(),
        index,
        fork_version_id: None,
        pids: json!({"recid": pid, "doi": doi}),
        bucket_id: bucket_id.clone(),
        version_id: Some(version_id),
    })?;

    match parent_state {
        Some(existing) => {
            let is_latest = existing.latest_index.is_none_or(|latest| index >= latest);
            let mut merged = existing.clone();
            if is_latest {
                merged.latest_id = Some(id.clone());
                merged.latest_index = Some(index);
            }
            state.put_as(&merged)?;
        }
        None => state.add_as(&ParentState {
            recid: conceptrecid,
            id: parent.id.clone(),
            latest_id: Some(id.clone()),
            latest_index: Some(index),
            next_draft_id: None,
            communities,
            version_id: Some(1),
            pid_pk: parent.pid_pk,
        })?,
    }

    Ok(Publication {
        operations,
        parent_id: parent.id,
        new_parent: parent.created,
        record_id: id,
        index,
    })
}

/// Builds the file record of `file` for `record_id`, linking the object version of the same
/// key when the source row does not name one.
pub fn record_file(
    file: &Row,
    record_id: &str,
    object_versions: &[Row],
    default_created: &str,
) -> EtlResult<(Row, FileRecordState)> {
    let key = rows::required_str(file, "key")?;
    let id = dict_get(file, "id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(uuid);
    let created = dict_get(file, "created")
        .and_then(Value::as_str)
        .unwrap_or(default_created);
    let updated = dict_get(file, "updated")
        .and_then(Value::as_str)
        .unwrap_or(created);

    let object_version = object_versions
        .iter()
        .find(|object_version| dict_get(object_version, "key").and_then(Value::as_str) == Some(key));
    let text = |row: Option<&Row>, column: &str| {
        row.and_then(|row| dict_get(row, column))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let object_version_id =
        text(Some(file), "object_version_id").or_else(|| text(object_version, "version_id"));
    let file_id = text(Some(file), "file_id").or_else(|| text(object_version, "file_id"));

    let mut row = rows::file_record(&id, key, record_id, object_version_id.as_deref(), created, updated);
    if let Some(json) = dict_get(file, "json").filter(|json| json.is_object()) {
        row.insert("json".to_string(), json.clone());
    }

    let tracked = FileRecordState {
        id,
        json: row["json"].clone(),
        created: created.to_string(),
        updated: updated.to_string(),
        version_id: 1,
        key: key.to_string(),
        record_id: record_id.to_string(),
        object_version_id,
        file_id,
    };
    Ok((row, tracked))
}

use std::sync::LazyLock;

use async_trait::async_trait;
use etl::error::{ErrorKind, EtlResult};
use etl::ids::uuid;
use etl::operation::{Operation, OperationType};
use etl::state::{BucketState, ParentState, PidState, RecordState, StateStore};
use etl::tx::{ActionContext, LoadAction, TransformAction, TxRowGenerator};
use etl::types::{CdcOp, Row, Tx, TxOperation, dict_get, row_from};
use etl::{bail, etl_error, typed_payload};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::actions::common::{first_row, rows_of};
use crate::actions::drafts::parent_by_id;
use crate::models::{
    FILES_BUCKET, RDM_DRAFTS_FILES, RDM_DRAFTS_METADATA, RDM_PARENTS_METADATA,
    RDM_RECORDS_FILES, RDM_RECORDS_METADATA, RDM_VERSIONS_STATE,
};
use crate::pids::{self, DOI};
use crate::publish::{self, Publication, RecordVersion};
use crate::rows;
use crate::source::{
    self, BUCKETS, DRAFTS, FILE_INSTANCES, FILES, GITHUB_RELEASES, OBJECT_VERSIONS, RECORDS,
};
use crate::sync;

/// Record file changes carried by a transaction, replayed onto `rdm_records_files`.
static RECORD_FILES: LazyLock<TxRowGenerator> =
    LazyLock::new(|| TxRowGenerator::new().register(FILES, &RDM_RECORDS_FILES));

/// Returns the rows of the record version created by `tx`.
pub fn created_version(tx: &Tx) -> EtlResult<RecordVersion> {
    Ok(RecordVersion {
        record: record_image(tx, CdcOp::Create)?,
        bucket: first_row(tx, CdcOp::Create, BUCKETS),
        file_instances: rows_of(tx, CdcOp::Create, FILE_INSTANCES),
        object_versions: rows_of(tx, CdcOp::Create, OBJECT_VERSIONS),
        files: rows_of(tx, CdcOp::Create, FILES),
    })
}

/// Returns the record image of the first `op` change of `tx`.
fn record_image(tx: &Tx, op: CdcOp) -> EtlResult<Row> {
    first_row(tx, op, RECORDS)
        .ok_or_else(|| etl_error!(ErrorKind::MissingField, "Transaction has no record", tx.id))
}

/// Returns the draft image of the first update of `tx`.
fn updated_draft(tx: &Tx) -> EtlResult<Row> {
    first_row(tx, CdcOp::Update, DRAFTS)
        .ok_or_else(|| etl_error!(ErrorKind::MissingField, "Transaction has no draft", tx.id))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordPublishNewData {
    tx_id: i64,
    version: RecordVersion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DraftPublishNewData {
    tx_id: i64,
    version: RecordVersion,
    draft: Row,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DraftPublishEditData {
    tx_id: i64,
    record: Row,
    draft: Row,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordUpdateData {
    tx_id: i64,
    record: Row,
    buckets: Vec<Row>,
}

/// Returns the version state write following `publication`: an insert for a new parent, an
/// update of the latest version otherwise.
pub fn versions_state(state: &mut StateStore, publication: &Publication) -> EtlResult<Operation> {
    let Some(parent) = parent_by_id(state, &publication.parent_id)? else {
        bail!(
            ErrorKind::MissingKey,
            "Published parent is not in the state",
            publication.parent_id
        );
    };

    if publication.new_parent {
        return Ok(Operation::insert(
            &RDM_VERSIONS_STATE,
            rows::versions_state(
                &parent.id,
                parent.latest_id.as_deref(),
                parent.latest_index,
                parent.next_draft_id.as_deref(),
            ),
        ));
    }

    Ok(Operation::update(
        &RDM_VERSIONS_STATE,
        row_from(json!({
            "parent_id": parent.id,
            "latest_id": parent.latest_id,
            "latest_index": parent.latest_index,
        })),
    ))
}

/// Returns the bucket of a draft, from its row or from the bucket state.
fn draft_bucket(state: &mut StateStore, draft: &Row, draft_id: &str) -> EtlResult<Option<String>> {
    if let Some(bucket_id) = draft.get("bucket_id").and_then(Value::as_str) {
        return Ok(Some(bucket_id.to_string()));
    }
    Ok(state
        .search_as::<BucketState>("draft_id", &json!(draft_id))?
        .into_iter()
        .next()
        .map(|bucket| bucket.id))
}

fn soft_delete_draft(draft_id: &str, updated: &str) -> Operation {
    Operation::update(
        &RDM_DRAFTS_METADATA,
        row_from(json!({"id": draft_id, "json": null, "updated": updated})),
    )
}

/// A record published without a draft, such as a migrated or imported record.
pub struct RecordPublishNew;

impl TransformAction for RecordPublishNew {
    fn name(&self) -> &'static str {
        "record-publish-new"
    }

    fn matches(&self, tx: &Tx) -> bool {
        tx.has(CdcOp::Create, RECORDS) && !tx.touches(DRAFTS) && !tx.touches(GITHUB_RELEASES)
    }

    fn transform(&self, tx: &Tx) -> EtlResult<Box<dyn LoadAction>> {
        let tx = source::normalize(tx)?;

        Ok(Box::new(RecordPublishNewLoad {
            data: RecordPublishNewData {
                tx_id: tx.id,
                version: created_version(&tx)?,
            },
        }))
    }
}

#[derive(Debug)]
struct RecordPublishNewLoad {
    data: RecordPublishNewData,
}

#[async_trait]
impl LoadAction for RecordPublishNewLoad {
    fn name(&self) -> &'static str {
        "record-publish-new"
    }

    typed_payload!(data);

    fn already_applied(&self, state: &mut StateStore) -> EtlResult<bool> {
        publish::is_published(state, &self.data.version.record)
    }

    /// Publishes the version, then writes the versions state of its parent so that imported
    /// records are listed like published drafts.
    async fn generate_rows(&mut self, ctx: &mut ActionContext<'_>) -> EtlResult<Vec<Operation>> {
        let publication = publish::publish(ctx.state, self.data.version.clone())?;
        let versions = versions_state(ctx.state, &publication)?;
        info!(record_id = %publication.record_id, index = publication.index, "published record");

        let mut operations = publication.operations;
        operations.push(versions);
        Ok(operations)
    }
}

/// First publication of a draft: the draft bucket is locked and its heads are copied to a new
/// record bucket.
pub struct DraftPublishNew;

impl TransformAction for DraftPublishNew {
    fn name(&self) -> &'static str {
        "draft-publish-new"
    }

    fn matches(&self, tx: &Tx) -> bool {
        tx.has(CdcOp::Create, RECORDS) && tx.has(CdcOp::Update, DRAFTS)
    }

    fn transform(&self, tx: &Tx) -> EtlResult<Box<dyn LoadAction>> {
        let tx = source::normalize(tx)?;

        Ok(Box::new(DraftPublishNewLoad {
            data: DraftPublishNewData {
                tx_id: tx.id,
                version: created_version(&tx)?,
                draft: updated_draft(&tx)?,
            },
        }))
    }
}

#[derive(Debug)]
struct DraftPublishNewLoad {
    data: DraftPublishNewData,
}

#[async_trait]
impl LoadAction for DraftPublishNewLoad {
    fn name(&self) -> &'static str {
        "draft-publish-new"
    }

    typed_payload!(data);

    fn already_applied(&self, state: &mut StateStore) -> EtlResult<bool> {
        publish::is_published(state, &self.data.version.record)
    }

    async fn generate_rows(&mut self, ctx: &mut ActionContext<'_>) -> EtlResult<Vec<Operation>> {
        let mut version = self.data.version.clone();
        let draft = &self.data.draft;
        let draft_id = rows::required_str(draft, "id")?.to_string();
        let (created, updated) = rows::timestamps(&version.record)?;
        let mut operations = Vec::new();

        let draft_bucket = draft_bucket(ctx.state, draft, &draft_id)?;
        if let Some(draft_bucket) = &draft_bucket {
            operations.push(Operation::update(
                &FILES_BUCKET,
                row_from(json!({"id": draft_bucket, "locked": true, "updated": updated})),
            ));
        }

        let record_bucket = match version.bucket.take() {
            Some(bucket) => bucket,
            None => {
                let id = dict_get(&version.record, "bucket_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(uuid);
                rows::bucket(&id, &created, &created, true)
            }
        };
        let record_bucket_id = rows::required_str(&record_bucket, "id")?.to_string();
        version
            .record
            .insert("bucket_id".to_string(), json!(record_bucket_id));
        version.bucket = Some(record_bucket);

        if let Some(draft_bucket) = &draft_bucket {
            let heads = sync::heads(ctx.session, draft_bucket).await?;
            for (key, head) in heads {
                let Some(file_id) = head.get("file_id").and_then(Value::as_str) else {
                    continue;
                };
                let mimetype = head.get("_mimetype").and_then(Value::as_str);
                version.object_versions.push(rows::object_version(
                    &uuid(),
                    &record_bucket_id,
                    &key,
                    Some(file_id),
                    mimetype,
                    &created,
                ));
            }
        }

        let draft_files = ctx
            .session
            .select(&RDM_DRAFTS_FILES, &row_from(json!({"record_id": draft_id})))
            .await?;
        for file in draft_files {
            let key = rows::required_str(&file, "key")?;
            let copied = version
                .object_versions
                .iter()
                .any(|object_version| object_version.get("key").and_then(Value::as_str) == Some(key));
            if copied {
                version.files.push(row_from(json!({"key": key})));
            }
        }

        let Publication {
            operations: mut published,
            parent_id,
            new_parent,
            record_id,
            ..
        } = publish::publish(ctx.state, version)?;
        let record_insert = published
            .iter()
            .position(|operation| operation.is(OperationType::Insert, RDM_RECORDS_METADATA.name))
            .unwrap_or(published.len());
        published.insert(record_insert, soft_delete_draft(&draft_id, &updated));
        operations.extend(published);

        if !new_parent {
            operations.push(Operation::update(
                &RDM_PARENTS_METADATA,
                row_from(json!({"id": parent_id, "updated": updated})),
            ));
        }

        let Some(parent) = parent_by_id(ctx.state, &parent_id)? else {
            bail!(ErrorKind::MissingKey, "Published parent is not in the state", parent_id);
        };
        let parent = ParentState {
            next_draft_id: None,
            ..parent
        };
        ctx.state.put_as(&parent)?;
        let versions = rows::versions_state(
            &parent.id,
            parent.latest_id.as_deref(),
            parent.latest_index,
            None,
        );
        operations.push(if new_parent {
            Operation::insert(&RDM_VERSIONS_STATE, versions)
        } else {
            Operation::update(&RDM_VERSIONS_STATE, versions)
        });

        info!(%record_id, %draft_id, "published draft");
        Ok(operations)
    }
}

/// Publication of an edited draft of a published record.
pub struct DraftPublishEdit;

impl TransformAction for DraftPublishEdit {
    fn name(&self) -> &'static str {
        "draft-publish-edit"
    }

    fn matches(&self, tx: &Tx) -> bool {
        tx.has(CdcOp::Update, RECORDS) && tx.has(CdcOp::Update, DRAFTS)
    }

    fn transform(&self, tx: &Tx) -> EtlResult<Box<dyn LoadAction>> {
        let tx = source::normalize(tx)?;

        Ok(Box::new(DraftPublishEditLoad {
            data: DraftPublishEditData {
                tx_id: tx.id,
                record: record_image(&tx, CdcOp::Update)?,
                draft: updated_draft(&tx)?,
            },
            files: tx.on(FILES).cloned().collect(),
        }))
    }
}

#[derive(Debug)]
struct DraftPublishEditLoad {
    data: DraftPublishEditData,
    files: Vec<TxOperation>,
}

#[async_trait]
impl LoadAction for DraftPublishEditLoad {
    fn name(&self) -> &'static str {
        "draft-publish-edit"
    }

    typed_payload!(data);

    async fn generate_rows(&mut self, ctx: &mut ActionContext<'_>) -> EtlResult<Vec<Operation>> {
        let record = &self.data.record;
        let draft = &self.data.draft;
        let record_id = rows::required_str(record, "id")?.to_string();
        let draft_id = rows::required_str(draft, "id")?.to_string();
        let recid = rows::key(record, "json.id")?;
        let (_, updated) = rows::timestamps(record)?;

        let Some(mut tracked) = ctx.state.get_as::<RecordState>(&recid)? else {
            bail!(ErrorKind::MissingKey, "Edited record is not in the state", recid);
        };
        let mut operations = Vec::new();

        let draft_bucket = draft_bucket(ctx.state, draft, &draft_id)?;
        let record_bucket = tracked.bucket_id.clone().or_else(|| {
            record
                .get("bucket_id")
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        if let (Some(draft_bucket), Some(record_bucket)) = (&draft_bucket, &record_bucket) {
            let draft_heads = sync::heads(ctx.session, draft_bucket).await?;
            let record_heads = sync::heads(ctx.session, record_bucket).await?;
            let synced = sync::sync(&draft_heads, &record_heads, record_bucket, &updated);
            debug!(%record_id, changes = synced.len(), "synchronized record files");
            operations.extend(synced);
        }

        let source_json = dict_get(record, "json")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let doi = publish::doi(&source_json, &recid);
        let previous_doi = tracked
            .pids
            .get("doi")
            .and_then(Value::as_str)
            .map(str::to_string);
        if previous_doi.as_deref() != Some(doi.as_str()) {
            if let Some(previous) = &previous_doi {
                if let Some(old) = ctx.state.get_as::<PidState>(previous)? {
                    operations.push(pids::set_status(
                        ctx.state,
                        &old,
                        etl::ids::PidStatus::Deleted,
                        None,
                        &updated,
                    )?);
                }
            }
            publish::register(ctx.state, DOI, &doi, &record_id, &updated, &mut operations)?;
        }

        operations.push(soft_delete_draft(&draft_id, &updated));

        let pid = publish::recid_descriptor(ctx.state, &recid)?;
        let version_id = record
            .get("version_id")
            .and_then(Value::as_i64)
            .or(tracked.version_id);
        operations.push(Operation::update(
            &RDM_RECORDS_METADATA,
            row_from(json!({
                "id": record_id,
                "json": publish::record_json(&source_json, &pid, &doi, &recid),
                "updated": updated,
                "version_id": version_id,
            })),
        ));
        operations.extend(RECORD_FILES.generate_all(&self.files)?);

        if let Some(parent) = parent_by_id(ctx.state, &tracked.parent_id)? {
            let parent_version = parent.version_id.unwrap_or(1) + 1;
            operations.push(Operation::update(
                &RDM_PARENTS_METADATA,
                row_from(json!({"id": parent.id, "version_id": parent_version, "updated": updated})),
            ));
            let pending_edit = parent.next_draft_id.as_deref() == Some(draft_id.as_str());
            if pending_edit {
                operations.push(Operation::update(
                    &RDM_VERSIONS_STATE,
                    row_from(json!({"parent_id": parent.id, "next_draft_id": null})),
                ));
            }
            ctx.state.put_as(&ParentState {
                version_id: Some(parent_version),
                next_draft_id: if pending_edit { None } else { parent.next_draft_id.clone() },
                ..parent
            })?;
        }

        tracked.pids["doi"] = json!(doi);
        tracked.version_id = version_id;
        ctx.state.put_as(&tracked)?;

        Ok(operations)
    }
}

/// A change of a published record outside of a draft publication, such as a metadata fix or a
/// deletion.
pub struct RecordUpdate;

impl TransformAction for RecordUpdate {
    fn name(&self) -> &'static str {
        "record-update"
    }

    fn matches(&self, tx: &Tx) -> bool {
        tx.has(CdcOp::Update, RECORDS) && !tx.touches(DRAFTS) && !tx.touches(GITHUB_RELEASES)
    }

    fn transform(&self, tx: &Tx) -> EtlResult<Box<dyn LoadAction>> {
        let tx = source::normalize(tx)?;

        Ok(Box::new(RecordUpdateLoad {
            data: RecordUpdateData {
                tx_id: tx.id,
                record: record_image(&tx, CdcOp::Update)?,
                buckets: rows_of(&tx, CdcOp::Update, BUCKETS),
            },
            files: tx.on(FILES).cloned().collect(),
        }))
    }
}

#[derive(Debug)]
struct RecordUpdateLoad {
    data: RecordUpdateData,
    files: Vec<TxOperation>,
}

#[async_trait]
impl LoadAction for RecordUpdateLoad {
    fn name(&self) -> &'static str {
        "record-update"
    }

    typed_payload!(data);

    async fn generate_rows(&mut self, ctx: &mut ActionContext<'_>) -> EtlResult<Vec<Operation>> {
        let record = &self.data.record;
        let record_id = rows::required_str(record, "id")?.to_string();
        let (_, updated) = rows::timestamps(record)?;

        let mut operations = self
            .data
            .buckets
            .iter()
            .map(|bucket| Operation::update(&FILES_BUCKET, rows::project(&FILES_BUCKET, bucket)))
            .collect::<Vec<_>>();

        let mut row = row_from(json!({"id": record_id, "updated": updated}));
        match record.get("json").and_then(Value::as_object) {
            Some(source_json) => {
                let recid = rows::key(record, "json.id")?;
                let pid = publish::recid_descriptor(ctx.state, &recid)?;
                let doi = match ctx.state.get_as::<RecordState>(&recid)? {
                    Some(tracked) => tracked
                        .pids
                        .get("doi")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| publish::doi(source_json, &recid)),
                    None => publish::doi(source_json, &recid),
                };
                row.insert(
                    "json".to_string(),
                    publish::record_json(source_json, &pid, &doi, &recid),
                );
            }
            None => {
                row.insert("json".to_string(), Value::Null);
            }
        }
        for column in ["version_id", "deletion_status"] {
            if let Some(value) = record.get(column).filter(|value| !value.is_null()) {
                row.insert(column.to_string(), value.clone());
            }
        }
        operations.push(Operation::update(&RDM_RECORDS_METADATA, row));
        operations.extend(RECORD_FILES.generate_all(&self.files)?);

        Ok(operations)
    }
}

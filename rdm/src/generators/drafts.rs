use etl::error::EtlResult;
use etl::ids::PidStatus;
use etl::load::bulk::{TableGenerator, TableRow};
use etl::operation::Operation;
use etl::state::{BucketState, ParentState, RecordState, StateStore};
use etl::types::{Entry, row_from};
use postgres::schema::TableModel;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::actions::drafts::{SourceDraft, draft_pid};
use crate::generators::{object, objects, required_object, table_rows};
use crate::models::{
    FILES_BUCKET, FILES_OBJECT, PIDSTORE_PID, RDM_DRAFTS_FILES, RDM_DRAFTS_METADATA,
    RDM_PARENTS_COMMUNITY, RDM_PARENTS_METADATA, RDM_VERSIONS_STATE,
};
use crate::publish::{self, resolve_communities, resolve_parent};
use crate::rows;

/// Unpublished drafts and drafts of published records.
///
/// Runs after the records stream: a draft of a known recid or parent is attached to it, any
/// other draft gets a new parent whose versions state row is written at the end.
#[derive(Debug, Default)]
pub struct DraftsGenerator {
    /// Concept recids of the parents created by this generator.
    parents: Vec<String>,
}

impl DraftsGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TableGenerator for DraftsGenerator {
    fn name(&self) -> &'static str {
        "drafts"
    }

    fn tables(&self) -> Vec<&'static TableModel> {
        vec![
            &FILES_BUCKET,
            &FILES_OBJECT,
            &RDM_PARENTS_METADATA,
            &PIDSTORE_PID,
            &RDM_DRAFTS_METADATA,
            &RDM_DRAFTS_FILES,
            &RDM_PARENTS_COMMUNITY,
            &RDM_VERSIONS_STATE,
        ]
    }

    fn generate(&mut self, entry: &Entry, state: &mut StateStore) -> EtlResult<Vec<TableRow>> {
        let source = required_object(entry, "draft")?;
        if source.get("json").is_none_or(Value::is_null) {
            debug!(id = ?source.get("id"), "skipping soft-deleted draft");
            return Ok(Vec::new());
        }

        let mut draft = SourceDraft::parse(&source)?;
        let mut operations = Vec::new();

        if let Some(bucket) = object(entry, "bucket") {
            let bucket_id = rows::required_str(&bucket, "id")?.to_string();
            operations.push(Operation::insert(&FILES_BUCKET, rows::project(&FILES_BUCKET, &bucket)));
            state.put_as(&BucketState {
                id: bucket_id.clone(),
                draft_id: draft.id.clone(),
            })?;
            draft.bucket_id.get_or_insert(bucket_id);
        }
        let object_versions = objects(entry, "object_versions");
        for object_version in &object_versions {
            operations.push(Operation::insert(
                &FILES_OBJECT,
                rows::project(&FILES_OBJECT, object_version),
            ));
        }

        if let Some(record) = state.get_as::<RecordState>(&draft.recid)? {
            let pid = publish::recid_descriptor(state, &draft.recid)?;
            operations.push(Operation::insert(
                &RDM_DRAFTS_METADATA,
                draft.row(&pid, &record.parent_id, record.index, record.version_id),
            ));
        } else if let Some(parent) = state.get_as::<ParentState>(&draft.conceptrecid)? {
            let pid = draft_pid(state, &draft, &mut operations)?;
            let index = parent.latest_index.map_or(1, |latest| latest + 1);
            operations.push(Operation::insert(
                &RDM_DRAFTS_METADATA,
                draft.row(&pid, &parent.id, index, None),
            ));
            if parent.next_draft_id.is_some() {
                warn!(recid = %draft.recid, "parent already has a pending draft");
            }
            state.put_as(&ParentState {
                next_draft_id: Some(draft.id.clone()),
                ..parent
            })?;
        } else {
            let communities = resolve_communities(state, draft.json.get("communities"))?;
            let parent = resolve_parent(
                state,
                &draft.conceptrecid,
                &draft.created,
                PidStatus::New,
                &communities,
                &mut operations,
            )?;
            let pid = draft_pid(state, &draft, &mut operations)?;
            operations.push(Operation::insert(
                &RDM_DRAFTS_METADATA,
                draft.row(&pid, &parent.id, 1, None),
            ));
            for community_id in &communities {
                operations.push(Operation::insert(
                    &RDM_PARENTS_COMMUNITY,
                    row_from(json!({"community_id": community_id, "record_id": parent.id})),
                ));
            }
            state.add_as(&ParentState {
                recid: draft.conceptrecid.clone(),
                id: parent.id,
                latest_id: None,
                latest_index: None,
                next_draft_id: Some(draft.id.clone()),
                communities,
                version_id: Some(1),
                pid_pk: parent.pid_pk,
            })?;
            self.parents.push(draft.conceptrecid.clone());
        }

        for file in objects(entry, "files") {
            let (row, tracked) = publish::record_file(&file, &draft.id, &object_versions, &draft.created)?;
            operations.push(Operation::insert(&RDM_DRAFTS_FILES, row));
            state.put_as(&tracked)?;
        }

        Ok(table_rows(self.name(), operations))
    }

    fn finish(&mut self, state: &mut StateStore) -> EtlResult<Vec<TableRow>> {
        let mut versions = Vec::with_capacity(self.parents.len());
        for recid in self.parents.drain(..) {
            if let Some(parent) = state.get_as::<ParentState>(&recid)? {
                versions.push(TableRow::new(
                    &RDM_VERSIONS_STATE,
                    rows::versions_state(&parent.id, None, None, parent.next_draft_id.as_deref()),
                ));
            }
        }

        Ok(versions)
    }
}

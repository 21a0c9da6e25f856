use async_trait::async_trait;
use etl::error::{ErrorKind, EtlResult};
use etl::ids::PidStatus;
use etl::operation::Operation;
use etl::state::{BucketState, ParentState, PidState, RecordState, StateStore, StateTable};
use etl::tx::{ActionContext, LoadAction, TransformAction};
use etl::types::{CdcOp, Row, Tx, row_from};
use etl::{bail, etl_error, typed_payload};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::actions::common::{first_row, rows_of};
use crate::models::{
    FILES_BUCKET, RDM_DRAFTS_FILES, RDM_DRAFTS_METADATA, RDM_PARENTS_COMMUNITY,
    RDM_PARENTS_METADATA, RDM_VERSIONS_STATE,
};
use crate::pids::{self, RECID};
use crate::publish::{self, resolve_communities, resolve_parent};
use crate::rows;
use crate::source::{self, BUCKETS, DRAFTS, OBJECT_VERSIONS, RECORDS};

/// Returns the live parent whose UUID is `id`.
pub fn parent_by_id(state: &mut StateStore, id: &str) -> EtlResult<Option<ParentState>> {
    Ok(state
        .search_as::<ParentState>("id", &json!(id))?
        .into_iter()
        .next())
}

/// Returns the draft image of the first `op` change of `tx`.
fn draft_image(tx: &Tx, op: CdcOp) -> EtlResult<Row> {
    first_row(tx, op, DRAFTS)
        .ok_or_else(|| etl_error!(ErrorKind::MissingField, "Transaction has no draft", tx.id))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DraftCreateData {
    tx_id: i64,
    draft: Row,
    bucket: Option<Row>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DraftUpdateData {
    tx_id: i64,
    draft: Row,
    buckets: Vec<Row>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DraftDeleteData {
    tx_id: i64,
    draft: Row,
}

/// Sets the pending draft of `parent`, in the state and in the versions state.
fn point_to_draft(
    state: &mut StateStore,
    parent: &ParentState,
    draft_id: Option<&str>,
) -> EtlResult<Operation> {
    state.put_as(&ParentState {
        next_draft_id: draft_id.map(str::to_string),
        ..parent.clone()
    })?;

    Ok(Operation::update(
        &RDM_VERSIONS_STATE,
        row_from(json!({"parent_id": parent.id, "next_draft_id": draft_id})),
    ))
}

/// A draft row as carried by the change feed or a draft dump.
pub(crate) struct SourceDraft {
    pub(crate) id: String,
    pub(crate) recid: String,
    pub(crate) conceptrecid: String,
    pub(crate) json: Row,
    pub(crate) created: String,
    pub(crate) updated: String,
    pub(crate) version_id: i64,
    pub(crate) expires_at: Value,
    pub(crate) bucket_id: Option<String>,
}

impl SourceDraft {
    pub(crate) fn parse(row: &Row) -> EtlResult<Self> {
        let (created, updated) = rows::timestamps(row)?;
        Ok(Self {
            id: rows::required_str(row, "id")?.to_string(),
            recid: rows::key(row, "json.id")?,
            conceptrecid: rows::key(row, "json.conceptrecid")?,
            json: row
                .get("json")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            created,
            updated,
            version_id: row.get("version_id").and_then(Value::as_i64).unwrap_or(1),
            expires_at: row.get("expires_at").cloned().unwrap_or(Value::Null),
            bucket_id: row
                .get("bucket_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    pub(crate) fn row(
        &self,
        pid: &Value,
        parent_id: &str,
        index: i64,
        fork_version_id: Option<i64>,
    ) -> Row {
        row_from(json!({
            "id": self.id,
            "json": publish::draft_json(&self.json, pid, &self.recid),
            "created": self.created,
            "updated": self.updated,
            "version_id": self.version_id,
            "index": index,
            "bucket_id": self.bucket_id,
            "parent_id": parent_id,
            "expires_at": self.expires_at,
            "fork_version_id": fork_version_id,
        }))
    }
}

/// A new draft: an edit of a published record, a new version of a record or the first
/// draft of a new record, told apart by the state.
pub struct DraftCreate;

impl TransformAction for DraftCreate {
    fn name(&self) -> &'static str {
        "draft-create"
    }

    fn matches(&self, tx: &Tx) -> bool {
        tx.has(CdcOp::Create, DRAFTS) && !tx.touches(RECORDS)
    }

    fn transform(&self, tx: &Tx) -> EtlResult<Box<dyn LoadAction>> {
        let tx = source::normalize(tx)?;

        Ok(Box::new(DraftCreateLoad {
            data: DraftCreateData {
                tx_id: tx.id,
                draft: draft_image(&tx, CdcOp::Create)?,
                bucket: first_row(&tx, CdcOp::Create, BUCKETS),
            },
        }))
    }
}

#[derive(Debug)]
struct DraftCreateLoad {
    data: DraftCreateData,
}

#[async_trait]
impl LoadAction for DraftCreateLoad {
    fn name(&self) -> &'static str {
        "draft-create"
    }

    typed_payload!(data);

    /// The draft is in place once its parent points at it.
    fn already_applied(&self, state: &mut StateStore) -> EtlResult<bool> {
        let (Ok(id), Ok(conceptrecid)) = (
            rows::required_str(&self.data.draft, "id"),
            rows::key(&self.data.draft, "json.conceptrecid"),
        ) else {
            return Ok(false);
        };

        Ok(state
            .get_as::<ParentState>(&conceptrecid)?
            .is_some_and(|parent| parent.next_draft_id.as_deref() == Some(id)))
    }

    async fn generate_rows(&mut self, ctx: &mut ActionContext<'_>) -> EtlResult<Vec<Operation>> {
        let state = &mut *ctx.state;
        let mut draft = SourceDraft::parse(&self.data.draft)?;
        let mut operations = Vec::new();

        if let Some(bucket) = &self.data.bucket {
            let bucket_id = rows::required_str(bucket, "id")?.to_string();
            operations.push(Operation::insert(&FILES_BUCKET, rows::project(&FILES_BUCKET, bucket)));
            state.put_as(&BucketState {
                id: bucket_id.clone(),
                draft_id: draft.id.clone(),
            })?;
            draft.bucket_id.get_or_insert(bucket_id);
        }

        if let Some(record) = state.get_as::<RecordState>(&draft.recid)? {
            debug!(recid = %draft.recid, "draft of a published record");
            let pid = publish::recid_descriptor(state, &draft.recid)?;
            operations.push(Operation::insert(
                &RDM_DRAFTS_METADATA,
                draft.row(&pid, &record.parent_id, record.index, record.version_id),
            ));
            let Some(parent) = parent_by_id(state, &record.parent_id)? else {
                bail!(
                    ErrorKind::MissingKey,
                    "Published record has no parent in the state",
                    record.parent_id
                );
            };
            operations.push(point_to_draft(state, &parent, Some(&draft.id))?);
            return Ok(operations);
        }

        if let Some(parent) = state.get_as::<ParentState>(&draft.conceptrecid)? {
            debug!(recid = %draft.recid, "draft of a new version");
            let pid = draft_pid(state, &draft, &mut operations)?;
            let index = parent.latest_index.map_or(1, |latest| latest + 1);
            operations.push(Operation::insert(
                &RDM_DRAFTS_METADATA,
                draft.row(&pid, &parent.id, index, None),
            ));
            operations.push(point_to_draft(state, &parent, Some(&draft.id))?);
            return Ok(operations);
        }

        debug!(recid = %draft.recid, "first draft of a new record");
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
        operations.push(Operation::insert(
            &RDM_VERSIONS_STATE,
            rows::versions_state(&parent.id, None, None, Some(&draft.id)),
        ));
        state.add_as(&ParentState {
            recid: draft.conceptrecid.clone(),
            id: parent.id.clone(),
            latest_id: None,
            latest_index: None,
            next_draft_id: Some(draft.id.clone()),
            communities,
            version_id: Some(1),
            pid_pk: parent.pid_pk,
        })?;

        Ok(operations)
    }
}

/// Returns the recid PID of a draft, minting it with status `N` when the recid is new.
pub(crate) fn draft_pid(
    state: &mut StateStore,
    draft: &SourceDraft,
    operations: &mut Vec<Operation>,
) -> EtlResult<Value> {
    if state.contains(StateTable::Pids, &draft.recid) {
        return publish::recid_descriptor(state, &draft.recid);
    }

    let (pid, insert) = pids::mint_tracked(
        state,
        RECID,
        &draft.recid,
        PidStatus::New,
        Some(&draft.id),
        &draft.created,
    )?;
    operations.push(insert);
    Ok(pid.to_value())
}

/// A metadata change of an unpublished draft.
pub struct DraftUpdate;

impl TransformAction for DraftUpdate {
    fn name(&self) -> &'static str {
        "draft-update"
    }

    fn matches(&self, tx: &Tx) -> bool {
        let edits_document = tx
            .ops(CdcOp::Update, DRAFTS)
            .any(|change| change.after.as_ref().and_then(|after| after.get("json")).is_some_and(|json| !json.is_null()));

        edits_document
            && !tx.touches(RECORDS)
            && !tx.has(CdcOp::Create, OBJECT_VERSIONS)
            && !tx.has(CdcOp::Update, OBJECT_VERSIONS)
    }

    fn transform(&self, tx: &Tx) -> EtlResult<Box<dyn LoadAction>> {
        let tx = source::normalize(tx)?;

        Ok(Box::new(DraftUpdateLoad {
            data: DraftUpdateData {
                tx_id: tx.id,
                draft: draft_image(&tx, CdcOp::Update)?,
                buckets: rows_of(&tx, CdcOp::Update, BUCKETS),
            },
        }))
    }
}

#[derive(Debug)]
struct DraftUpdateLoad {
    data: DraftUpdateData,
}

#[async_trait]
impl LoadAction for DraftUpdateLoad {
    fn name(&self) -> &'static str {
        "draft-update"
    }

    typed_payload!(data);

    async fn generate_rows(&mut self, ctx: &mut ActionContext<'_>) -> EtlResult<Vec<Operation>> {
        let draft = SourceDraft::parse(&self.data.draft)?;
        let pid = publish::recid_descriptor(ctx.state, &draft.recid)?;

        let mut operations = self
            .data
            .buckets
            .iter()
            .map(|bucket| Operation::update(&FILES_BUCKET, rows::project(&FILES_BUCKET, bucket)))
            .collect::<Vec<_>>();

        let mut row = row_from(json!({
            "id": draft.id,
            "json": publish::draft_json(&draft.json, &pid, &draft.recid),
            "updated": draft.updated,
            "version_id": draft.version_id,
        }));
        if !draft.expires_at.is_null() {
            row.insert("expires_at".to_string(), draft.expires_at.clone());
        }
        operations.push(Operation::update(&RDM_DRAFTS_METADATA, row));

        Ok(operations)
    }
}

/// A discarded draft. Discarding the only draft of a never published record removes its
/// parent as well.
pub struct DraftDelete;

impl TransformAction for DraftDelete {
    fn name(&self) -> &'static str {
        "draft-delete"
    }

    fn matches(&self, tx: &Tx) -> bool {
        tx.has(CdcOp::Delete, DRAFTS) && !tx.touches(RECORDS)
    }

    fn transform(&self, tx: &Tx) -> EtlResult<Box<dyn LoadAction>> {
        let tx = source::normalize(tx)?;

        Ok(Box::new(DraftDeleteLoad {
            data: DraftDeleteData {
                tx_id: tx.id,
                draft: draft_image(&tx, CdcOp::Delete)?,
            },
        }))
    }
}

#[derive(Debug)]
struct DraftDeleteLoad {
    data: DraftDeleteData,
}

#[async_trait]
impl LoadAction for DraftDeleteLoad {
    fn name(&self) -> &'static str {
        "draft-delete"
    }

    typed_payload!(data);

    async fn generate_rows(&mut self, ctx: &mut ActionContext<'_>) -> EtlResult<Vec<Operation>> {
        let draft_row = &self.data.draft;
        let draft_id = rows::required_str(draft_row, "id")?.to_string();
        let updated = rows::timestamps(draft_row)
            .map(|(_, updated)| updated)
            .unwrap_or_default();
        let mut operations = Vec::new();

        let files = ctx
            .session
            .select(&RDM_DRAFTS_FILES, &row_from(json!({"record_id": draft_id})))
            .await?;
        for file in files {
            let file_id = rows::required_str(&file, "id")?.to_string();
            ctx.state.discard(StateTable::FileRecords, &file_id);
            operations.push(Operation::delete(&RDM_DRAFTS_FILES, row_from(json!({"id": file_id}))));
        }
        operations.push(Operation::delete(&RDM_DRAFTS_METADATA, row_from(json!({"id": draft_id}))));

        let owned_buckets = ctx
            .state
            .search_as::<BucketState>("draft_id", &json!(draft_id))?;
        for bucket in owned_buckets {
            ctx.state.discard(StateTable::Buckets, &bucket.id);
        }

        let recid = rows::key(draft_row, "json.id").ok();
        let conceptrecid = rows::key(draft_row, "json.conceptrecid").ok();
        let state = &mut *ctx.state;

        if let Some(recid) = &recid {
            if !state.contains(StateTable::Records, recid) {
                if let Some(tracked) = state.get_as::<PidState>(recid)? {
                    if tracked.status == PidStatus::New.as_str() {
                        operations.push(pids::set_status(state, &tracked, PidStatus::Deleted, None, &updated)?);
                    }
                }
            }
        }

        let parent = match conceptrecid {
            Some(conceptrecid) => state.get_as::<ParentState>(&conceptrecid)?,
            None => None,
        };
        let Some(parent) = parent else {
            return Ok(operations);
        };
        if parent.next_draft_id.as_deref() != Some(draft_id.as_str()) {
            return Ok(operations);
        }

        if parent.latest_id.is_some() {
            operations.push(point_to_draft(state, &parent, None)?);
            return Ok(operations);
        }

        operations.push(Operation::delete(
            &RDM_VERSIONS_STATE,
            row_from(json!({"parent_id": parent.id})),
        ));
        for community_id in &parent.communities {
            operations.push(Operation::delete(
                &RDM_PARENTS_COMMUNITY,
                row_from(json!({"community_id": community_id, "record_id": parent.id})),
            ));
        }
        operations.push(Operation::delete(
            &RDM_PARENTS_METADATA,
            row_from(json!({"id": parent.id})),
        ));
        if let Some(tracked) = state.get_as::<PidState>(&parent.recid)? {
            operations.push(pids::set_status(state, &tracked, PidStatus::Deleted, None, &updated)?);
        }
        state.discard(StateTable::Parents, &parent.recid);

        Ok(operations)
    }
}

#[cfg(test)]
mod tests {
    use etl::ids::PID_PK_MIN;
    use etl::test_utils::{MemoryDatabase, tx};
    use etl::tx::prepare;

    use super::*;

    fn draft(id: &str, recid: &str) -> Value {
        json!({
            "id": id,
            "json": {"id": recid, "conceptrecid": "100", "metadata": {"title": "Draft"}},
            "created": 1_577_836_800_000_000_i64,
            "updated": 1_577_836_800_000_000_i64,
            "version_id": 1,
            "expires_at": null
        })
    }

    async fn run(action: &dyn TransformAction, tx: &Tx, state: &mut StateStore) -> Vec<Operation> {
        let mut db = MemoryDatabase::new();
        run_on(action, tx, state, &mut db).await
    }

    async fn run_on(
        action: &dyn TransformAction,
        tx: &Tx,
        state: &mut StateStore,
        db: &mut MemoryDatabase,
    ) -> Vec<Operation> {
        assert!(action.matches(tx));
        let mut load = action.transform(tx).unwrap();
        let mut ctx = ActionContext { state, session: db };
        prepare(load.as_mut(), &mut ctx).await.unwrap()
    }

    fn names(operations: &[Operation]) -> Vec<String> {
        operations.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn first_draft_creates_parent_and_versions_state() {
        let mut state = StateStore::with_defaults(true);
        let create = tx(
            1,
            vec![
                (CdcOp::Create, BUCKETS, json!({"id": "b1", "created": 1_577_836_800_000_000_i64})),
                (CdcOp::Create, DRAFTS, draft("d1", "101")),
            ],
        );

        let operations = run(&DraftCreate, &create, &mut state).await;

        assert_eq!(
            names(&operations),
            vec![
                "INSERT files_bucket",
                "INSERT rdm_parents_metadata",
                "INSERT pidstore_pid",
                "INSERT pidstore_pid",
                "INSERT rdm_drafts_metadata",
                "INSERT rdm_versions_state",
            ]
        );
        assert_eq!(operations[2].data["status"], "N");
        let draft_row = &operations[4].data;
        assert_eq!(draft_row["bucket_id"], "b1");
        assert_eq!(draft_row["json"]["pid"]["pk"], json!(PID_PK_MIN + 1));
        assert_eq!(draft_row["created"], "2020-01-01T00:00:00");
        assert_eq!(operations[5].data["next_draft_id"], "d1");

        let parent = state.get_as::<ParentState>("100").unwrap().unwrap();
        assert_eq!(parent.next_draft_id.as_deref(), Some("d1"));
        assert_eq!(state.get_as::<BucketState>("b1").unwrap().unwrap().draft_id, "d1");
    }

    #[tokio::test]
    async fn discarding_the_only_draft_removes_the_parent() {
        let mut state = StateStore::with_defaults(true);
        let mut db = MemoryDatabase::new();
        let create = tx(1, vec![(CdcOp::Create, DRAFTS, draft("d1", "101"))]);
        run_on(&DraftCreate, &create, &mut state, &mut db).await;
        db.seed(
            &RDM_DRAFTS_FILES,
            rows::file_record("f1", "a.txt", "d1", None, "2020-01-01T00:00:00", "2020-01-01T00:00:00"),
        )
        .await;

        let delete = tx(2, vec![(CdcOp::Delete, DRAFTS, draft("d1", "101"))]);
        let operations = run_on(&DraftDelete, &delete, &mut state, &mut db).await;

        assert_eq!(
            names(&operations),
            vec![
                "DELETE rdm_drafts_files",
                "DELETE rdm_drafts_metadata",
                "UPDATE pidstore_pid",
                "DELETE rdm_versions_state",
                "DELETE rdm_parents_metadata",
                "UPDATE pidstore_pid",
            ]
        );
        assert!(operations[2].data["status"] == "D" && operations[5].data["status"] == "D");

        // The parent row is kept, marked deleted.
        assert!(state.get_as::<ParentState>("100").unwrap().is_none());
        assert_eq!(state.get(StateTable::Parents, "100").unwrap()["deleted"], true);
    }

    #[tokio::test]
    async fn discarding_a_draft_keeps_its_bucket_and_file_rows() {
        let mut state = StateStore::with_defaults(true);
        let mut db = MemoryDatabase::new();
        let create = tx(
            1,
            vec![
                (CdcOp::Create, BUCKETS, json!({"id": "b1", "created": 1_577_836_800_000_000_i64})),
                (CdcOp::Create, DRAFTS, draft("d1", "101")),
            ],
        );
        run_on(&DraftCreate, &create, &mut state, &mut db).await;
        state
            .add(
                StateTable::FileRecords,
                row_from(json!({"id": "f1", "draft_id": "d1", "record_id": null, "file_id": null})),
            )
            .unwrap();
        db.seed(
            &RDM_DRAFTS_FILES,
            rows::file_record("f1", "a.txt", "d1", None, "2020-01-01T00:00:00", "2020-01-01T00:00:00"),
        )
        .await;

        let delete = tx(2, vec![(CdcOp::Delete, DRAFTS, draft("d1", "101"))]);
        run_on(&DraftDelete, &delete, &mut state, &mut db).await;

        for (table, key) in [
            (StateTable::Buckets, "b1"),
            (StateTable::FileRecords, "f1"),
            (StateTable::Parents, "100"),
        ] {
            assert_eq!(state.get(table, key).unwrap()["deleted"], true, "{table}/{key}");
        }
        assert!(state.get_as::<BucketState>("b1").unwrap().is_none());
    }

    #[tokio::test]
    async fn creating_a_draft_again_is_a_no_op() {
        let mut state = StateStore::with_defaults(true);
        let create = tx(
            1,
            vec![
                (CdcOp::Create, BUCKETS, json!({"id": "b1", "created": 1_577_836_800_000_000_i64})),
                (CdcOp::Create, DRAFTS, draft("d1", "101")),
            ],
        );
        run(&DraftCreate, &create, &mut state).await;
        let max_pid_pk = state.get(StateTable::Global, "max_pid_pk").cloned();
        let pids = state.len(StateTable::Pids);

        let operations = run(&DraftCreate, &create, &mut state).await;

        assert!(operations.is_empty());
        assert_eq!(state.get(StateTable::Global, "max_pid_pk").cloned(), max_pid_pk);
        assert_eq!(state.len(StateTable::Pids), pids);
    }

    #[tokio::test]
    async fn discarding_a_new_version_keeps_the_parent() {
        let mut state = StateStore::with_defaults(true);
        state
            .add_as(&ParentState {
                recid: "100".to_string(),
                id: "p1".to_string(),
                latest_id: Some("r1".to_string()),
                latest_index: Some(1),
                next_draft_id: None,
                communities: Vec::new(),
                version_id: Some(1),
                pid_pk: None,
            })
            .unwrap();

        let create = tx(1, vec![(CdcOp::Create, DRAFTS, draft("d2", "102"))]);
        let created = run(&DraftCreate, &create, &mut state).await;
        assert_eq!(
            names(&created),
            vec!["INSERT pidstore_pid", "INSERT rdm_drafts_metadata", "UPDATE rdm_versions_state"]
        );
        assert_eq!(created[1].data["index"], 2);

        let delete = tx(2, vec![(CdcOp::Delete, DRAFTS, draft("d2", "102"))]);
        let deleted = run(&DraftDelete, &delete, &mut state).await;
        assert_eq!(
            names(&deleted),
            vec!["DELETE rdm_drafts_metadata", "UPDATE pidstore_pid", "UPDATE rdm_versions_state"]
        );
        assert_eq!(deleted[2].data["next_draft_id"], Value::Null);
        let parent = state.get_as::<ParentState>("100").unwrap().unwrap();
        assert_eq!(parent.next_draft_id, None);
        assert_eq!(parent.latest_id.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn updates_keep_the_pid_in_the_document() {
        let mut state = StateStore::with_defaults(true);
        run(&DraftCreate, &tx(1, vec![(CdcOp::Create, DRAFTS, draft("d1", "101"))]), &mut state).await;

        let update = tx(2, vec![(CdcOp::Update, DRAFTS, draft("d1", "101"))]);
        assert!(!DraftCreate.matches(&update));
        let operations = run(&DraftUpdate, &update, &mut state).await;

        assert_eq!(names(&operations), vec!["UPDATE rdm_drafts_metadata"]);
        assert_eq!(operations[0].data["json"]["pid"]["status"], "N");
        assert!(operations[0].data.get("expires_at").is_none());
    }

    #[test]
    fn soft_deleted_drafts_are_not_updates() {
        let publish = tx(1, vec![(CdcOp::Update, DRAFTS, json!({"id": "d1", "json": null}))]);
        assert!(!DraftUpdate.matches(&publish));

        let upload = tx(
            2,
            vec![
                (CdcOp::Update, DRAFTS, draft("d1", "101")),
                (CdcOp::Create, OBJECT_VERSIONS, json!({"version_id": "v1"})),
            ],
        );
        assert!(!DraftUpdate.matches(&upload));
    }
}

use async_trait::async_trait;
use etl::error::{ErrorKind, EtlResult};
use etl::ids::uuid;
use etl::operation::Operation;
use etl::state::{BucketState, FileRecordState, StateTable};
use etl::tx::{ActionContext, LoadAction, TransformAction};
use etl::types::{CdcOp, Row, Tx, row_from};
use etl::{bail, typed_payload};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::actions::common::rows_of;
use crate::models::{FILES_BUCKET, FILES_FILES, FILES_OBJECT, RDM_DRAFTS_FILES};
use crate::rows;
use crate::source::{self, BUCKETS, DRAFTS, FILE_INSTANCES, OBJECT_VERSIONS, RECORDS};

/// A file added to, replaced in or removed from a draft bucket.
///
/// Every new head object version is reflected in `rdm_drafts_files`: a head with a file links
/// (or relinks) the draft file of its key, a deletion marker removes it.
pub struct FileUpload;

impl TransformAction for FileUpload {
    fn name(&self) -> &'static str {
        "file-upload"
    }

    fn matches(&self, tx: &Tx) -> bool {
        tx.has(CdcOp::Update, BUCKETS)
            && tx.has(CdcOp::Create, OBJECT_VERSIONS)
            && !tx.touches(DRAFTS)
            && !tx.touches(RECORDS)
    }

    fn transform(&self, tx: &Tx) -> EtlResult<Box<dyn LoadAction>> {
        let tx = source::normalize(tx)?;

        Ok(Box::new(FileUploadLoad {
            data: FileUploadData {
                tx_id: tx.id,
                buckets: rows_of(&tx, CdcOp::Update, BUCKETS),
                file_instances: rows_of(&tx, CdcOp::Create, FILE_INSTANCES),
                replaced: rows_of(&tx, CdcOp::Update, OBJECT_VERSIONS),
                object_versions: rows_of(&tx, CdcOp::Create, OBJECT_VERSIONS),
            },
        }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileUploadData {
    tx_id: i64,
    buckets: Vec<Row>,
    file_instances: Vec<Row>,
    /// Object versions that stopped being the head of their key.
    replaced: Vec<Row>,
    /// New head object versions.
    object_versions: Vec<Row>,
}

#[derive(Debug)]
struct FileUploadLoad {
    data: FileUploadData,
}

#[async_trait]
impl LoadAction for FileUploadLoad {
    fn name(&self) -> &'static str {
        "file-upload"
    }

    typed_payload!(data);

    async fn generate_rows(&mut self, ctx: &mut ActionContext<'_>) -> EtlResult<Vec<Operation>> {
        let mut operations = Vec::new();
        for bucket in &self.data.buckets {
            operations.push(Operation::update(&FILES_BUCKET, rows::project(&FILES_BUCKET, bucket)));
        }
        for instance in &self.data.file_instances {
            operations.push(Operation::insert(&FILES_FILES, rows::project(&FILES_FILES, instance)));
        }
        for replaced in &self.data.replaced {
            operations.push(Operation::update(&FILES_OBJECT, rows::project(&FILES_OBJECT, replaced)));
        }

        let heads = &self.data.object_versions;
        for head in heads {
            operations.push(Operation::insert(&FILES_OBJECT, rows::project(&FILES_OBJECT, head)));
        }

        for head in heads {
            let bucket_id = rows::required_str(head, "bucket_id")?;
            let Some(bucket) = ctx.state.get_as::<BucketState>(bucket_id)? else {
                bail!(ErrorKind::MissingKey, "Bucket has no draft in the state", bucket_id);
            };
            if let Some(operation) = link(ctx, &bucket.draft_id, head).await? {
                operations.push(operation);
            }
        }

        Ok(operations)
    }
}

/// Returns the `rdm_drafts_files` write bringing the draft file of `head`'s key in line with
/// it, and records the file in the state.
async fn link(
    ctx: &mut ActionContext<'_>,
    draft_id: &str,
    head: &Row,
) -> EtlResult<Option<Operation>> {
    let key = rows::required_str(head, "key")?;
    let version_id = rows::required_str(head, "version_id")?;
    let file_id = head.get("file_id").and_then(Value::as_str);
    let (created, updated) = rows::timestamps(head)?;

    let existing = ctx
        .session
        .select(
            &RDM_DRAFTS_FILES,
            &row_from(json!({"record_id": draft_id, "key": key})),
        )
        .await?
        .into_iter()
        .next();

    match (existing, file_id) {
        (Some(existing), None) => {
            let id = rows::required_str(&existing, "id")?.to_string();
            ctx.state.discard(StateTable::FileRecords, &id);
            debug!(draft_id, key, "removed draft file");
            Ok(Some(Operation::delete(&RDM_DRAFTS_FILES, row_from(json!({"id": id})))))
        }
        (None, None) => Ok(None),
        (Some(existing), Some(file_id)) => {
            let id = rows::required_str(&existing, "id")?.to_string();
            let version = existing.get("version_id").and_then(Value::as_i64).unwrap_or(1) + 1;
            ctx.state.put_as(&FileRecordState {
                id: id.clone(),
                json: existing.get("json").cloned().unwrap_or_else(|| json!({})),
                created: rows::required_str(&existing, "created")
                    .unwrap_or(created.as_str())
                    .to_string(),
                updated: updated.clone(),
                version_id: version,
                key: key.to_string(),
                record_id: draft_id.to_string(),
                object_version_id: Some(version_id.to_string()),
                file_id: Some(file_id.to_string()),
            })?;
            Ok(Some(Operation::update(
                &RDM_DRAFTS_FILES,
                row_from(json!({
                    "id": id,
                    "object_version_id": version_id,
                    "version_id": version,
                    "updated": updated,
                })),
            )))
        }
        (None, Some(file_id)) => {
            let id = uuid();
            ctx.state.put_as(&FileRecordState {
                id: id.clone(),
                json: json!({}),
                created: created.clone(),
                updated: updated.clone(),
                version_id: 1,
                key: key.to_string(),
                record_id: draft_id.to_string(),
                object_version_id: Some(version_id.to_string()),
                file_id: Some(file_id.to_string()),
            })?;
            Ok(Some(Operation::insert(
                &RDM_DRAFTS_FILES,
                rows::file_record(&id, key, draft_id, Some(version_id), &created, &updated),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use etl::state::StateStore;
    use etl::test_utils::{MemoryDatabase, tx};
    use etl::tx::prepare;

    use super::*;

    const CREATED: i64 = 1_577_836_800_000_000;

    fn upload(id: i64, version_id: &str, file_id: Option<&str>) -> Tx {
        tx(
            id,
            vec![
                (CdcOp::Update, BUCKETS, json!({"id": "db", "size": 10, "created": CREATED})),
                (
                    CdcOp::Create,
                    FILE_INSTANCES,
                    json!({"id": file_id, "size": 10, "created": CREATED, "uri": "/data/f"}),
                ),
                (
                    CdcOp::Create,
                    OBJECT_VERSIONS,
                    json!({
                        "version_id": version_id,
                        "bucket_id": "db",
                        "key": "data.csv",
                        "file_id": file_id,
                        "created": CREATED,
                        "is_head": true
                    }),
                ),
            ],
        )
    }

    async fn run(tx: &Tx, state: &mut StateStore, db: &mut MemoryDatabase) -> Vec<Operation> {
        assert!(FileUpload.matches(tx));
        let mut load = FileUpload.transform(tx).unwrap();
        let mut ctx = ActionContext { state, session: db };
        prepare(load.as_mut(), &mut ctx).await.unwrap()
    }

    fn state_with_draft_bucket() -> StateStore {
        let mut state = StateStore::with_defaults(true);
        state
            .add_as(&BucketState {
                id: "db".to_string(),
                draft_id: "d1".to_string(),
            })
            .unwrap();
        state
    }

    #[tokio::test]
    async fn first_upload_links_the_draft_file() {
        let mut state = state_with_draft_bucket();
        let mut db = MemoryDatabase::new();

        let operations = run(&upload(1, "v1", Some("f1")), &mut state, &mut db).await;

        assert_eq!(
            operations.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec![
                "UPDATE files_bucket",
                "INSERT files_files",
                "INSERT files_object",
                "INSERT rdm_drafts_files",
            ]
        );
        let file = &operations[3].data;
        assert_eq!(file["record_id"], "d1");
        assert_eq!(file["object_version_id"], "v1");
        assert_eq!(file["created"], "2020-01-01T00:00:00");

        let tracked = state.get_as::<FileRecordState>(file["id"].as_str().unwrap()).unwrap().unwrap();
        assert_eq!(tracked.file_id.as_deref(), Some("f1"));
    }

    #[tokio::test]
    async fn replacing_a_file_relinks_it() {
        let mut state = state_with_draft_bucket();
        let mut db = MemoryDatabase::new();
        db.seed(
            &RDM_DRAFTS_FILES,
            rows::file_record("df1", "data.csv", "d1", Some("v1"), "2020-01-01T00:00:00", "2020-01-01T00:00:00"),
        )
        .await;

        let operations = run(&upload(2, "v2", Some("f2")), &mut state, &mut db).await;
        let relink = operations.last().unwrap();
        assert_eq!(relink.to_string(), "UPDATE rdm_drafts_files");
        assert_eq!(relink.data["id"], "df1");
        assert_eq!(relink.data["object_version_id"], "v2");
        assert_eq!(relink.data["version_id"], 2);

        let removal = run(&upload(3, "v3", None), &mut state, &mut db).await;
        assert_eq!(removal.last().unwrap().to_string(), "DELETE rdm_drafts_files");
        assert!(state.get_as::<FileRecordState>("df1").unwrap().is_none());
        assert_eq!(state.get(StateTable::FileRecords, "df1").unwrap()["deleted"], true);
    }

    #[tokio::test]
    async fn uploads_to_unknown_buckets_fail() {
        let mut state = StateStore::with_defaults(true);
        let mut db = MemoryDatabase::new();
        let mut load = FileUpload.transform(&upload(1, "v1", Some("f1"))).unwrap();
        let mut ctx = ActionContext {
            state: &mut state,
            session: &mut db,
        };

        let err = prepare(load.as_mut(), &mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingKey);
    }

    #[test]
    fn draft_changes_are_not_uploads() {
        let mut with_draft = upload(1, "v1", Some("f1"));
        with_draft
            .operations
            .extend(tx(1, vec![(CdcOp::Update, DRAFTS, json!({"id": "d1"}))]).operations);
        assert!(!FileUpload.matches(&with_draft));
    }
}

use etl::extract::TxFileExtract;
use etl::ids::PID_PK_MIN;
use etl::load::{SqlLoader, TxOutcome};
use etl::operation::Operation;
use etl::state::{CommunityState, ParentState, StateStore, StateTable};
use etl::stream::{EtlStream, RunnableStream};
use etl::test_utils::{MemoryDatabase, temp_dir, tx};
use etl::tx::TxTransform;
use etl::types::{CdcOp, Tx};
use rdm::actions;
use rdm::source::{COMMUNITIES, DRAFTS, FILE_INSTANCES, FILES, RECORDS, SESSIONS, USERS};
use serde_json::{Value, json};
use telemetry::tracing::init_test_tracing;

const CREATED: i64 = 1_577_836_800_000_000;
const RECORD_ID: &str = "2d69c6a1-0d9c-4a38-9b6e-6f8b2a1c0386";

/// Replays transactions through the dispatcher and the SQL loader into a memory database.
struct Replay {
    transform: TxTransform,
    loader: SqlLoader<MemoryDatabase>,
    db: MemoryDatabase,
    state: StateStore,
}

impl Replay {
    fn new() -> Self {
        init_test_tracing();
        let db = MemoryDatabase::new();
        Self {
            transform: TxTransform::new(actions::all()),
            loader: SqlLoader::new(db.clone()),
            db,
            state: StateStore::with_defaults(true),
        }
    }

    /// Loads `tx` and returns the name of the action that claimed it and the committed
    /// operations.
    async fn apply(&mut self, tx: &Tx) -> (&'static str, Vec<Operation>) {
        let already_committed = self.db.committed().await.len();
        let actions = self.transform.dispatch(tx).unwrap();
        let name = actions.actions[0].name();

        let outcome = self.loader.load_tx(actions, &mut self.state).await.unwrap();
        assert!(matches!(outcome, TxOutcome::Committed { .. }), "{outcome:?}");

        let committed = self.db.committed().await.split_off(already_committed);
        (name, committed)
    }
}

fn names(operations: &[Operation]) -> Vec<String> {
    operations.iter().map(ToString::to_string).collect()
}

fn record(id: &str, recid: &str) -> Value {
    json!({
        "id": id,
        "json": {"id": recid, "conceptrecid": "12345677", "metadata": {"title": "Data"}},
        "created": CREATED,
        "updated": CREATED,
        "version_id": 1
    })
}

fn first_publish() -> Tx {
    tx(
        1,
        vec![
            (CdcOp::Create, RECORDS, record(RECORD_ID, "12345678")),
            (CdcOp::Create, FILES, json!({"key": "data.zip", "created": CREATED})),
        ],
    )
}

#[tokio::test]
async fn first_publication_creates_parent_pids_and_record() {
    let mut replay = Replay::new();

    let (name, operations) = replay.apply(&first_publish()).await;

    assert_eq!(name, "record-publish-new");
    let names = names(&operations);
    assert_eq!(
        names[..7],
        [
            "INSERT rdm_parents_metadata",
            "INSERT pidstore_pid",
            "INSERT pidstore_pid",
            "INSERT pidstore_pid",
            "INSERT pidstore_pid",
            "INSERT rdm_records_metadata",
            "INSERT rdm_records_files",
        ]
    );
    // The versions state of the new parent is the only write past the publication itself.
    assert_eq!(names[7..], ["INSERT rdm_versions_state"]);
    let parent_id = operations[0].data["id"].clone();
    assert_eq!(operations[1].data["pid_value"], "12345677");
    assert!(operations[1].data["id"].as_i64().unwrap() >= PID_PK_MIN);
    assert_eq!(operations[2].data["pid_value"], "12345678");
    assert_eq!(operations[3].data["pid_value"], "10.5281/zenodo.12345678");
    assert_eq!(operations[5].data["parent_id"], parent_id);
    assert_eq!(operations[6].data["record_id"], RECORD_ID);

    assert_eq!(replay.state.len(StateTable::Parents), 1);
    assert_eq!(replay.state.len(StateTable::Records), 1);
    assert_eq!(replay.state.len(StateTable::Pids), 3);
    assert!(replay.db.row("rdm_records_metadata", RECORD_ID).await.is_some());
}

#[tokio::test]
async fn replaying_a_publication_changes_nothing() {
    let mut replay = Replay::new();
    replay.apply(&first_publish()).await;
    let max_pid_pk = replay.state.get(StateTable::Global, "max_pid_pk").cloned();
    let parent = replay.state.get_as::<ParentState>("12345677").unwrap();

    let (name, operations) = replay.apply(&first_publish()).await;

    assert_eq!(name, "record-publish-new");
    assert!(operations.is_empty());
    assert_eq!(replay.state.get(StateTable::Global, "max_pid_pk").cloned(), max_pid_pk);
    assert_eq!(replay.state.get_as::<ParentState>("12345677").unwrap(), parent);
    assert_eq!(replay.state.len(StateTable::Pids), 3);
}

#[tokio::test]
async fn new_version_reuses_the_parent() {
    let mut replay = Replay::new();
    replay.apply(&first_publish()).await;
    let parent = replay.state.get_as::<ParentState>("12345677").unwrap().unwrap();

    let mut second = record("r2", "12345679");
    second["index"] = json!(2);
    let (name, operations) = replay
        .apply(&tx(2, vec![(CdcOp::Create, RECORDS, second)]))
        .await;

    assert_eq!(name, "record-publish-new");
    let names = names(&operations);
    assert!(!names.contains(&"INSERT rdm_parents_metadata".to_string()));
    assert_eq!(names.iter().filter(|name| *name == "INSERT pidstore_pid").count(), 3);
    assert!(
        operations
            .iter()
            .all(|operation| operation.data.get("pid_value") != Some(&json!("12345677")))
    );

    let updated = replay.state.get_as::<ParentState>("12345677").unwrap().unwrap();
    assert_eq!(updated.id, parent.id);
    assert_eq!(updated.latest_id.as_deref(), Some("r2"));
    assert_eq!(updated.latest_index, Some(2));
    assert_eq!(replay.state.len(StateTable::Records), 2);

    let versions = replay.db.row("rdm_versions_state", &parent.id).await.unwrap();
    assert_eq!(versions["latest_id"], "r2");
    assert_eq!(versions["latest_index"], 2);
}

#[tokio::test]
async fn draft_of_a_published_record_reuses_its_pids() {
    let mut replay = Replay::new();
    replay.apply(&first_publish()).await;
    let parent = replay.state.get_as::<ParentState>("12345677").unwrap().unwrap();

    let draft = json!({
        "id": RECORD_ID,
        "json": {"id": "12345678", "conceptrecid": "12345677"},
        "created": CREATED,
        "updated": CREATED,
        "version_id": 1
    });
    let (name, operations) = replay
        .apply(&tx(2, vec![(CdcOp::Create, DRAFTS, draft)]))
        .await;

    assert_eq!(name, "draft-create");
    assert_eq!(
        names(&operations),
        vec!["INSERT rdm_drafts_metadata", "UPDATE rdm_versions_state"]
    );
    assert_eq!(operations[0].data["parent_id"], json!(parent.id));
    assert_eq!(operations[0].data["fork_version_id"], 1);
    assert_eq!(replay.state.len(StateTable::Pids), 3);

    let versions = replay.db.row("rdm_versions_state", &parent.id).await.unwrap();
    assert_eq!(versions["next_draft_id"], RECORD_ID);
    assert_eq!(versions["latest_id"], RECORD_ID);
}

#[tokio::test]
async fn community_logo_is_replaced_on_update() {
    let mut replay = Replay::new();
    let community = json!({
        "id": "c1",
        "slug": "biology",
        "owner_id": 7,
        "json": {"metadata": {"title": "Biology"}},
        "created": CREATED,
        "updated": CREATED
    });
    let logo = |id: &str| json!({"id": id, "uri": format!("/data/{id}"), "size": 42, "created": CREATED});

    let (name, operations) = replay
        .apply(&tx(
            1,
            vec![
                (CdcOp::Create, COMMUNITIES, community.clone()),
                (CdcOp::Create, FILE_INSTANCES, logo("f1")),
            ],
        ))
        .await;
    assert_eq!(name, "community-create");
    assert_eq!(operations.len(), 7);
    let first_head = replay
        .state
        .get_as::<CommunityState>("biology")
        .unwrap()
        .unwrap()
        .logo_object_version_id
        .unwrap();

    let (name, operations) = replay
        .apply(&tx(
            2,
            vec![
                (CdcOp::Update, COMMUNITIES, community),
                (CdcOp::Create, FILE_INSTANCES, logo("f2")),
            ],
        ))
        .await;

    assert_eq!(name, "community-update");
    assert_eq!(
        names(&operations),
        vec![
            "UPDATE communities_metadata",
            "INSERT files_files",
            "UPDATE files_object",
            "INSERT files_object",
            "UPDATE communities_files",
        ]
    );
    let old_head = replay.db.row("files_object", &first_head).await.unwrap();
    assert_eq!(old_head["is_head"], false);

    let new_head = operations[3].data["version_id"].as_str().unwrap().to_string();
    let tracked = replay.state.get_as::<CommunityState>("biology").unwrap().unwrap();
    assert_eq!(tracked.logo_object_version_id.as_deref(), Some(new_head.as_str()));
    assert_eq!(replay.db.row("files_object", &new_head).await.unwrap()["is_head"], true);
}

#[tokio::test]
async fn deleted_communities_stay_in_the_state() {
    let mut replay = Replay::new();
    let community = json!({
        "id": "c1",
        "slug": "biology",
        "owner_id": 7,
        "created": CREATED,
        "updated": CREATED
    });
    replay
        .apply(&tx(1, vec![(CdcOp::Create, COMMUNITIES, community.clone())]))
        .await;

    let (name, _) = replay
        .apply(&tx(2, vec![(CdcOp::Delete, COMMUNITIES, community)]))
        .await;

    assert_eq!(name, "community-delete");
    assert_eq!(replay.state.len(StateTable::Communities), 1);
    let row = replay.state.get(StateTable::Communities, "biology").unwrap();
    assert_eq!(row["deleted"], true);
    assert!(replay.state.get_as::<CommunityState>("biology").unwrap().is_none());
}

#[tokio::test]
async fn deactivation_deletes_every_session() {
    let mut replay = Replay::new();
    let user = json!({"id": 7, "email": "ada@example.org", "active": false, "created": CREATED, "updated": CREATED});

    let (name, operations) = replay
        .apply(&tx(
            1,
            vec![
                (CdcOp::Update, USERS, user),
                (CdcOp::Delete, SESSIONS, json!({"sid_s": "s1", "user_id": 7})),
                (CdcOp::Delete, SESSIONS, json!({"sid_s": "s2", "user_id": 7})),
            ],
        ))
        .await;

    assert_eq!(name, "user-deactivate");
    assert_eq!(
        names(&operations),
        vec![
            "UPDATE accounts_user",
            "DELETE accounts_user_session_activity",
            "DELETE accounts_user_session_activity",
        ]
    );
}

#[tokio::test]
async fn failed_statements_roll_back_the_whole_transaction() {
    let mut replay = Replay::new();
    replay.db.fail_on("rdm_records_metadata").await;

    let actions = replay.transform.dispatch(&first_publish()).unwrap();
    let outcome = replay.loader.load_tx(actions, &mut replay.state).await.unwrap();

    assert_eq!(outcome, TxOutcome::RolledBack);
    assert_eq!(replay.db.rollbacks().await, 1);
    assert!(replay.db.rows("rdm_parents_metadata").await.is_empty());
    assert!(replay.db.rows("pidstore_pid").await.is_empty());

    // The state forgets the publication too, so the transaction can be replayed.
    assert!(replay.state.is_empty(StateTable::Parents));
    assert!(replay.state.is_empty(StateTable::Pids));
    replay.db.clear_failures().await;
    let (_, operations) = replay.apply(&first_publish()).await;
    assert_eq!(operations.len(), 8);
}

#[tokio::test]
async fn change_feed_dump_is_replayed_in_order() {
    init_test_tracing();
    let dir = temp_dir("changes");
    let path = dir.join("changes.jsonl");
    let unclaimed = r#"{"id": 2, "operations": [{"op": "C", "source": {"table": "unknown_table"}, "after": {"id": 1}}]}"#;
    let lines = [
        serde_json::to_string(&first_publish()).unwrap(),
        unclaimed.to_string(),
        serde_json::to_string(&tx(3, vec![(CdcOp::Create, USERS, json!({"id": 7, "created": CREATED, "updated": CREATED}))]))
            .unwrap(),
    ];
    std::fs::write(&path, lines.join("\n")).unwrap();

    let db = MemoryDatabase::new();
    let stream = EtlStream::new(
        "changes",
        TxFileExtract::new(&path),
        TxTransform::new(actions::all()),
        SqlLoader::new(db.clone()),
    )
    .boxed();
    let mut state = StateStore::with_defaults(true);

    let summary = stream.run(&mut state).await.unwrap();

    assert_eq!(summary.loaded, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(db.commits().await, 2);
    assert!(db.row("accounts_user", "7").await.is_some());
    std::fs::remove_dir_all(dir).unwrap();
}

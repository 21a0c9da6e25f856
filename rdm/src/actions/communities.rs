use async_trait::async_trait;
use etl::error::{ErrorKind, EtlResult};
use etl::operation::Operation;
use etl::state::{CommunityState, StateStore, StateTable};
use etl::tx::{ActionContext, LoadAction, PkRule, TransformAction};
use etl::types::{CdcOp, Row, Tx, dict_get, row_from};
use etl::{bail, etl_error, typed_payload};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::actions::common::first_row;
use crate::models::{
    COMMUNITIES_FILES, COMMUNITIES_MEMBERS, COMMUNITIES_METADATA, FILES_BUCKET, FILES_FILES,
    FILES_OBJECT, OAISERVER_SET,
};
use crate::rows;
use crate::source::{self, COMMUNITIES, FILE_INSTANCES};

/// Object key of a community logo in the community bucket.
pub const LOGO_KEY: &str = "logo";

pub fn oai_set_spec(slug: &str) -> String {
    format!("community-{slug}")
}

pub fn oai_set_pattern(community_id: &str) -> String {
    format!("parent.communities.ids:{community_id}")
}

/// Returns the live community whose UUID is `id`.
fn community_by_id(state: &mut StateStore, id: &str) -> EtlResult<Option<CommunityState>> {
    Ok(state
        .search_as::<CommunityState>("id", &json!(id))?
        .into_iter()
        .next())
}

/// Returns the community image of the first `op` change of `tx`.
fn community_image(tx: &Tx, op: CdcOp) -> EtlResult<Row> {
    first_row(tx, op, COMMUNITIES)
        .ok_or_else(|| etl_error!(ErrorKind::MissingField, "Transaction has no community", tx.id))
}

/// Logo file instance of a community, with the keys of the rows linking it to the community.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoData {
    #[serde(flatten)]
    pub file: Row,
    pub object_version_id: Option<String>,
    pub community_file_id: Option<String>,
}

impl LogoData {
    fn from_tx(tx: &Tx) -> Option<Self> {
        first_row(tx, CdcOp::Create, FILE_INSTANCES).map(|file| Self {
            file,
            object_version_id: None,
            community_file_id: None,
        })
    }

    fn object_version_id(&self) -> EtlResult<&str> {
        self.object_version_id.as_deref().ok_or_else(|| {
            etl_error!(ErrorKind::MissingField, "Logo has no object version id")
        })
    }
}

/// Owner membership of a new community.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberData {
    pub id: Option<String>,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommunityCreateData {
    tx_id: i64,
    community: Row,
    member: MemberData,
    logo: Option<LogoData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommunityUpdateData {
    tx_id: i64,
    community: Row,
    logo: Option<LogoData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommunityDeleteData {
    tx_id: i64,
    community: Row,
}

fn title(community: &Row, slug: &str) -> String {
    dict_get(community, "json.metadata.title")
        .and_then(Value::as_str)
        .unwrap_or(slug)
        .to_string()
}

/// Rows of a new community, its OAI set and its owner membership.
pub struct CommunityRows {
    pub bucket: Row,
    pub community: Row,
    pub oai_set: Row,
    pub owner: Row,
}

impl CommunityRows {
    /// Builds the rows of `community`, whose `id`, `bucket_id`, `oai_set_id` and `owner_id`
    /// must be set. `member_id` is the UUID of the owner membership.
    pub fn build(community: &Row, member_id: &str) -> EtlResult<Self> {
        let id = rows::required_str(community, "id")?;
        let slug = rows::required_str(community, "slug")?;
        let bucket_id = rows::required_str(community, "bucket_id")?;
        let (created, updated) = rows::timestamps(community)?;
        let Some(oai_set_id) = community.get("oai_set_id").and_then(Value::as_i64) else {
            bail!(ErrorKind::MissingField, "Community has no OAI set id", id);
        };
        let Some(owner_id) = community.get("owner_id").and_then(Value::as_i64) else {
            bail!(ErrorKind::MissingField, "Community has no owner", id);
        };

        Ok(Self {
            bucket: rows::bucket(bucket_id, &created, &updated, false),
            community: row_from(json!({
                "id": id,
                "json": community.get("json").cloned().unwrap_or_else(|| json!({})),
                "created": created,
                "updated": updated,
                "version_id": community.get("version_id").and_then(Value::as_i64).unwrap_or(1),
                "slug": slug,
                "bucket_id": bucket_id,
                "deletion_status": "P",
            })),
            oai_set: row_from(json!({
                "id": oai_set_id,
                "spec": oai_set_spec(slug),
                "name": title(community, slug),
                "description": dict_get(community, "json.metadata.description"),
                "search_pattern": oai_set_pattern(id),
                "system_created": true,
                "created": created,
                "updated": updated,
            })),
            owner: row_from(json!({
                "id": member_id,
                "json": {},
                "created": created,
                "updated": updated,
                "version_id": 1,
                "community_id": id,
                "user_id": owner_id,
                "group_id": null,
                "role": "owner",
                "visible": true,
                "active": true,
            })),
        })
    }

    pub fn state(&self) -> EtlResult<CommunityState> {
        Ok(CommunityState {
            slug: rows::required_str(&self.community, "slug")?.to_string(),
            id: rows::required_str(&self.community, "id")?.to_string(),
            owner_id: self.owner.get("user_id").and_then(Value::as_i64).unwrap_or_default(),
            bucket_id: rows::required_str(&self.bucket, "id")?.to_string(),
            oai_set_id: self.oai_set.get("id").and_then(Value::as_i64).unwrap_or_default(),
            community_file_id: None,
            logo_object_version_id: None,
        })
    }
}

/// Rows of a community logo: its file instance, the head object version and the community
/// file linking them.
pub fn logo_rows(
    community_id: &str,
    bucket_id: &str,
    logo: &Row,
    object_version_id: &str,
    community_file_id: &str,
) -> EtlResult<(Row, Row, Row)> {
    let file_id = rows::required_str(logo, "id")?;
    let (created, updated) = rows::timestamps(logo)?;
    let mimetype = logo.get("mimetype").and_then(Value::as_str);

    Ok((
        rows::project(&FILES_FILES, logo),
        rows::object_version(
            object_version_id,
            bucket_id,
            LOGO_KEY,
            Some(file_id),
            mimetype,
            &created,
        ),
        rows::file_record(
            community_file_id,
            LOGO_KEY,
            community_id,
            Some(object_version_id),
            &created,
            &updated,
        ),
    ))
}

pub struct CommunityCreate;

impl TransformAction for CommunityCreate {
    fn name(&self) -> &'static str {
        "community-create"
    }

    fn matches(&self, tx: &Tx) -> bool {
        tx.has(CdcOp::Create, COMMUNITIES)
    }

    fn transform(&self, tx: &Tx) -> EtlResult<Box<dyn LoadAction>> {
        let tx = source::normalize(tx)?;
        let community = community_image(&tx, CdcOp::Create)?;
        let member = MemberData {
            id: None,
            user_id: community.get("owner_id").and_then(Value::as_i64),
        };

        Ok(Box::new(CommunityCreateLoad {
            data: CommunityCreateData {
                tx_id: tx.id,
                community,
                member,
                logo: LogoData::from_tx(&tx),
            },
        }))
    }
}

#[derive(Debug)]
struct CommunityCreateLoad {
    data: CommunityCreateData,
}

#[async_trait]
impl LoadAction for CommunityCreateLoad {
    fn name(&self) -> &'static str {
        "community-create"
    }

    typed_payload!(data);

    fn pks(&self) -> Vec<PkRule> {
        vec![
            PkRule::uuid("community.id"),
            PkRule::uuid("community.bucket_id"),
            PkRule::pid_pk("community.oai_set_id"),
            PkRule::uuid("member.id"),
            PkRule::uuid("logo.object_version_id"),
            PkRule::uuid("logo.community_file_id"),
        ]
    }

    fn already_applied(&self, state: &mut StateStore) -> EtlResult<bool> {
        let community = &self.data.community;
        let (Some(slug), Some(id)) = (
            community.get("slug").and_then(Value::as_str),
            community.get("id").and_then(Value::as_str),
        ) else {
            return Ok(false);
        };

        Ok(state
            .get_as::<CommunityState>(slug)?
            .is_some_and(|tracked| tracked.id == id))
    }

    async fn generate_rows(&mut self, ctx: &mut ActionContext<'_>) -> EtlResult<Vec<Operation>> {
        let Some(member_id) = self.data.member.id.as_deref() else {
            bail!(ErrorKind::MissingField, "Community owner membership has no id");
        };
        let built = CommunityRows::build(&self.data.community, member_id)?;
        let mut state = built.state()?;

        let mut operations = vec![
            Operation::insert(&FILES_BUCKET, built.bucket),
            Operation::insert(&COMMUNITIES_METADATA, built.community),
            Operation::insert(&OAISERVER_SET, built.oai_set),
            Operation::insert(&COMMUNITIES_MEMBERS, built.owner),
        ];

        if let Some(logo) = &self.data.logo {
            let object_version_id = logo.object_version_id()?;
            let Some(community_file_id) = logo.community_file_id.as_deref() else {
                bail!(ErrorKind::MissingField, "Logo has no community file id");
            };
            let (instance, object_version, file) = logo_rows(
                &state.id,
                &state.bucket_id,
                &logo.file,
                object_version_id,
                community_file_id,
            )?;
            operations.push(Operation::insert(&FILES_FILES, instance));
            operations.push(Operation::insert(&FILES_OBJECT, object_version));
            operations.push(Operation::insert(&COMMUNITIES_FILES, file));
            state.logo_object_version_id = Some(object_version_id.to_string());
            state.community_file_id = Some(community_file_id.to_string());
        }

        info!(slug = %state.slug, id = %state.id, "created community");
        ctx.state.add_as(&state)?;
        Ok(operations)
    }
}

pub struct CommunityUpdate;

impl TransformAction for CommunityUpdate {
    fn name(&self) -> &'static str {
        "community-update"
    }

    fn matches(&self, tx: &Tx) -> bool {
        tx.has(CdcOp::Update, COMMUNITIES)
    }

    fn transform(&self, tx: &Tx) -> EtlResult<Box<dyn LoadAction>> {
        let tx = source::normalize(tx)?;

        Ok(Box::new(CommunityUpdateLoad {
            data: CommunityUpdateData {
                tx_id: tx.id,
                community: community_image(&tx, CdcOp::Update)?,
                logo: LogoData::from_tx(&tx),
            },
        }))
    }
}

#[derive(Debug)]
struct CommunityUpdateLoad {
    data: CommunityUpdateData,
}

#[async_trait]
impl LoadAction for CommunityUpdateLoad {
    fn name(&self) -> &'static str {
        "community-update"
    }

    typed_payload!(data);

    fn pks(&self) -> Vec<PkRule> {
        vec![
            PkRule::uuid("logo.object_version_id"),
            PkRule::uuid("logo.community_file_id"),
        ]
    }

    async fn generate_rows(&mut self, ctx: &mut ActionContext<'_>) -> EtlResult<Vec<Operation>> {
        let community = &self.data.community;
        let id = rows::required_str(community, "id")?;
        let (_, updated) = rows::timestamps(community)?;
        let Some(previous) = community_by_id(ctx.state, id)? else {
            bail!(ErrorKind::MissingKey, "Updated community is not in the state", id);
        };
        let slug = community
            .get("slug")
            .and_then(Value::as_str)
            .unwrap_or(&previous.slug)
            .to_string();

        let mut row = row_from(json!({"id": id, "slug": slug, "updated": updated}));
        for column in ["json", "version_id", "deletion_status"] {
            if let Some(value) = community.get(column) {
                row.insert(column.to_string(), value.clone());
            }
        }
        let mut operations = vec![Operation::update(&COMMUNITIES_METADATA, row)];

        if slug != previous.slug {
            operations.push(Operation::update(
                &OAISERVER_SET,
                row_from(json!({
                    "id": previous.oai_set_id,
                    "spec": oai_set_spec(&slug),
                    "name": title(community, &slug),
                    "updated": updated,
                })),
            ));
        }

        let mut next = CommunityState {
            slug: slug.clone(),
            ..previous.clone()
        };

        if let Some(logo) = &self.data.logo {
            let object_version_id = logo.object_version_id()?;
            let community_file_id = match (&previous.community_file_id, &logo.community_file_id) {
                (Some(existing), _) | (None, Some(existing)) => existing.clone(),
                (None, None) => bail!(ErrorKind::MissingField, "Logo has no community file id", id),
            };
            let (instance, object_version, file) = logo_rows(
                id,
                &previous.bucket_id,
                &logo.file,
                object_version_id,
                &community_file_id,
            )?;

            operations.push(Operation::insert(&FILES_FILES, instance));
            if let Some(replaced) = &previous.logo_object_version_id {
                operations.push(Operation::update(
                    &FILES_OBJECT,
                    row_from(json!({"version_id": replaced, "is_head": false, "updated": updated})),
                ));
            }
            operations.push(Operation::insert(&FILES_OBJECT, object_version));
            if previous.community_file_id.is_some() {
                operations.push(Operation::update(
                    &COMMUNITIES_FILES,
                    row_from(json!({
                        "id": community_file_id,
                        "object_version_id": object_version_id,
                        "updated": updated,
                    })),
                ));
            } else {
                operations.push(Operation::insert(&COMMUNITIES_FILES, file));
            }

            debug!(%slug, object_version_id, "replaced community logo");
            next.logo_object_version_id = Some(object_version_id.to_string());
            next.community_file_id = Some(community_file_id);
        }

        if slug != previous.slug {
            // The row under the old slug stays, marked deleted.
            ctx.state.discard(StateTable::Communities, &previous.slug);
            ctx.state.add_as(&next)?;
        } else {
            ctx.state.put_as(&next)?;
        }

        Ok(operations)
    }
}

pub struct CommunityDelete;

impl TransformAction for CommunityDelete {
    fn name(&self) -> &'static str {
        "community-delete"
    }

    fn matches(&self, tx: &Tx) -> bool {
        tx.has(CdcOp::Delete, COMMUNITIES)
    }

    fn transform(&self, tx: &Tx) -> EtlResult<Box<dyn LoadAction>> {
        let tx = source::normalize(tx)?;

        Ok(Box::new(CommunityDeleteLoad {
            data: CommunityDeleteData {
                tx_id: tx.id,
                community: community_image(&tx, CdcOp::Delete)?,
            },
        }))
    }
}

#[derive(Debug)]
struct CommunityDeleteLoad {
    data: CommunityDeleteData,
}

#[async_trait]
impl LoadAction for CommunityDeleteLoad {
    fn name(&self) -> &'static str {
        "community-delete"
    }

    typed_payload!(data);

    async fn generate_rows(&mut self, ctx: &mut ActionContext<'_>) -> EtlResult<Vec<Operation>> {
        let community = &self.data.community;
        let id = rows::required_str(community, "id")?;
        let updated = rows::timestamps(community)
            .map(|(_, updated)| updated)
            .unwrap_or_default();
        let Some(tracked) = community_by_id(ctx.state, id)? else {
            bail!(ErrorKind::MissingKey, "Deleted community is not in the state", id);
        };

        let mut operations = vec![
            Operation::update(
                &COMMUNITIES_METADATA,
                row_from(json!({
                    "id": id,
                    "json": null,
                    "deletion_status": "D",
                    "updated": updated,
                })),
            ),
            Operation::delete(&OAISERVER_SET, row_from(json!({"id": tracked.oai_set_id}))),
        ];
        if let Some(file_id) = &tracked.community_file_id {
            operations.push(Operation::delete(&COMMUNITIES_FILES, row_from(json!({"id": file_id}))));
        }
        if let Some(version_id) = &tracked.logo_object_version_id {
            operations.push(Operation::delete(
                &FILES_OBJECT,
                row_from(json!({"version_id": version_id})),
            ));
        }

        ctx.state.discard(StateTable::Communities, &tracked.slug);
        info!(slug = %tracked.slug, "deleted community");
        Ok(operations)
    }
}

#[cfg(test)]
mod tests {
    use etl::ids::PID_PK_MIN;
    use etl::test_utils::{MemoryDatabase, tx};
    use etl::tx::prepare;

    use super::*;

    const CREATED: i64 = 1_577_836_800_000_000;

    fn community(slug: &str) -> Value {
        json!({
            "id": "c1",
            "slug": slug,
            "owner_id": 7,
            "json": {"metadata": {"title": "Biology"}},
            "created": CREATED,
            "updated": CREATED
        })
    }

    fn logo(id: &str) -> Value {
        json!({"id": id, "uri": format!("/data/{id}"), "size": 42, "created": CREATED})
    }

    async fn run(action: &dyn TransformAction, tx: &Tx, state: &mut StateStore) -> Vec<Operation> {
        assert!(action.matches(tx));
        let mut load = action.transform(tx).unwrap();
        let mut db = MemoryDatabase::new();
        let mut ctx = ActionContext {
            state,
            session: &mut db,
        };
        prepare(load.as_mut(), &mut ctx).await.unwrap()
    }

    fn names(operations: &[Operation]) -> Vec<String> {
        operations.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn creation_with_a_logo() {
        let mut state = StateStore::with_defaults(true);
        let create = tx(
            1,
            vec![
                (CdcOp::Create, COMMUNITIES, community("biology")),
                (CdcOp::Create, FILE_INSTANCES, logo("f1")),
            ],
        );

        let operations = run(&CommunityCreate, &create, &mut state).await;

        assert_eq!(
            names(&operations),
            vec![
                "INSERT files_bucket",
                "INSERT communities_metadata",
                "INSERT oaiserver_set",
                "INSERT communities_members",
                "INSERT files_files",
                "INSERT files_object",
                "INSERT communities_files",
            ]
        );
        let oai_set = &operations[2].data;
        assert_eq!(oai_set["id"], json!(PID_PK_MIN));
        assert_eq!(oai_set["spec"], "community-biology");
        assert_eq!(oai_set["name"], "Biology");
        assert_eq!(oai_set["search_pattern"], "parent.communities.ids:c1");
        assert_eq!(operations[3].data["role"], "owner");
        assert_eq!(operations[3].data["user_id"], 7);
        assert_eq!(operations[5].data["key"], LOGO_KEY);
        assert_eq!(operations[5].data["bucket_id"], operations[0].data["id"]);

        let tracked = state.get_as::<CommunityState>("biology").unwrap().unwrap();
        assert_eq!(tracked.id, "c1");
        assert_eq!(tracked.oai_set_id, PID_PK_MIN);
        assert_eq!(
            tracked.logo_object_version_id.as_deref(),
            operations[5].data["version_id"].as_str()
        );
    }

    #[tokio::test]
    async fn a_new_logo_replaces_the_head() {
        let mut state = StateStore::with_defaults(true);
        let create = tx(
            1,
            vec![
                (CdcOp::Create, COMMUNITIES, community("biology")),
                (CdcOp::Create, FILE_INSTANCES, logo("f1")),
            ],
        );
        run(&CommunityCreate, &create, &mut state).await;
        let before = state.get_as::<CommunityState>("biology").unwrap().unwrap();

        let update = tx(
            2,
            vec![
                (CdcOp::Update, COMMUNITIES, community("biology")),
                (CdcOp::Create, FILE_INSTANCES, logo("f2")),
            ],
        );
        let operations = run(&CommunityUpdate, &update, &mut state).await;

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
        assert_eq!(
            operations[2].data["version_id"].as_str(),
            before.logo_object_version_id.as_deref()
        );
        assert_eq!(operations[2].data["is_head"], false);
        let new_head = operations[3].data["version_id"].clone();
        assert_eq!(operations[4].data["object_version_id"], new_head);

        let after = state.get_as::<CommunityState>("biology").unwrap().unwrap();
        assert_eq!(after.logo_object_version_id.as_deref(), new_head.as_str());
        assert_eq!(after.community_file_id, before.community_file_id);
    }

    #[tokio::test]
    async fn renaming_moves_the_state_row() {
        let mut state = StateStore::with_defaults(true);
        run(
            &CommunityCreate,
            &tx(1, vec![(CdcOp::Create, COMMUNITIES, community("biology"))]),
            &mut state,
        )
        .await;

        let operations = run(
            &CommunityUpdate,
            &tx(2, vec![(CdcOp::Update, COMMUNITIES, community("life-sciences"))]),
            &mut state,
        )
        .await;

        assert_eq!(
            names(&operations),
            vec!["UPDATE communities_metadata", "UPDATE oaiserver_set"]
        );
        assert_eq!(operations[1].data["spec"], "community-life-sciences");
        assert!(state.get_as::<CommunityState>("biology").unwrap().is_none());
        assert_eq!(
            state.get(StateTable::Communities, "biology").unwrap()["deleted"],
            true
        );
        let renamed = state.get_as::<CommunityState>("life-sciences").unwrap().unwrap();
        assert_eq!(renamed.id, "c1");

        // Later changes on the community resolve to the renamed row.
        let operations = run(
            &CommunityUpdate,
            &tx(3, vec![(CdcOp::Update, COMMUNITIES, community("life-sciences"))]),
            &mut state,
        )
        .await;
        assert_eq!(names(&operations), vec!["UPDATE communities_metadata"]);
    }

    #[tokio::test]
    async fn deletion_is_soft_for_the_community_only() {
        let mut state = StateStore::with_defaults(true);
        run(
            &CommunityCreate,
            &tx(
                1,
                vec![
                    (CdcOp::Create, COMMUNITIES, community("biology")),
                    (CdcOp::Create, FILE_INSTANCES, logo("f1")),
                ],
            ),
            &mut state,
        )
        .await;

        let operations = run(
            &CommunityDelete,
            &tx(2, vec![(CdcOp::Delete, COMMUNITIES, community("biology"))]),
            &mut state,
        )
        .await;

        assert_eq!(
            names(&operations),
            vec![
                "UPDATE communities_metadata",
                "DELETE oaiserver_set",
                "DELETE communities_files",
                "DELETE files_object",
            ]
        );
        assert_eq!(operations[0].data["json"], Value::Null);
        assert_eq!(operations[0].data["deletion_status"], "D");

        let row = state.get(StateTable::Communities, "biology").unwrap();
        assert_eq!(row["deleted"], true);
        assert_eq!(row["id"], "c1");
        assert_eq!(state.len(StateTable::Communities), 1);
        assert!(state.get_as::<CommunityState>("biology").unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_twice_fails_without_touching_the_row() {
        let mut state = StateStore::with_defaults(true);
        run(
            &CommunityCreate,
            &tx(1, vec![(CdcOp::Create, COMMUNITIES, community("biology"))]),
            &mut state,
        )
        .await;
        let delete = tx(2, vec![(CdcOp::Delete, COMMUNITIES, community("biology"))]);
        run(&CommunityDelete, &delete, &mut state).await;
        let deleted = state.get(StateTable::Communities, "biology").cloned();

        let mut load = CommunityDelete.transform(&delete).unwrap();
        let mut db = MemoryDatabase::new();
        let mut ctx = ActionContext {
            state: &mut state,
            session: &mut db,
        };
        let err = prepare(load.as_mut(), &mut ctx).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MissingKey);
        assert_eq!(state.get(StateTable::Communities, "biology").cloned(), deleted);
    }

    #[tokio::test]
    async fn creating_again_is_a_no_op() {
        let mut state = StateStore::with_defaults(true);
        let create = tx(
            1,
            vec![
                (CdcOp::Create, COMMUNITIES, community("biology")),
                (CdcOp::Create, FILE_INSTANCES, logo("f1")),
            ],
        );
        run(&CommunityCreate, &create, &mut state).await;
        let tracked = state.get_as::<CommunityState>("biology").unwrap();
        let max_pid_pk = state.get(StateTable::Global, "max_pid_pk").cloned();

        let operations = run(&CommunityCreate, &create, &mut state).await;

        assert!(operations.is_empty());
        assert_eq!(state.get_as::<CommunityState>("biology").unwrap(), tracked);
        assert_eq!(state.get(StateTable::Global, "max_pid_pk").cloned(), max_pid_pk);
    }
}

use etl::error::EtlResult;
use etl::ids::{pid_pk, uuid};
use etl::load::bulk::{TableGenerator, TableRow};
use etl::state::StateStore;
use etl::types::{Entry, Row};
use postgres::schema::TableModel;
use serde_json::{Value, json};
use tracing::debug;

use crate::actions::communities::{CommunityRows, logo_rows};
use crate::generators::{object, required_object};
use crate::models::{
    COMMUNITIES_FILES, COMMUNITIES_MEMBERS, COMMUNITIES_METADATA, FILES_BUCKET, FILES_FILES,
    FILES_OBJECT, OAISERVER_SET,
};

/// Communities with their bucket, OAI set, owner membership and logo.
#[derive(Debug, Default)]
pub struct CommunitiesGenerator;

impl CommunitiesGenerator {
    pub fn new() -> Self {
        Self
    }
}

/// Sets `column` with `value` when the source leaves it empty.
fn fill(
    community: &mut Row,
    column: &str,
    value: impl FnOnce() -> EtlResult<Value>,
) -> EtlResult<()> {
    if community.get(column).is_none_or(Value::is_null) {
        community.insert(column.to_string(), value()?);
    }
    Ok(())
}

impl TableGenerator for CommunitiesGenerator {
    fn name(&self) -> &'static str {
        "communities"
    }

    fn tables(&self) -> Vec<&'static TableModel> {
        vec![
            &FILES_BUCKET,
            &FILES_FILES,
            &FILES_OBJECT,
            &COMMUNITIES_METADATA,
            &OAISERVER_SET,
            &COMMUNITIES_MEMBERS,
            &COMMUNITIES_FILES,
        ]
    }

    fn generate(&mut self, entry: &Entry, state: &mut StateStore) -> EtlResult<Vec<TableRow>> {
        let mut community = required_object(entry, "community")?;
        fill(&mut community, "id", || Ok(json!(uuid())))?;
        fill(&mut community, "bucket_id", || Ok(json!(uuid())))?;
        fill(&mut community, "oai_set_id", || Ok(json!(pid_pk(state)?)))?;

        let built = CommunityRows::build(&community, &uuid())?;
        let mut tracked = built.state()?;
        let mut rows = vec![
            TableRow::new(&FILES_BUCKET, built.bucket),
            TableRow::new(&COMMUNITIES_METADATA, built.community),
            TableRow::new(&OAISERVER_SET, built.oai_set),
            TableRow::new(&COMMUNITIES_MEMBERS, built.owner),
        ];

        if let Some(logo) = object(entry, "logo") {
            let object_version_id = uuid();
            let community_file_id = uuid();
            let (instance, object_version, file) = logo_rows(
                &tracked.id,
                &tracked.bucket_id,
                &logo,
                &object_version_id,
                &community_file_id,
            )?;
            rows.push(TableRow::new(&FILES_FILES, instance));
            rows.push(TableRow::new(&FILES_OBJECT, object_version));
            rows.push(TableRow::new(&COMMUNITIES_FILES, file));
            tracked.logo_object_version_id = Some(object_version_id);
            tracked.community_file_id = Some(community_file_id);
        }

        debug!(slug = %tracked.slug, "generated community");
        state.add_as(&tracked)?;
        Ok(rows)
    }
}

//! Target tables of the InvenioRDM schema written by actions and table generators.
//!
//! Column lists follow the target DDL; a column that rows may leave out carries the text
//! default used when staging CSV files.

mod communities;
mod files;
mod github;
mod oauth;
mod pids;
mod records;
mod users;

pub use communities::{COMMUNITIES_FILES, COMMUNITIES_MEMBERS, COMMUNITIES_METADATA, OAISERVER_SET};
pub use files::{FILES_BUCKET, FILES_FILES, FILES_OBJECT};
pub use github::{GITHUB_RELEASES, GITHUB_REPOSITORIES, WEBHOOKS_EVENTS};
pub use oauth::{
    OAUTH2SERVER_CLIENT, OAUTH2SERVER_TOKEN, OAUTHCLIENT_REMOTEACCOUNT, OAUTHCLIENT_REMOTETOKEN,
};
pub use pids::PIDSTORE_PID;
pub use records::{
    RDM_DRAFTS_FILES, RDM_DRAFTS_METADATA, RDM_PARENTS_COMMUNITY, RDM_PARENTS_METADATA,
    RDM_RECORDS_FILES, RDM_RECORDS_METADATA, RDM_VERSIONS_STATE,
};
pub use users::{
    ACCOUNTS_USER, ACCOUNTS_USER_LOGIN_INFORMATION, ACCOUNTS_USER_SESSION_ACTIVITY,
    ACCOUNTS_USERIDENTITY,
};

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use postgres::schema::TableModel;

    use super::*;

    fn all() -> Vec<&'static TableModel> {
        vec![
            &RDM_PARENTS_METADATA,
            &RDM_RECORDS_METADATA,
            &RDM_DRAFTS_METADATA,
            &RDM_VERSIONS_STATE,
            &RDM_RECORDS_FILES,
            &RDM_DRAFTS_FILES,
            &RDM_PARENTS_COMMUNITY,
            &PIDSTORE_PID,
            &FILES_BUCKET,
            &FILES_OBJECT,
            &FILES_FILES,
            &COMMUNITIES_METADATA,
            &COMMUNITIES_MEMBERS,
            &COMMUNITIES_FILES,
            &OAISERVER_SET,
            &ACCOUNTS_USER,
            &ACCOUNTS_USER_LOGIN_INFORMATION,
            &ACCOUNTS_USER_SESSION_ACTIVITY,
            &ACCOUNTS_USERIDENTITY,
            &OAUTH2SERVER_CLIENT,
            &OAUTH2SERVER_TOKEN,
            &OAUTHCLIENT_REMOTEACCOUNT,
            &OAUTHCLIENT_REMOTETOKEN,
            &GITHUB_REPOSITORIES,
            &GITHUB_RELEASES,
            &WEBHOOKS_EVENTS,
        ]
    }

    #[test]
    fn every_table_has_a_primary_key_and_unique_columns() {
        let models = all();
        let names = models.iter().map(|model| model.name).collect::<HashSet<_>>();
        assert_eq!(names.len(), models.len());

        for model in models {
            assert!(model.primary_key().count() > 0, "{model} has no primary key");
            let columns = model.column_names().collect::<HashSet<_>>();
            assert_eq!(columns.len(), model.columns.len(), "{model} repeats a column");
        }
    }
}

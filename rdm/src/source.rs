//! Source tables of the change feed and the normalization applied to their row images.

use std::sync::LazyLock;

use etl::error::EtlResult;
use etl::transform::{DateTimeFields, JsonFields};
use etl::tx::TxRowGenerator;
use etl::types::{Row, Tx, TxOperation};

use crate::models;

pub const DRAFTS: &str = "drafts";
pub const RECORDS: &str = "records";
pub const FILES: &str = "files";
pub const BUCKETS: &str = "buckets";
pub const OBJECT_VERSIONS: &str = "object_versions";
pub const FILE_INSTANCES: &str = "file_instances";
pub const COMMUNITIES: &str = "communities";
pub const USERS: &str = "users";
pub const USER_LOGIN_INFORMATION: &str = "user_login_information";
pub const SESSIONS: &str = "sessions";
pub const USER_IDENTITIES: &str = "user_identities";
pub const OAUTH_CLIENTS: &str = "oauth_clients";
pub const OAUTH_TOKENS: &str = "oauth_tokens";
pub const REMOTE_ACCOUNTS: &str = "remote_accounts";
pub const REMOTE_TOKENS: &str = "remote_tokens";
pub const WEBHOOK_EVENTS: &str = "webhook_events";
pub const GITHUB_REPOSITORIES: &str = "github_repositories";
pub const GITHUB_RELEASES: &str = "github_releases";

/// Columns holding integer timestamps in the change feed.
const DATETIME_COLUMNS: [&str; 11] = [
    "created",
    "updated",
    "expires_at",
    "expires",
    "confirmed_at",
    "blocked_at",
    "verified_at",
    "last_login_at",
    "current_login_at",
    "last_check_at",
    "deleted_at",
];

/// Columns holding JSON documents encoded as strings in the change feed.
const JSON_COLUMNS: [&str; 9] = [
    "json",
    "extra_data",
    "payload",
    "payload_headers",
    "response",
    "response_headers",
    "errors",
    "profile",
    "preferences",
];

static DATETIMES: LazyLock<DateTimeFields> = LazyLock::new(|| DateTimeFields::new(DATETIME_COLUMNS));
static DOCUMENTS: LazyLock<JsonFields> = LazyLock::new(|| JsonFields::new(JSON_COLUMNS));

/// Source tables replayed one to one onto a target table.
static ROWS: LazyLock<TxRowGenerator> = LazyLock::new(|| {
    TxRowGenerator::new()
        .register(BUCKETS, &models::FILES_BUCKET)
        .register(OBJECT_VERSIONS, &models::FILES_OBJECT)
        .register(FILE_INSTANCES, &models::FILES_FILES)
        .register(USERS, &models::ACCOUNTS_USER)
        .register(USER_LOGIN_INFORMATION, &models::ACCOUNTS_USER_LOGIN_INFORMATION)
        .register(SESSIONS, &models::ACCOUNTS_USER_SESSION_ACTIVITY)
        .register(USER_IDENTITIES, &models::ACCOUNTS_USERIDENTITY)
        .register(OAUTH_CLIENTS, &models::OAUTH2SERVER_CLIENT)
        .register(OAUTH_TOKENS, &models::OAUTH2SERVER_TOKEN)
        .register(REMOTE_ACCOUNTS, &models::OAUTHCLIENT_REMOTEACCOUNT)
        .register(REMOTE_TOKENS, &models::OAUTHCLIENT_REMOTETOKEN)
        .register(WEBHOOK_EVENTS, &models::WEBHOOKS_EVENTS)
        .register(GITHUB_REPOSITORIES, &models::GITHUB_REPOSITORIES)
        .register(GITHUB_RELEASES, &models::GITHUB_RELEASES)
});

pub fn rows() -> &'static TxRowGenerator {
    &ROWS
}

/// Converts the timestamps of `row` to ISO-8601 and parses its JSON documents.
pub fn normalize_row(row: &mut Row) -> EtlResult<()> {
    DATETIMES.apply(row)?;
    DOCUMENTS.apply(row)
}

/// Returns a copy of `tx` whose row images are normalized.
pub fn normalize(tx: &Tx) -> EtlResult<Tx> {
    let mut normalized = tx.clone();
    for operation in normalized.operations.iter_mut() {
        normalize_operation(operation)?;
    }
    Ok(normalized)
}

fn normalize_operation(operation: &mut TxOperation) -> EtlResult<()> {
    for image in [operation.before.as_mut(), operation.after.as_mut()]
        .into_iter()
        .flatten()
    {
        normalize_row(image)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use etl::types::{CdcOp, row_from};
    use serde_json::json;

    use super::*;

    #[test]
    fn images_are_normalized() {
        let tx = Tx::new(
            1,
            vec![TxOperation::new(
                CdcOp::Update,
                USERS,
                Some(row_from(json!({"created": 1_577_836_800_000_000_i64}))),
                Some(row_from(json!({
                    "created": 1_577_836_800_000_000_i64,
                    "updated": "2020-01-02T00:00:00",
                    "profile": "{\"full_name\": \"Jane\"}"
                }))),
            )],
        );

        let normalized = normalize(&tx).unwrap();
        let operation = &normalized.operations[0];
        let after = operation.after.as_ref().unwrap();
        assert_eq!(after["created"], json!("2020-01-01T00:00:00"));
        assert_eq!(after["updated"], json!("2020-01-02T00:00:00"));
        assert_eq!(after["profile"], json!({"full_name": "Jane"}));
        assert_eq!(
            operation.before.as_ref().unwrap()["created"],
            json!("2020-01-01T00:00:00")
        );
    }

    #[test]
    fn pass_through_tables_are_registered() {
        assert_eq!(rows().model(SESSIONS).unwrap().name, "accounts_user_session_activity");
        assert!(rows().model(RECORDS).is_err());
    }
}

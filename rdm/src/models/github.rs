use postgres::schema::{ColumnSchema, ColumnType, TableModel};

pub static GITHUB_REPOSITORIES: TableModel = TableModel::new(
    "github_repositories",
    &[
        ColumnSchema::new("id", ColumnType::Uuid).primary_key(),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
        ColumnSchema::new("github_id", ColumnType::Integer).nullable(),
        ColumnSchema::new("name", ColumnType::String),
        ColumnSchema::new("user_id", ColumnType::Integer).nullable(),
        ColumnSchema::new("hook", ColumnType::Integer).nullable(),
    ],
);

pub static GITHUB_RELEASES: TableModel = TableModel::new(
    "github_releases",
    &[
        ColumnSchema::new("id", ColumnType::Uuid).primary_key(),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
        ColumnSchema::new("release_id", ColumnType::Integer).nullable(),
        ColumnSchema::new("tag", ColumnType::String).nullable(),
        ColumnSchema::new("errors", ColumnType::Json).nullable(),
        ColumnSchema::new("repository_id", ColumnType::Uuid).nullable(),
        ColumnSchema::new("event_id", ColumnType::Uuid).nullable(),
        ColumnSchema::new("record_id", ColumnType::Uuid).nullable(),
        ColumnSchema::new("status", ColumnType::String),
    ],
);

pub static WEBHOOKS_EVENTS: TableModel = TableModel::new(
    "webhooks_events",
    &[
        ColumnSchema::new("id", ColumnType::Uuid).primary_key(),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
        ColumnSchema::new("receiver_id", ColumnType::String),
        ColumnSchema::new("user_id", ColumnType::Integer).nullable(),
        ColumnSchema::new("payload", ColumnType::Json).nullable(),
        ColumnSchema::new("payload_headers", ColumnType::Json).nullable(),
        ColumnSchema::new("response", ColumnType::Json).nullable(),
        ColumnSchema::new("response_headers", ColumnType::Json).nullable(),
        ColumnSchema::new("response_code", ColumnType::Integer).nullable(),
    ],
);

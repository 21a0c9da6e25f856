use postgres::schema::{ColumnSchema, ColumnType, TableModel};

pub static OAUTH2SERVER_CLIENT: TableModel = TableModel::new(
    "oauth2server_client",
    &[
        ColumnSchema::new("client_id", ColumnType::String).primary_key(),
        ColumnSchema::new("name", ColumnType::String).nullable(),
        ColumnSchema::new("description", ColumnType::String).nullable(),
        ColumnSchema::new("website", ColumnType::String).nullable(),
        ColumnSchema::new("user_id", ColumnType::Integer).nullable(),
        ColumnSchema::new("client_secret", ColumnType::String),
        ColumnSchema::new("is_confidential", ColumnType::Boolean).with_default("true"),
        ColumnSchema::new("is_internal", ColumnType::Boolean).with_default("false"),
        ColumnSchema::new("_redirect_uris", ColumnType::String).nullable(),
        ColumnSchema::new("_default_scopes", ColumnType::String).nullable(),
    ],
);

/// Tokens are stored encrypted under the instance secret key.
pub static OAUTH2SERVER_TOKEN: TableModel = TableModel::new(
    "oauth2server_token",
    &[
        ColumnSchema::new("id", ColumnType::Integer).primary_key(),
        ColumnSchema::new("client_id", ColumnType::String),
        ColumnSchema::new("user_id", ColumnType::Integer).nullable(),
        ColumnSchema::new("token_type", ColumnType::String).nullable(),
        ColumnSchema::new("access_token", ColumnType::String),
        ColumnSchema::new("refresh_token", ColumnType::String).nullable(),
        ColumnSchema::new("expires", ColumnType::DateTime).nullable(),
        ColumnSchema::new("_scopes", ColumnType::String).nullable(),
        ColumnSchema::new("is_personal", ColumnType::Boolean).with_default("false"),
        ColumnSchema::new("is_internal", ColumnType::Boolean).with_default("false"),
    ],
);

pub static OAUTHCLIENT_REMOTEACCOUNT: TableModel = TableModel::new(
    "oauthclient_remoteaccount",
    &[
        ColumnSchema::new("id", ColumnType::Integer).primary_key(),
        ColumnSchema::new("user_id", ColumnType::Integer),
        ColumnSchema::new("client_id", ColumnType::String),
        ColumnSchema::new("extra_data", ColumnType::Json).with_default("{}"),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
    ],
);

pub static OAUTHCLIENT_REMOTETOKEN: TableModel = TableModel::new(
    "oauthclient_remotetoken",
    &[
        ColumnSchema::new("id_remote_account", ColumnType::Integer).primary_key(),
        ColumnSchema::new("token_type", ColumnType::String).primary_key(),
        ColumnSchema::new("access_token", ColumnType::String),
        ColumnSchema::new("secret", ColumnType::String).with_default(""),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
    ],
);

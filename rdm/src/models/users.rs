use postgres::schema::{ColumnSchema, ColumnType, TableModel};

pub static ACCOUNTS_USER: TableModel = TableModel::new(
    "accounts_user",
    &[
        ColumnSchema::new("id", ColumnType::Integer).primary_key(),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
        ColumnSchema::new("username", ColumnType::String).nullable(),
        ColumnSchema::new("displayname", ColumnType::String).nullable(),
        ColumnSchema::new("email", ColumnType::String),
        ColumnSchema::new("password", ColumnType::String).nullable(),
        ColumnSchema::new("active", ColumnType::Boolean).with_default("true"),
        ColumnSchema::new("confirmed_at", ColumnType::DateTime).nullable(),
        ColumnSchema::new("version_id", ColumnType::Integer).with_default("1"),
        ColumnSchema::new("profile", ColumnType::Json).nullable(),
        ColumnSchema::new("preferences", ColumnType::Json).nullable(),
        ColumnSchema::new("blocked_at", ColumnType::DateTime).nullable(),
        ColumnSchema::new("verified_at", ColumnType::DateTime).nullable(),
    ],
);

pub static ACCOUNTS_USER_LOGIN_INFORMATION: TableModel = TableModel::new(
    "accounts_user_login_information",
    &[
        ColumnSchema::new("user_id", ColumnType::Integer).primary_key(),
        ColumnSchema::new("last_login_at", ColumnType::DateTime).nullable(),
        ColumnSchema::new("current_login_at", ColumnType::DateTime).nullable(),
        ColumnSchema::new("last_login_ip", ColumnType::String).nullable(),
        ColumnSchema::new("current_login_ip", ColumnType::String).nullable(),
        ColumnSchema::new("login_count", ColumnType::Integer).nullable(),
    ],
);

pub static ACCOUNTS_USER_SESSION_ACTIVITY: TableModel = TableModel::new(
    "accounts_user_session_activity",
    &[
        ColumnSchema::new("sid_s", ColumnType::String).primary_key(),
        ColumnSchema::new("user_id", ColumnType::Integer),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
        ColumnSchema::new("ip", ColumnType::String).nullable(),
        ColumnSchema::new("country", ColumnType::String).nullable(),
        ColumnSchema::new("browser", ColumnType::String).nullable(),
        ColumnSchema::new("browser_version", ColumnType::String).nullable(),
        ColumnSchema::new("os", ColumnType::String).nullable(),
        ColumnSchema::new("device", ColumnType::String).nullable(),
    ],
);

pub static ACCOUNTS_USERIDENTITY: TableModel = TableModel::new(
    "accounts_useridentity",
    &[
        ColumnSchema::new("id", ColumnType::String).primary_key(),
        ColumnSchema::new("method", ColumnType::String).primary_key(),
        ColumnSchema::new("id_user", ColumnType::Integer),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
    ],
);

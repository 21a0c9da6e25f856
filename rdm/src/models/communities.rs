use postgres::schema::{ColumnSchema, ColumnType, TableModel};

pub static COMMUNITIES_METADATA: TableModel = TableModel::new(
    "communities_metadata",
    &[
        ColumnSchema::new("id", ColumnType::Uuid).primary_key(),
        ColumnSchema::new("json", ColumnType::Json).nullable(),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
        ColumnSchema::new("version_id", ColumnType::Integer).with_default("1"),
        ColumnSchema::new("slug", ColumnType::String),
        ColumnSchema::new("bucket_id", ColumnType::Uuid).nullable(),
        ColumnSchema::new("deletion_status", ColumnType::String).with_default("P"),
    ],
);

pub static COMMUNITIES_MEMBERS: TableModel = TableModel::new(
    "communities_members",
    &[
        ColumnSchema::new("id", ColumnType::Uuid).primary_key(),
        ColumnSchema::new("json", ColumnType::Json).nullable(),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
        ColumnSchema::new("version_id", ColumnType::Integer).with_default("1"),
        ColumnSchema::new("community_id", ColumnType::Uuid),
        ColumnSchema::new("user_id", ColumnType::Integer).nullable(),
        ColumnSchema::new("group_id", ColumnType::Integer).nullable(),
        ColumnSchema::new("role", ColumnType::String),
        ColumnSchema::new("visible", ColumnType::Boolean).with_default("true"),
        ColumnSchema::new("active", ColumnType::Boolean).with_default("true"),
    ],
);

pub static COMMUNITIES_FILES: TableModel = TableModel::new(
    "communities_files",
    &[
        ColumnSchema::new("id", ColumnType::Uuid).primary_key(),
        ColumnSchema::new("json", ColumnType::Json).nullable(),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
        ColumnSchema::new("version_id", ColumnType::Integer).with_default("1"),
        ColumnSchema::new("key", ColumnType::String),
        ColumnSchema::new("record_id", ColumnType::Uuid),
        ColumnSchema::new("object_version_id", ColumnType::Uuid).nullable(),
    ],
);

pub static OAISERVER_SET: TableModel = TableModel::new(
    "oaiserver_set",
    &[
        ColumnSchema::new("id", ColumnType::Integer).primary_key(),
        ColumnSchema::new("spec", ColumnType::String),
        ColumnSchema::new("name", ColumnType::String).nullable(),
        ColumnSchema::new("description", ColumnType::String).nullable(),
        ColumnSchema::new("search_pattern", ColumnType::String).nullable(),
        ColumnSchema::new("system_created", ColumnType::Boolean).with_default("true"),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
    ],
);

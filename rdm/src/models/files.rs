use postgres::schema::{ColumnSchema, ColumnType, TableModel};

pub static FILES_BUCKET: TableModel = TableModel::new(
    "files_bucket",
    &[
        ColumnSchema::new("id", ColumnType::Uuid).primary_key(),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
        ColumnSchema::new("default_location", ColumnType::Integer).with_default("1"),
        ColumnSchema::new("default_storage_class", ColumnType::String).with_default("L"),
        ColumnSchema::new("size", ColumnType::BigInteger).with_default("0"),
        ColumnSchema::new("quota_size", ColumnType::BigInteger).nullable(),
        ColumnSchema::new("max_file_size", ColumnType::BigInteger).nullable(),
        ColumnSchema::new("locked", ColumnType::Boolean).with_default("false"),
        ColumnSchema::new("deleted", ColumnType::Boolean).with_default("false"),
    ],
);

pub static FILES_OBJECT: TableModel = TableModel::new(
    "files_object",
    &[
        ColumnSchema::new("version_id", ColumnType::Uuid).primary_key(),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
        ColumnSchema::new("key", ColumnType::String),
        ColumnSchema::new("bucket_id", ColumnType::Uuid),
        ColumnSchema::new("file_id", ColumnType::Uuid).nullable(),
        ColumnSchema::new("_mimetype", ColumnType::String).nullable(),
        ColumnSchema::new("is_head", ColumnType::Boolean).with_default("true"),
    ],
);

pub static FILES_FILES: TableModel = TableModel::new(
    "files_files",
    &[
        ColumnSchema::new("id", ColumnType::Uuid).primary_key(),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
        ColumnSchema::new("uri", ColumnType::String).nullable(),
        ColumnSchema::new("storage_class", ColumnType::String).nullable(),
        ColumnSchema::new("size", ColumnType::BigInteger).nullable(),
        ColumnSchema::new("checksum", ColumnType::String).nullable(),
        ColumnSchema::new("readable", ColumnType::Boolean).with_default("true"),
        ColumnSchema::new("writable", ColumnType::Boolean).with_default("false"),
        ColumnSchema::new("last_check_at", ColumnType::DateTime).nullable(),
        ColumnSchema::new("last_check", ColumnType::Boolean).with_default("true"),
    ],
);

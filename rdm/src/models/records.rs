use postgres::schema::{ColumnSchema, ColumnType, TableModel};

pub static RDM_PARENTS_METADATA: TableModel = TableModel::new(
    "rdm_parents_metadata",
    &[
        ColumnSchema::new("id", ColumnType::Uuid).primary_key(),
        ColumnSchema::new("json", ColumnType::Json).nullable(),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
        ColumnSchema::new("version_id", ColumnType::Integer).with_default("1"),
    ],
);

pub static RDM_RECORDS_METADATA: TableModel = TableModel::new(
    "rdm_records_metadata",
    &[
        ColumnSchema::new("id", ColumnType::Uuid).primary_key(),
        ColumnSchema::new("json", ColumnType::Json).nullable(),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
        ColumnSchema::new("version_id", ColumnType::Integer).with_default("1"),
        ColumnSchema::new("index", ColumnType::Integer).nullable(),
        ColumnSchema::new("bucket_id", ColumnType::Uuid).nullable(),
        ColumnSchema::new("parent_id", ColumnType::Uuid),
        ColumnSchema::new("deletion_status", ColumnType::String).with_default("P"),
    ],
);

pub static RDM_DRAFTS_METADATA: TableModel = TableModel::new(
    "rdm_drafts_metadata",
    &[
        ColumnSchema::new("id", ColumnType::Uuid).primary_key(),
        ColumnSchema::new("json", ColumnType::Json).nullable(),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
        ColumnSchema::new("version_id", ColumnType::Integer).with_default("1"),
        ColumnSchema::new("index", ColumnType::Integer).nullable(),
        ColumnSchema::new("bucket_id", ColumnType::Uuid).nullable(),
        ColumnSchema::new("parent_id", ColumnType::Uuid),
        ColumnSchema::new("expires_at", ColumnType::DateTime).nullable(),
        ColumnSchema::new("fork_version_id", ColumnType::Integer).nullable(),
    ],
);

pub static RDM_VERSIONS_STATE: TableModel = TableModel::new(
    "rdm_versions_state",
    &[
        ColumnSchema::new("parent_id", ColumnType::Uuid).primary_key(),
        ColumnSchema::new("latest_id", ColumnType::Uuid).nullable(),
        ColumnSchema::new("latest_index", ColumnType::Integer).nullable(),
        ColumnSchema::new("next_draft_id", ColumnType::Uuid).nullable(),
    ],
);

pub static RDM_RECORDS_FILES: TableModel = TableModel::new(
    "rdm_records_files",
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

pub static RDM_DRAFTS_FILES: TableModel = TableModel::new(
    "rdm_drafts_files",
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

pub static RDM_PARENTS_COMMUNITY: TableModel = TableModel::new(
    "rdm_parents_community",
    &[
        ColumnSchema::new("community_id", ColumnType::Uuid).primary_key(),
        ColumnSchema::new("record_id", ColumnType::Uuid).primary_key(),
        ColumnSchema::new("request_id", ColumnType::Uuid).nullable(),
    ],
);

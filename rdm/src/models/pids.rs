use postgres::schema::{ColumnSchema, ColumnType, TableModel};

pub static PIDSTORE_PID: TableModel = TableModel::new(
    "pidstore_pid",
    &[
        ColumnSchema::new("id", ColumnType::Integer).primary_key(),
        ColumnSchema::new("pid_type", ColumnType::String),
        ColumnSchema::new("pid_value", ColumnType::String),
        ColumnSchema::new("pid_provider", ColumnType::String).nullable(),
        ColumnSchema::new("status", ColumnType::String),
        ColumnSchema::new("object_type", ColumnType::String).nullable(),
        ColumnSchema::new("object_uuid", ColumnType::Uuid).nullable(),
        ColumnSchema::new("created", ColumnType::DateTime),
        ColumnSchema::new("updated", ColumnType::DateTime),
    ],
);

use std::fmt;

/// The closed set of state tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateTable {
    Parents,
    Records,
    Buckets,
    FileRecords,
    Communities,
    Pids,
    Global,
}

impl StateTable {
    pub const ALL: [StateTable; 7] = [
        StateTable::Parents,
        StateTable::Records,
        StateTable::Buckets,
        StateTable::FileRecords,
        StateTable::Communities,
        StateTable::Pids,
        StateTable::Global,
    ];

    /// Returns the table name used in snapshots and logs.
    pub fn name(&self) -> &'static str {
        match self {
            StateTable::Parents => "parents",
            StateTable::Records => "records",
            StateTable::Buckets => "buckets",
            StateTable::FileRecords => "file_records",
            StateTable::Communities => "communities",
            StateTable::Pids => "pids",
            StateTable::Global => "global",
        }
    }

    /// Returns the column holding the primary key.
    pub fn key_column(&self) -> &'static str {
        match self {
            StateTable::Parents | StateTable::Records => "recid",
            StateTable::Buckets | StateTable::FileRecords => "id",
            StateTable::Communities => "slug",
            StateTable::Pids => "pid_value",
            StateTable::Global => "key",
        }
    }

    /// Returns the columns whose non-null values must be unique within the table.
    pub fn unique_columns(&self) -> &'static [&'static str] {
        match self {
            StateTable::Communities => &[
                "id",
                "bucket_id",
                "oai_set_id",
                "community_file_id",
                "logo_object_version_id",
            ],
            StateTable::Pids => &["id"],
            _ => &[],
        }
    }
}

impl fmt::Display for StateTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

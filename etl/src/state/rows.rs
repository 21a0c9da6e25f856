use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EtlResult;
use crate::state::table::StateTable;
use crate::types::Row;

/// Typed view over the rows of one state table.
pub trait StateRow: Serialize + DeserializeOwned {
    const TABLE: StateTable;

    fn to_row(&self) -> EtlResult<Row> {
        match serde_json::to_value(self)? {
            Value::Object(row) => Ok(row),
            _ => Ok(Row::new()),
        }
    }

    fn from_row(row: &Row) -> EtlResult<Self> {
        Ok(serde_json::from_value(Value::Object(row.clone()))?)
    }
}

/// Parent of a version chain, keyed by the concept record id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentState {
    pub recid: String,
    pub id: String,
    #[serde(default)]
    pub latest_id: Option<String>,
    #[serde(default)]
    pub latest_index: Option<i64>,
    #[serde(default)]
    pub next_draft_id: Option<String>,
    #[serde(default)]
    pub communities: Vec<String>,
    #[serde(default)]
    pub version_id: Option<i64>,
    /// Primary key of the parent's recid PID.
    #[serde(default)]
    pub pid_pk: Option<i64>,
}

impl StateRow for ParentState {
    const TABLE: StateTable = StateTable::Parents;
}

/// A published record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordState {
    pub recid: String,
    pub id: String,
    pub parent_id: String,
    pub index: i64,
    #[serde(default)]
    pub fork_version_id: Option<i64>,
    #[serde(default)]
    pub pids: Value,
    #[serde(default)]
    pub bucket_id: Option<String>,
    #[serde(default)]
    pub version_id: Option<i64>,
}

impl StateRow for RecordState {
    const TABLE: StateTable = StateTable::Records;
}

/// Bucket owned by a draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    pub id: String,
    pub draft_id: String,
}

impl StateRow for BucketState {
    const TABLE: StateTable = StateTable::Buckets;
}

/// File attached to a draft or record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecordState {
    pub id: String,
    #[serde(default)]
    pub json: Value,
    pub created: String,
    pub updated: String,
    pub version_id: i64,
    pub key: String,
    pub record_id: String,
    #[serde(default)]
    pub object_version_id: Option<String>,
    #[serde(default)]
    pub file_id: Option<String>,
}

impl StateRow for FileRecordState {
    const TABLE: StateTable = StateTable::FileRecords;
}

/// Community keyed by its slug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityState {
    pub slug: String,
    pub id: String,
    pub owner_id: i64,
    pub bucket_id: String,
    pub oai_set_id: i64,
    #[serde(default)]
    pub community_file_id: Option<String>,
    #[serde(default)]
    pub logo_object_version_id: Option<String>,
}

impl StateRow for CommunityState {
    const TABLE: StateTable = StateTable::Communities;
}

/// Persistent identifier keyed by its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidState {
    pub pid_value: String,
    pub id: i64,
    pub pid_type: String,
    pub status: String,
    pub created: String,
    pub obj_type: String,
    #[serde(default)]
    pub obj_uuid: Option<String>,
}

impl StateRow for PidState {
    const TABLE: StateTable = StateTable::Pids;
}

/// Process-wide scalar, e.g. the PID high-water mark or key material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    pub key: String,
    pub value: Value,
}

impl StateRow for GlobalState {
    const TABLE: StateTable = StateTable::Global;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;
    use serde_json::json;

    #[test]
    fn typed_rows_round_trip_through_the_store() {
        let mut store = StateStore::with_defaults(false);
        let parent = ParentState {
            recid: "12345677".to_string(),
            id: "p1".to_string(),
            latest_id: Some("r1".to_string()),
            latest_index: Some(1),
            next_draft_id: None,
            communities: vec!["c1".to_string()],
            version_id: Some(1),
            pid_pk: Some(1_000_000),
        };
        store.add_as(&parent).unwrap();

        assert_eq!(store.get_as::<ParentState>("12345677").unwrap(), Some(parent.clone()));
        assert_eq!(store.get(StateTable::Parents, "12345677").unwrap()["latest_index"], 1);

        let updated = ParentState {
            latest_index: Some(2),
            latest_id: Some("r2".to_string()),
            ..parent
        };
        store.put_as(&updated).unwrap();
        assert_eq!(store.all_as::<ParentState>().unwrap(), vec![updated]);
    }

    #[test]
    fn missing_optional_columns_default() {
        let row = crate::types::row_from(json!({"recid": "1", "id": "r", "parent_id": "p", "index": 1}));
        let record = RecordState::from_row(&row).unwrap();
        assert_eq!(record.pids, Value::Null);
        assert_eq!(record.bucket_id, None);
    }
}

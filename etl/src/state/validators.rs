//! Business rules checked on every state write.

use serde_json::Value;

use crate::error::{ErrorKind, EtlResult};
use crate::ensure;
use crate::ids::{MAX_PID_PK_KEY, PID_PK_MAX, PID_PK_MIN};
use crate::state::store::Validator;
use crate::state::table::StateTable;
use crate::types::Row;

/// Returns the validators installed by [`crate::state::StateStore::with_defaults`].
pub fn defaults() -> Vec<(StateTable, Validator)> {
    vec![
        (StateTable::Parents, Box::new(parents)),
        (StateTable::Records, Box::new(records)),
        (StateTable::Pids, Box::new(pids)),
        (StateTable::Global, Box::new(global)),
    ]
}

fn is_set(row: &Row, column: &str) -> bool {
    row.get(column).is_some_and(|value| !value.is_null())
}

/// A parent points at a published version, a pending draft or both.
pub fn parents(row: &Row) -> EtlResult<()> {
    ensure!(
        is_set(row, "latest_id") || is_set(row, "next_draft_id"),
        ErrorKind::ValidationError,
        "Parent has neither a latest version nor a next draft",
        Value::Object(row.clone())
    );

    if is_set(row, "latest_id") {
        let index = row.get("latest_index").and_then(Value::as_i64);
        ensure!(
            index.is_some_and(|index| index >= 1),
            ErrorKind::ValidationError,
            "Parent latest index must be at least 1",
            Value::Object(row.clone())
        );
    }

    Ok(())
}

pub fn records(row: &Row) -> EtlResult<()> {
    let index = row.get("index").and_then(Value::as_i64);
    ensure!(
        index.is_some_and(|index| index >= 1),
        ErrorKind::ValidationError,
        "Record index must be at least 1",
        Value::Object(row.clone())
    );

    Ok(())
}

pub fn pids(row: &Row) -> EtlResult<()> {
    let status = row.get("status").and_then(Value::as_str);
    ensure!(
        matches!(status, Some("R" | "K" | "N" | "D")),
        ErrorKind::ValidationError,
        "PID status must be one of R, K, N, D",
        Value::Object(row.clone())
    );

    Ok(())
}

pub fn global(row: &Row) -> EtlResult<()> {
    if row.get("key").and_then(Value::as_str) != Some(MAX_PID_PK_KEY) {
        return Ok(());
    }

    let value = row.get("value").and_then(Value::as_i64);
    ensure!(
        value.is_some_and(|value| (PID_PK_MIN - 1..=PID_PK_MAX).contains(&value)),
        ErrorKind::ValidationError,
        "PID high-water mark is outside the allocator range",
        Value::Object(row.clone())
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::row_from;
    use serde_json::json;

    #[test]
    fn parent_invariant() {
        assert!(parents(&row_from(json!({"latest_id": "r", "latest_index": 1}))).is_ok());
        assert!(parents(&row_from(json!({"latest_id": null, "next_draft_id": "d"}))).is_ok());
        assert!(parents(&row_from(json!({"latest_id": "r", "latest_index": 0}))).is_err());
        assert!(parents(&row_from(json!({"latest_id": "r"}))).is_err());
        assert!(parents(&row_from(json!({}))).is_err());
    }

    #[test]
    fn pid_status_and_high_water_mark() {
        assert!(pids(&row_from(json!({"status": "K"}))).is_ok());
        assert!(pids(&row_from(json!({"status": "X"}))).is_err());

        assert!(global(&row_from(json!({"key": "secret", "value": "abc"}))).is_ok());
        assert!(global(&row_from(json!({"key": MAX_PID_PK_KEY, "value": 1_000_001}))).is_ok());
        assert!(global(&row_from(json!({"key": MAX_PID_PK_KEY, "value": 12}))).is_err());
        assert!(global(&row_from(json!({"key": MAX_PID_PK_KEY, "value": 2_147_483_647_i64}))).is_err());
    }

    #[test]
    fn record_index() {
        assert!(records(&row_from(json!({"index": 2}))).is_ok());
        assert!(records(&row_from(json!({"index": 0}))).is_err());
    }
}

//! Builders for target rows shared by the actions and the table generators.

use etl::error::{ErrorKind, EtlResult};
use etl::etl_error;
use etl::types::{Row, dict_get, row_from, scalar_key};
use postgres::schema::TableModel;
use serde_json::{Value, json};

/// Keeps the columns of `row` that `model` declares.
pub fn project(model: &TableModel, row: &Row) -> Row {
    row.iter()
        .filter(|(column, _)| model.column(column).is_some())
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect()
}

/// Returns the scalar at `path` rendered as a string key.
pub fn key(row: &Row, path: &str) -> EtlResult<String> {
    dict_get(row, path)
        .and_then(scalar_key)
        .ok_or_else(|| etl_error!(ErrorKind::MissingField, "Source key is missing", path))
}

pub fn required_str<'a>(row: &'a Row, path: &str) -> EtlResult<&'a str> {
    dict_get(row, path)
        .and_then(Value::as_str)
        .ok_or_else(|| etl_error!(ErrorKind::MissingField, "Source field is missing", path))
}

/// Returns the `created` and `updated` timestamps of `row`, `updated` defaulting to
/// `created`.
pub fn timestamps(row: &Row) -> EtlResult<(String, String)> {
    let created = required_str(row, "created")?.to_string();
    let updated = dict_get(row, "updated")
        .and_then(Value::as_str)
        .unwrap_or(&created)
        .to_string();
    Ok((created, updated))
}

pub fn bucket(id: &str, created: &str, updated: &str, locked: bool) -> Row {
    row_from(json!({
        "id": id,
        "created": created,
        "updated": updated,
        "locked": locked,
        "deleted": false,
    }))
}

pub fn versions_state(
    parent_id: &str,
    latest_id: Option<&str>,
    latest_index: Option<i64>,
    next_draft_id: Option<&str>,
) -> Row {
    row_from(json!({
        "parent_id": parent_id,
        "latest_id": latest_id,
        "latest_index": latest_index,
        "next_draft_id": next_draft_id,
    }))
}

/// A `files_object` row heading `key` in `bucket_id`.
pub fn object_version(
    version_id: &str,
    bucket_id: &str,
    key: &str,
    file_id: Option<&str>,
    mimetype: Option<&str>,
    timestamp: &str,
) -> Row {
    row_from(json!({
        "version_id": version_id,
        "created": timestamp,
        "updated": timestamp,
        "key": key,
        "bucket_id": bucket_id,
        "file_id": file_id,
        "_mimetype": mimetype,
        "is_head": true,
    }))
}

/// A row of a file join table (`rdm_records_files`, `rdm_drafts_files`, `communities_files`).
pub fn file_record(
    id: &str,
    key: &str,
    record_id: &str,
    object_version_id: Option<&str>,
    created: &str,
    updated: &str,
) -> Row {
    row_from(json!({
        "id": id,
        "json": {},
        "created": created,
        "updated": updated,
        "version_id": 1,
        "key": key,
        "record_id": record_id,
        "object_version_id": object_version_id,
    }))
}

#[cfg(test)]
mod tests {
    use crate::models::FILES_BUCKET;

    use super::*;

    #[test]
    fn projection_keeps_model_columns() {
        let row = row_from(json!({"id": "b1", "size": 10, "quota": 5}));
        assert_eq!(project(&FILES_BUCKET, &row), row_from(json!({"id": "b1", "size": 10})));
    }

    #[test]
    fn keys_and_timestamps() {
        let row = row_from(json!({"json": {"id": 123}, "created": "2020-01-01T00:00:00"}));
        assert_eq!(key(&row, "json.id").unwrap(), "123");
        assert_eq!(
            key(&row, "json.conceptrecid").unwrap_err().kind(),
            ErrorKind::MissingField
        );
        assert_eq!(
            timestamps(&row).unwrap(),
            ("2020-01-01T00:00:00".to_string(), "2020-01-01T00:00:00".to_string())
        );
    }
}

//! Synchronization of a record bucket with its draft bucket at publish time.
//!
//! Every change of the record's file set is expressed as new head object versions, so
//! `files_object` keeps the full history of the bucket.

use std::collections::BTreeMap;

use etl::error::EtlResult;
use etl::ids::uuid;
use etl::load::Session;
use etl::operation::Operation;
use etl::types::{Row, row_from};
use serde_json::{Value, json};

use crate::models::FILES_OBJECT;
use crate::rows;

/// Head object versions of a bucket keyed by object key.
pub type Heads = BTreeMap<String, Row>;

/// Loads the head object versions of `bucket_id`.
pub async fn heads(session: &mut dyn Session, bucket_id: &str) -> EtlResult<Heads> {
    let filter = row_from(json!({"bucket_id": bucket_id, "is_head": true}));
    let rows = session.select(&FILES_OBJECT, &filter).await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let key = row.get("key").and_then(Value::as_str)?.to_string();
            Some((key, row))
        })
        .collect())
}

fn file_id(head: &Row) -> Option<&str> {
    head.get("file_id").and_then(Value::as_str)
}

/// Returns the operations making the heads of `record_bucket` match `draft`.
pub fn sync(draft: &Heads, record: &Heads, record_bucket: &str, timestamp: &str) -> Vec<Operation> {
    let mut operations = Vec::new();
    let mut replace = |previous: Option<&Row>, key: &str, source: Option<&Row>| {
        if let Some(previous) = previous {
            operations.push(Operation::update(
                &FILES_OBJECT,
                row_from(json!({
                    "version_id": previous["version_id"],
                    "is_head": false,
                    "updated": timestamp,
                })),
            ));
        }
        let mimetype = source.and_then(|head| head.get("_mimetype")).and_then(Value::as_str);
        operations.push(Operation::insert(
            &FILES_OBJECT,
            rows::object_version(
                &uuid(),
                record_bucket,
                key,
                source.and_then(file_id),
                mimetype,
                timestamp,
            ),
        ));
    };

    for (key, draft_head) in draft {
        let record_head = record.get(key);
        match (file_id(draft_head), record_head) {
            // Deleted in the draft: mark the record head deleted unless it already is.
            (None, Some(record_head)) if file_id(record_head).is_some() => {
                replace(Some(record_head), key, None)
            }
            (None, _) => {}
            (Some(_), None) => replace(None, key, Some(draft_head)),
            (Some(draft_file), Some(record_head)) if file_id(record_head) != Some(draft_file) => {
                replace(Some(record_head), key, Some(draft_head))
            }
            (Some(_), Some(_)) => {}
        }
    }

    for (key, record_head) in record {
        if !draft.contains_key(key) && file_id(record_head).is_some() {
            replace(Some(record_head), key, None);
        }
    }

    operations
}

//! Table generators of the backfill streams.
//!
//! A generator expands one transformed dump entry into the rows of the tables it declares.
//! Generators that share their logic with an action (records, drafts, communities) build the
//! same rows through the same helpers, then keep the inserts: every other operation targets a
//! row that an earlier stream has already copied.

mod communities;
mod drafts;
mod records;
mod single;
mod users;

use etl::bail;
use etl::error::{ErrorKind, EtlResult};
use etl::load::bulk::TableRow;
use etl::operation::{Operation, OperationType};
use etl::types::{Entry, Row};
use serde_json::Value;
use tracing::debug;

pub use communities::CommunitiesGenerator;
pub use drafts::DraftsGenerator;
pub use records::RecordsGenerator;
pub use single::SingleTableGenerator;
pub use users::UsersGenerator;

/// Keeps the inserts of `operations` as table rows.
fn table_rows(generator: &'static str, operations: Vec<Operation>) -> Vec<TableRow> {
    operations
        .into_iter()
        .filter_map(|operation| {
            if operation.op == OperationType::Insert {
                return Some(TableRow::new(operation.model, operation.data));
            }
            debug!(generator, %operation, "dropping non-insert operation");
            None
        })
        .collect()
}

/// Returns the object at `key`, failing when it is missing.
fn required_object(entry: &Entry, key: &str) -> EtlResult<Row> {
    match entry.get(key) {
        Some(Value::Object(row)) => Ok(row.clone()),
        _ => bail!(ErrorKind::MissingField, "Entry field is missing", key),
    }
}

/// Returns the object at `key`, if any.
fn object(entry: &Entry, key: &str) -> Option<Row> {
    entry.get(key).and_then(Value::as_object).cloned()
}

/// Returns the objects of the array at `key`.
fn objects(entry: &Entry, key: &str) -> Vec<Row> {
    entry
        .get(key)
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_object).cloned().collect())
        .unwrap_or_default()
}

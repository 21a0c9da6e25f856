//! Values flowing through streams: backfill entries and change transactions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bail;
use crate::error::{ErrorKind, EtlResult};

/// Opaque mapping produced by an extractor and consumed by a transform.
pub type Entry = Map<String, Value>;

/// Column name to value mapping of a single table row.
pub type Row = Map<String, Value>;

/// Kind of a row-level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CdcOp {
    #[serde(rename = "C", alias = "c")]
    Create,
    #[serde(rename = "U", alias = "u")]
    Update,
    #[serde(rename = "D", alias = "d")]
    Delete,
}

/// Origin of a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSource {
    pub table: String,
}

/// A row-level change of a source table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOperation {
    pub op: CdcOp,
    pub source: TxSource,
    #[serde(default)]
    pub key: Row,
    #[serde(default)]
    pub before: Option<Row>,
    #[serde(default)]
    pub after: Option<Row>,
}

impl TxOperation {
    /// Creates an operation with the given images.
    pub fn new(op: CdcOp, table: &str, before: Option<Row>, after: Option<Row>) -> Self {
        Self {
            op,
            source: TxSource {
                table: table.to_string(),
            },
            key: Row::new(),
            before,
            after,
        }
    }

    /// Returns the source table name.
    pub fn table(&self) -> &str {
        &self.source.table
    }

    /// Returns whether this operation is an `op` on `table`.
    pub fn is(&self, op: CdcOp, table: &str) -> bool {
        self.op == op && self.source.table == table
    }

    /// Returns the most recent image of the row.
    ///
    /// The after image for creates and updates, the before image for deletes, with the key
    /// columns merged in.
    pub fn data(&self) -> Row {
        let image = match self.op {
            CdcOp::Create | CdcOp::Update => self.after.as_ref().or(self.before.as_ref()),
            CdcOp::Delete => self.before.as_ref().or(self.after.as_ref()),
        };

        let mut data = image.cloned().unwrap_or_default();
        for (column, value) in &self.key {
            data.entry(column.clone()).or_insert_with(|| value.clone());
        }
        data
    }
}

/// A commit-ordered group of row changes applied atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tx {
    pub id: i64,
    #[serde(default)]
    pub commit_lsn: Option<i64>,
    pub operations: Vec<TxOperation>,
}

impl Tx {
    pub fn new(id: i64, operations: Vec<TxOperation>) -> Self {
        Self {
            id,
            commit_lsn: None,
            operations,
        }
    }

    /// Returns the operations on `table`, in transaction order.
    pub fn on<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a TxOperation> + 'a {
        self.operations.iter().filter(move |op| op.table() == table)
    }

    /// Returns the `op` operations on `table`, in transaction order.
    pub fn ops<'a>(&'a self, op: CdcOp, table: &'a str) -> impl Iterator<Item = &'a TxOperation> + 'a {
        self.operations.iter().filter(move |candidate| candidate.is(op, table))
    }

    /// Returns whether the transaction contains an `op` on `table`.
    pub fn has(&self, op: CdcOp, table: &str) -> bool {
        self.operations.iter().any(|candidate| candidate.is(op, table))
    }

    /// Returns whether the transaction touches `table` at all.
    pub fn touches(&self, table: &str) -> bool {
        self.operations.iter().any(|op| op.table() == table)
    }

    /// Returns the first `op` operation on `table`.
    pub fn first<'a>(&'a self, op: CdcOp, table: &'a str) -> Option<&'a TxOperation> {
        self.ops(op, table).next()
    }
}

/// Returns the value at a dotted `path`, e.g. `json.id`.
pub fn dict_get<'a>(row: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = row.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Sets the value at a dotted `path`, creating intermediate objects.
///
/// Fails when an intermediate segment holds a non-object value.
pub fn dict_set(row: &mut Map<String, Value>, path: &str, value: Value) -> EtlResult<()> {
    let (parents, last) = match path.rsplit_once('.') {
        Some((parents, last)) => (Some(parents), last),
        None => (None, path),
    };

    let mut current = row;
    if let Some(parents) = parents {
        for segment in parents.split('.') {
            let next = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if next.is_null() {
                *next = Value::Object(Map::new());
            }
            current = match next {
                Value::Object(map) => map,
                _ => bail!(
                    ErrorKind::InvalidData,
                    "Path segment is not an object",
                    format!("path `{path}`, segment `{segment}`")
                ),
            };
        }
    }

    current.insert(last.to_string(), value);
    Ok(())
}

/// Returns the value at `path` as a string, if it is one.
pub fn dict_str<'a>(row: &'a Map<String, Value>, path: &str) -> Option<&'a str> {
    dict_get(row, path).and_then(Value::as_str)
}

/// Builds a [`Row`] from a JSON object literal, returning an empty row for any other value.
pub fn row_from(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

/// Renders a scalar JSON value as a string key.
pub fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}

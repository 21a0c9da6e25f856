use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use postgres::schema::TableModel;
use tokio::sync::RwLock;

use crate::error::{ErrorKind, EtlResult};
use crate::load::Session;
use crate::operation::{Operation, OperationType};
use crate::types::{Row, scalar_key};
use crate::{bail, etl_error};

type Tables = BTreeMap<String, BTreeMap<String, Row>>;

#[derive(Default)]
struct Inner {
    tables: Tables,
    snapshot: Option<Tables>,
    pending: Vec<Operation>,
    committed: Vec<Operation>,
    failing_tables: HashSet<String>,
    commits: u64,
    rollbacks: u64,
}

/// In-memory database keyed by primary key, implementing [`Session`].
///
/// `begin` snapshots every table and `rollback` restores the snapshot, so a failed
/// transaction leaves no trace. Inserting an existing key fails with
/// [`ErrorKind::DuplicateKey`]; updates and deletes of missing rows affect zero rows.
/// Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `row` outside of any transaction.
    pub async fn seed(&self, model: &'static TableModel, row: Row) {
        let key = row_key(model, &row).expect("seeded row has no primary key");
        let mut inner = self.inner.write().await;
        inner
            .tables
            .entry(model.name.to_string())
            .or_default()
            .insert(key, row);
    }

    /// Makes every statement on `table` fail.
    pub async fn fail_on(&self, table: &str) {
        self.inner
            .write()
            .await
            .failing_tables
            .insert(table.to_string());
    }

    /// Lets writes to every table succeed again.
    pub async fn clear_failures(&self) {
        self.inner.write().await.failing_tables.clear();
    }

    /// Returns the rows of `table` in key order.
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.inner
            .read()
            .await
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the row of `table` whose primary key renders as `key`.
    pub async fn row(&self, table: &str, key: &str) -> Option<Row> {
        self.inner
            .read()
            .await
            .tables
            .get(table)
            .and_then(|rows| rows.get(key).cloned())
    }

    /// Returns the operations of every committed transaction, in order.
    pub async fn committed(&self) -> Vec<Operation> {
        self.inner.read().await.committed.clone()
    }

    pub async fn commits(&self) -> u64 {
        self.inner.read().await.commits
    }

    pub async fn rollbacks(&self) -> u64 {
        self.inner.read().await.rollbacks
    }
}

#[async_trait]
impl Session for MemoryDatabase {
    async fn begin(&mut self) -> EtlResult<()> {
        let mut inner = self.inner.write().await;
        if inner.snapshot.is_some() {
            bail!(ErrorKind::InvalidState, "Transaction already in progress");
        }
        inner.snapshot = Some(inner.tables.clone());
        inner.pending.clear();

        Ok(())
    }

    async fn execute(&mut self, operation: &Operation) -> EtlResult<u64> {
        let mut inner = self.inner.write().await;
        let table = operation.model.name;
        if inner.failing_tables.contains(table) {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Statement failed",
                format!("{operation}")
            );
        }

        let key = row_key(operation.model, &operation.data)?;
        let rows = inner.tables.entry(table.to_string()).or_default();
        let affected = match operation.op {
            OperationType::Insert => {
                if rows.contains_key(&key) {
                    bail!(
                        ErrorKind::DuplicateKey,
                        "Duplicate primary key",
                        format!("{table}/{key}")
                    );
                }
                rows.insert(key, operation.data.clone());
                1
            }
            OperationType::Update => match rows.get_mut(&key) {
                Some(row) => {
                    row.extend(operation.data.clone());
                    1
                }
                None => 0,
            },
            OperationType::Delete => u64::from(rows.remove(&key).is_some()),
        };

        if inner.snapshot.is_some() {
            inner.pending.push(operation.clone());
        } else {
            inner.committed.push(operation.clone());
        }

        Ok(affected)
    }

    async fn select(&mut self, model: &'static TableModel, filter: &Row) -> EtlResult<Vec<Row>> {
        let inner = self.inner.read().await;
        let Some(rows) = inner.tables.get(model.name) else {
            return Ok(Vec::new());
        };

        Ok(rows
            .values()
            .filter(|row| {
                filter
                    .iter()
                    .all(|(column, value)| row.get(column) == Some(value))
            })
            .cloned()
            .collect())
    }

    async fn commit(&mut self) -> EtlResult<()> {
        let mut inner = self.inner.write().await;
        if inner.snapshot.take().is_none() {
            bail!(ErrorKind::InvalidState, "No transaction in progress");
        }
        let pending = std::mem::take(&mut inner.pending);
        inner.committed.extend(pending);
        inner.commits += 1;

        Ok(())
    }

    async fn rollback(&mut self) -> EtlResult<()> {
        let mut inner = self.inner.write().await;
        let Some(snapshot) = inner.snapshot.take() else {
            bail!(ErrorKind::InvalidState, "No transaction in progress");
        };
        inner.tables = snapshot;
        inner.pending.clear();
        inner.rollbacks += 1;

        Ok(())
    }
}

fn row_key(model: &TableModel, row: &Row) -> EtlResult<String> {
    let parts = model
        .primary_key()
        .map(|column| {
            row.get(column.name).and_then(scalar_key).ok_or_else(|| {
                etl_error!(
                    ErrorKind::InvalidData,
                    "Row has no value for a primary key column",
                    format!("{model}.{}", column.name)
                )
            })
        })
        .collect::<EtlResult<Vec<_>>>()?;

    Ok(parts.join("/"))
}

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use postgres::schema::TableModel;
use postgres::sequences::OwnedSequence;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::load::bulk::{CopyTarget, read_rows};
use crate::types::Row;

#[derive(Default)]
struct Inner {
    tables: BTreeMap<String, Vec<Row>>,
    copied: Vec<String>,
    next_values: BTreeMap<String, i64>,
    failing_tables: HashSet<String>,
}

/// In-memory [`CopyTarget`] recording the rows of every copied CSV file.
///
/// Sequences declared with [`MemoryCopyTarget::with_sequence`] live in the `public` schema.
#[derive(Clone, Default)]
pub struct MemoryCopyTarget {
    sequences: Vec<OwnedSequence>,
    inner: Arc<RwLock<Inner>>,
}

impl MemoryCopyTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the sequence `sequence` to `table.column`.
    pub fn with_sequence(mut self, table: &str, column: &str, sequence: &str) -> Self {
        self.sequences.push(OwnedSequence {
            sequence_schema: "public".to_string(),
            sequence_name: sequence.to_string(),
            table_schema: "public".to_string(),
            table_name: table.to_string(),
            column_name: column.to_string(),
        });
        self
    }

    /// Makes every copy into `table` fail.
    pub async fn fail_on(&self, table: &str) {
        self.inner
            .write()
            .await
            .failing_tables
            .insert(table.to_string());
    }

    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.inner
            .read()
            .await
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the copied tables in copy order.
    pub async fn copied_tables(&self) -> Vec<String> {
        self.inner.read().await.copied.clone()
    }

    /// Returns the value `sequence` was last restarted with.
    pub async fn next_value(&self, sequence: &str) -> Option<i64> {
        self.inner.read().await.next_values.get(sequence).copied()
    }
}

#[async_trait]
impl CopyTarget for MemoryCopyTarget {
    async fn copy_in(&mut self, model: &'static TableModel, path: &Path) -> EtlResult<u64> {
        let mut inner = self.inner.write().await;
        if inner.failing_tables.contains(model.name) {
            bail!(ErrorKind::DestinationQueryFailed, "Copy failed", model.to_string());
        }

        let rows = read_rows(path, model)?;
        let count = rows.len() as u64;
        inner
            .tables
            .entry(model.name.to_string())
            .or_default()
            .extend(rows);
        inner.copied.push(model.name.to_string());

        Ok(count)
    }

    async fn owned_sequences(&mut self, tables: &[&'static str]) -> EtlResult<Vec<OwnedSequence>> {
        Ok(self
            .sequences
            .iter()
            .filter(|sequence| tables.contains(&sequence.table_name.as_str()))
            .cloned()
            .collect())
    }

    async fn column_max(&mut self, sequence: &OwnedSequence) -> EtlResult<Option<i64>> {
        let inner = self.inner.read().await;
        let max = inner
            .tables
            .get(&sequence.table_name)
            .into_iter()
            .flatten()
            .filter_map(|row| row.get(&sequence.column_name).and_then(Value::as_i64))
            .max();

        Ok(max)
    }

    async fn restart_sequence(&mut self, sequence: &OwnedSequence, value: i64) -> EtlResult<()> {
        self.inner
            .write()
            .await
            .next_values
            .insert(sequence.sequence_name.clone(), value);

        Ok(())
    }
}

use postgres::schema::TableModel;

use crate::error::EtlResult;
use crate::state::StateStore;
use crate::types::{Entry, Row};

/// A row destined to the table described by `model`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub model: &'static TableModel,
    pub data: Row,
}

impl TableRow {
    pub fn new(model: &'static TableModel, data: Row) -> Self {
        Self { model, data }
    }
}

/// Expands one entry into rows of several tables.
pub trait TableGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Tables this generator writes, in the order they must be loaded.
    fn tables(&self) -> Vec<&'static TableModel>;

    /// Whether the tables are loaded from pre-existing CSVs instead of being staged.
    fn existing_data(&self) -> bool {
        false
    }

    fn generate(&mut self, entry: &Entry, state: &mut StateStore) -> EtlResult<Vec<TableRow>>;

    /// Rows emitted once every entry has been generated.
    fn finish(&mut self, _state: &mut StateStore) -> EtlResult<Vec<TableRow>> {
        Ok(Vec::new())
    }

    /// Runs after the tables have been copied.
    fn post_load(&mut self, _state: &mut StateStore) -> EtlResult<()> {
        Ok(())
    }
}

use etl::error::EtlResult;
use etl::load::bulk::{TableGenerator, TableRow};
use etl::state::StateStore;
use etl::types::Entry;
use postgres::schema::TableModel;

use crate::rows;

/// Writes every entry as one row of a single table.
///
/// With `existing_data` the table is copied from a CSV of the configured data directory and
/// entries are not generated.
#[derive(Debug)]
pub struct SingleTableGenerator {
    name: &'static str,
    model: &'static TableModel,
    existing_data: bool,
}

impl SingleTableGenerator {
    pub fn new(name: &'static str, model: &'static TableModel) -> Self {
        Self {
            name,
            model,
            existing_data: false,
        }
    }

    pub fn with_existing_data(mut self, existing_data: bool) -> Self {
        self.existing_data = existing_data;
        self
    }
}

impl TableGenerator for SingleTableGenerator {
    fn name(&self) -> &'static str {
        self.name
    }

    fn tables(&self) -> Vec<&'static TableModel> {
        vec![self.model]
    }

    fn existing_data(&self) -> bool {
        self.existing_data
    }

    fn generate(&mut self, entry: &Entry, _state: &mut StateStore) -> EtlResult<Vec<TableRow>> {
        Ok(vec![TableRow::new(self.model, rows::project(self.model, entry))])
    }
}

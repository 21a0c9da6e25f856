use std::collections::HashMap;

use postgres::schema::TableModel;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::operation::Operation;
use crate::types::{Row, TxOperation};

/// Maps source tables to target models and turns source changes into operations on them.
///
/// Columns of the source row that the target model does not declare are dropped.
#[derive(Debug, Default, Clone)]
pub struct TxRowGenerator {
    models: HashMap<&'static str, &'static TableModel>,
}

impl TxRowGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, source_table: &'static str, model: &'static TableModel) -> Self {
        self.models.insert(source_table, model);
        self
    }

    pub fn model(&self, source_table: &str) -> EtlResult<&'static TableModel> {
        match self.models.get(source_table) {
            Some(model) => Ok(model),
            None => bail!(
                ErrorKind::TableNotFound,
                "No row generator for source table",
                source_table
            ),
        }
    }

    pub fn generate(&self, operation: &TxOperation) -> EtlResult<Operation> {
        let model = self.model(operation.table())?;
        let data: Row = operation
            .data()
            .into_iter()
            .filter(|(column, _)| model.column(column).is_some())
            .collect();

        Ok(Operation::new(operation.op.into(), model, data))
    }

    /// Generates operations for every change of `operations`, in order.
    pub fn generate_all<'a, I>(&self, operations: I) -> EtlResult<Vec<Operation>>
    where
        I: IntoIterator<Item = &'a TxOperation>,
    {
        operations
            .into_iter()
            .map(|operation| self.generate(operation))
            .collect()
    }
}

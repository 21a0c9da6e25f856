//! Row-level operations produced by actions and applied by the transactional loader.

use std::fmt;

use postgres::schema::TableModel;

use crate::types::{CdcOp, Row};

/// Statement kind of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Insert,
    Update,
    Delete,
}

impl From<CdcOp> for OperationType {
    fn from(op: CdcOp) -> Self {
        match op {
            CdcOp::Create => OperationType::Insert,
            CdcOp::Update => OperationType::Update,
            CdcOp::Delete => OperationType::Delete,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Insert => f.write_str("INSERT"),
            OperationType::Update => f.write_str("UPDATE"),
            OperationType::Delete => f.write_str("DELETE"),
        }
    }
}

/// An `(op, model, data)` triple.
///
/// For updates and deletes the primary key columns of `data` select the target row.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub op: OperationType,
    pub model: &'static TableModel,
    pub data: Row,
}

impl Operation {
    pub fn new(op: OperationType, model: &'static TableModel, data: Row) -> Self {
        Self { op, model, data }
    }

    pub fn insert(model: &'static TableModel, data: Row) -> Self {
        Self::new(OperationType::Insert, model, data)
    }

    pub fn update(model: &'static TableModel, data: Row) -> Self {
        Self::new(OperationType::Update, model, data)
    }

    pub fn delete(model: &'static TableModel, data: Row) -> Self {
        Self::new(OperationType::Delete, model, data)
    }

    /// Returns whether this is an `op` on the table named `table`.
    pub fn is(&self, op: OperationType, table: &str) -> bool {
        self.op == op && self.model.name == table
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.model)
    }
}

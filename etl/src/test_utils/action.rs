use async_trait::async_trait;
use postgres::schema::TableModel;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EtlResult;
use crate::operation::Operation;
use crate::tx::{ActionContext, LoadAction, TransformAction};
use crate::typed_payload;
use crate::types::{CdcOp, Row, Tx, TxOperation, row_from};

/// Transform action matching every transaction with an `op` on `table`.
///
/// With a model, the load action replays each operation on `table` against it unchanged.
pub struct TableAction {
    name: &'static str,
    op: CdcOp,
    table: &'static str,
    model: Option<&'static TableModel>,
}

impl TableAction {
    pub fn new(name: &'static str, op: CdcOp, table: &'static str) -> Self {
        Self {
            name,
            op,
            table,
            model: None,
        }
    }

    pub fn with_model(mut self, model: &'static TableModel) -> Self {
        self.model = Some(model);
        self
    }
}

impl TransformAction for TableAction {
    fn name(&self) -> &'static str {
        self.name
    }

    fn matches(&self, tx: &Tx) -> bool {
        tx.has(self.op, self.table)
    }

    fn transform(&self, tx: &Tx) -> EtlResult<Box<dyn LoadAction>> {
        let operations = match self.model {
            Some(model) => tx
                .on(self.table)
                .map(|op| Operation::new(op.op.into(), model, op.data()))
                .collect(),
            None => Vec::new(),
        };

        Ok(Box::new(ReplayAction {
            name: self.name,
            data: TxData { tx_id: tx.id },
            operations,
        }))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TxData {
    tx_id: i64,
}

#[derive(Debug)]
struct ReplayAction {
    name: &'static str,
    data: TxData,
    operations: Vec<Operation>,
}

#[async_trait]
impl LoadAction for ReplayAction {
    fn name(&self) -> &'static str {
        self.name
    }

    typed_payload!(data);

    async fn generate_rows(&mut self, _ctx: &mut ActionContext<'_>) -> EtlResult<Vec<Operation>> {
        Ok(self.operations.clone())
    }
}

/// Builds a transaction from `(op, table, row)` triples.
///
/// Deletes carry the row as before image, creates and updates as after image.
pub fn tx(id: i64, operations: Vec<(CdcOp, &str, Value)>) -> Tx {
    let operations = operations
        .into_iter()
        .map(|(op, table, value)| {
            let row: Row = row_from(value);
            match op {
                CdcOp::Delete => TxOperation::new(op, table, Some(row), None),
                CdcOp::Create | CdcOp::Update => TxOperation::new(op, table, None, Some(row)),
            }
        })
        .collect();

    Tx::new(id, operations)
}

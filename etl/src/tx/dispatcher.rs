use futures::stream::BoxStream;
use futures::{StreamExt, future};
use tracing::{debug, error};

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::tx::{LoadAction, TransformAction};
use crate::types::Tx;

/// The load actions generated for one transaction.
#[derive(Debug)]
pub struct TxActions {
    pub tx_id: i64,
    pub actions: Vec<Box<dyn LoadAction>>,
}

/// Dispatches each transaction to the single registered action matching it.
///
/// Matching is evaluated against every candidate, so registration order never changes the
/// outcome.
pub struct TxTransform {
    actions: Vec<Box<dyn TransformAction>>,
    throw: bool,
}

impl TxTransform {
    pub fn new(actions: Vec<Box<dyn TransformAction>>) -> Self {
        Self {
            actions,
            throw: false,
        }
    }

    /// Yields dispatch errors downstream instead of logging and skipping the transaction.
    pub fn with_throw(mut self, throw: bool) -> Self {
        self.throw = throw;
        self
    }

    /// Returns the names of the registered actions, in registration order.
    pub fn action_names(&self) -> Vec<&'static str> {
        self.actions.iter().map(|action| action.name()).collect()
    }

    pub fn dispatch(&self, tx: &Tx) -> EtlResult<TxActions> {
        let matched = self
            .actions
            .iter()
            .filter(|action| action.matches(tx))
            .collect::<Vec<_>>();

        let action = match matched.as_slice() {
            [] => bail!(
                ErrorKind::NoActionMatch,
                "No action matches the transaction",
                format!("tx {}, tables [{}]", tx.id, tables(tx))
            ),
            [action] => action,
            _ => bail!(
                ErrorKind::MultipleActionMatches,
                "Several actions match the transaction",
                format!(
                    "tx {}, actions [{}]",
                    tx.id,
                    matched
                        .iter()
                        .map(|action| action.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            ),
        };

        debug!(tx_id = tx.id, action = action.name(), "dispatching transaction");
        let load_action = action.transform(tx)?;

        Ok(TxActions {
            tx_id: tx.id,
            actions: vec![load_action],
        })
    }

    pub fn apply(
        self,
        input: BoxStream<'static, EtlResult<Tx>>,
    ) -> BoxStream<'static, EtlResult<TxActions>> {
        input
            .filter_map(move |item| {
                future::ready(match item {
                    Ok(tx) => match self.dispatch(&tx) {
                        Ok(actions) => Some(Ok(actions)),
                        Err(err) if self.throw => Some(Err(err)),
                        Err(err) => {
                            error!(tx_id = tx.id, error = %err, "transaction dispatch failed, skipping");
                            None
                        }
                    },
                    Err(err) => Some(Err(err)),
                })
            })
            .boxed()
    }
}

fn tables(tx: &Tx) -> String {
    tx.operations
        .iter()
        .map(|op| format!("{:?} {}", op.op, op.table()))
        .collect::<Vec<_>>()
        .join(", ")
}

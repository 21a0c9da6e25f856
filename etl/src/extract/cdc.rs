use std::path::PathBuf;

use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::warn;

use crate::error::EtlResult;
use crate::extract::{Extract, JsonLinesExtract};
use crate::types::Tx;

/// A source of change transactions in commit order.
///
/// Message bus bindings implement this trait; [`TxFileExtract`] replays a dump.
pub trait CdcExtract: Extract<Item = Tx> {}

impl<E> CdcExtract for E where E: Extract<Item = Tx> {}

/// Replays transactions from a JSON-lines dump, one [`Tx`] per line.
///
/// Transactions are yielded in file order; a transaction whose id does not increase is
/// logged but still yielded.
#[derive(Debug)]
pub struct TxFileExtract {
    inner: JsonLinesExtract<Tx>,
}

impl TxFileExtract {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: JsonLinesExtract::new(path),
        }
    }
}

impl Extract for TxFileExtract {
    type Item = Tx;

    async fn run(self) -> EtlResult<BoxStream<'static, EtlResult<Tx>>> {
        let mut last_id = None;
        let stream = self.inner.run().await?.inspect(move |tx| {
            if let Ok(tx) = tx {
                if last_id.is_some_and(|last_id| tx.id <= last_id) {
                    warn!(tx_id = tx.id, last_tx_id = ?last_id, "transaction out of commit order");
                }
                last_id = Some(tx.id);
            }
        });

        Ok(stream.boxed())
    }
}

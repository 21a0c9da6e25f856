use std::path::Path;
use std::pin::pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use postgres::schema::TableModel;
use postgres::sequences::{self, OwnedSequence};
use postgres::sql;
use tokio::io::AsyncReadExt;
use tokio_postgres::Client;
use tracing::debug;

use crate::error::EtlResult;

/// Size of the blocks streamed to `COPY`.
const COPY_CHUNK_SIZE: usize = 8 * 1024;

/// Database side of a bulk load.
#[async_trait]
pub trait CopyTarget: Send {
    /// Copies the CSV file at `path` into `model` and commits. Returns the number of rows.
    async fn copy_in(&mut self, model: &'static TableModel, path: &Path) -> EtlResult<u64>;

    /// Lists the sequences attached to columns of `tables`.
    async fn owned_sequences(&mut self, tables: &[&'static str]) -> EtlResult<Vec<OwnedSequence>>;

    /// Returns the maximum of the column `sequence` is attached to.
    async fn column_max(&mut self, sequence: &OwnedSequence) -> EtlResult<Option<i64>>;

    /// Makes `value` the next value of `sequence`.
    async fn restart_sequence(&mut self, sequence: &OwnedSequence, value: i64) -> EtlResult<()>;
}

/// [`CopyTarget`] over a tokio-postgres client, with one transaction per table.
pub struct PgCopyTarget {
    client: Client,
}

impl PgCopyTarget {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CopyTarget for PgCopyTarget {
    async fn copy_in(&mut self, model: &'static TableModel, path: &Path) -> EtlResult<u64> {
        let mut file = tokio::fs::File::open(path).await?;

        let transaction = self.client.transaction().await?;
        let statement = sql::copy_in(model);
        let sink = transaction.copy_in::<_, Bytes>(statement.as_str()).await?;
        let mut sink = pin!(sink);

        let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            sink.send(Bytes::copy_from_slice(&buffer[..read])).await?;
        }

        let rows = sink.as_mut().finish().await?;
        transaction.commit().await?;
        debug!(table = %model, rows, "copied table");

        Ok(rows)
    }

    async fn owned_sequences(&mut self, tables: &[&'static str]) -> EtlResult<Vec<OwnedSequence>> {
        Ok(sequences::owned_sequences(&self.client, tables).await?)
    }

    async fn column_max(&mut self, sequence: &OwnedSequence) -> EtlResult<Option<i64>> {
        Ok(sequences::column_max(&self.client, sequence).await?)
    }

    async fn restart_sequence(&mut self, sequence: &OwnedSequence, value: i64) -> EtlResult<()> {
        Ok(sequences::restart(&self.client, sequence, value).await?)
    }
}

use async_trait::async_trait;
use postgres::schema::TableModel;
use postgres::sql;
use serde_json::Value;
use tokio_postgres::Client;
use tracing::debug;

use crate::error::EtlResult;
use crate::operation::{Operation, OperationType};
use crate::types::{Row, row_from};

/// A connection to the target database able to run one transaction at a time.
#[async_trait]
pub trait Session: Send {
    async fn begin(&mut self) -> EtlResult<()>;

    /// Applies `operation` and returns the number of affected rows.
    async fn execute(&mut self, operation: &Operation) -> EtlResult<u64>;

    /// Returns the rows of `model` matching every column of `filter`.
    async fn select(&mut self, model: &'static TableModel, filter: &Row) -> EtlResult<Vec<Row>>;

    async fn commit(&mut self) -> EtlResult<()>;

    async fn rollback(&mut self) -> EtlResult<()>;
}

/// [`Session`] backed by a tokio-postgres client.
pub struct PgSession {
    client: Client,
}

impl PgSession {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Session for PgSession {
    async fn begin(&mut self) -> EtlResult<()> {
        self.client.simple_query("begin;").await?;
        Ok(())
    }

    async fn execute(&mut self, operation: &Operation) -> EtlResult<u64> {
        let statement = match operation.op {
            OperationType::Insert => sql::insert(operation.model, &operation.data)?,
            OperationType::Update => sql::update(operation.model, &operation.data)?,
            OperationType::Delete => sql::delete(operation.model, &operation.data)?,
        };

        let affected = self
            .client
            .execute(statement.sql.as_str(), &statement.param_refs())
            .await?;
        if affected == 0 && operation.op != OperationType::Insert {
            debug!(%operation, "statement matched no row");
        }

        Ok(affected)
    }

    async fn select(&mut self, model: &'static TableModel, filter: &Row) -> EtlResult<Vec<Row>> {
        let statement = sql::select(model, filter)?;
        let rows = self
            .client
            .query(statement.sql.as_str(), &statement.param_refs())
            .await?;

        rows.iter()
            .map(|row| Ok(row_from(row.try_get::<_, Value>(0)?)))
            .collect()
    }

    async fn commit(&mut self) -> EtlResult<()> {
        self.client.simple_query("commit;").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> EtlResult<()> {
        self.client.simple_query("rollback;").await?;
        Ok(())
    }
}

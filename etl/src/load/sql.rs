use config::shared::{LoadConfig, PgConnectionConfig};
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, error, info};

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::load::{Load, LoadSummary, PgSession, Session};
use crate::operation::Operation;
use crate::state::StateStore;
use crate::tx::{ActionContext, TxActions, prepare};

/// Result of loading one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// Every operation was applied and the transaction committed.
    Committed { operations: usize, skipped_actions: usize },
    /// Operations were generated but not issued.
    DryRun { operations: usize, skipped_actions: usize },
    /// An operation failed and the transaction was rolled back.
    RolledBack,
}

/// Applies the load actions of each transaction inside one database transaction.
///
/// An action whose preparation fails is logged and skipped; the other actions of the
/// transaction still run. A failing operation rolls the whole transaction back; the error is
/// returned as [`ErrorKind::LoadError`] when `raise_on_db_error` is set and only logged
/// otherwise.
///
/// State writes follow the same boundaries: a skipped action leaves no state behind, and a
/// rolled back transaction undoes the state writes of all its actions.
pub struct SqlLoader<S> {
    session: S,
    dry_run: bool,
    raise_on_db_error: bool,
}

impl<S: Session> SqlLoader<S> {
    pub fn new(session: S) -> Self {
        Self {
            session,
            dry_run: false,
            raise_on_db_error: false,
        }
    }

    pub fn from_config(session: S, config: &LoadConfig) -> Self {
        Self::new(session)
            .with_dry_run(config.dry_run)
            .with_raise_on_db_error(config.raise_on_db_error)
    }

    /// Generates operations without issuing any write statement.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_raise_on_db_error(mut self, raise_on_db_error: bool) -> Self {
        self.raise_on_db_error = raise_on_db_error;
        self
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub async fn load_tx(
        &mut self,
        tx: TxActions,
        state: &mut StateStore,
    ) -> EtlResult<TxOutcome> {
        state.savepoint();
        let outcome = self.apply_tx(tx, state).await;
        match outcome {
            Ok(TxOutcome::Committed { .. } | TxOutcome::DryRun { .. }) => state.release_savepoint(),
            Ok(TxOutcome::RolledBack) | Err(_) => state.rollback_savepoint(),
        }

        outcome
    }

    async fn apply_tx(
        &mut self,
        tx: TxActions,
        state: &mut StateStore,
    ) -> EtlResult<TxOutcome> {
        let tx_id = tx.tx_id;
        if !self.dry_run {
            self.session.begin().await?;
        }

        let mut operations = 0;
        let mut skipped_actions = 0;
        for mut action in tx.actions {
            let name = action.name();
            let mut ctx = ActionContext {
                state: &mut *state,
                session: &mut self.session,
            };

            ctx.state.savepoint();
            let prepared = match prepare(action.as_mut(), &mut ctx).await {
                Ok(prepared) => {
                    state.release_savepoint();
                    prepared
                }
                Err(err) => {
                    state.rollback_savepoint();
                    error!(tx_id, action = name, error = %err, "action preparation failed, skipping");
                    skipped_actions += 1;
                    continue;
                }
            };
            operations += prepared.len();

            if self.dry_run {
                for operation in &prepared {
                    debug!(tx_id, action = name, %operation, "dry run");
                }
                continue;
            }

            if let Err(err) = self.apply(&prepared).await {
                return self.abort(tx_id, name, err).await;
            }
        }

        if self.dry_run {
            return Ok(TxOutcome::DryRun {
                operations,
                skipped_actions,
            });
        }

        if let Err(err) = self.session.commit().await {
            return self.abort(tx_id, "commit", err).await;
        }
        info!(tx_id, operations, "transaction loaded");

        Ok(TxOutcome::Committed {
            operations,
            skipped_actions,
        })
    }

    async fn apply(&mut self, operations: &[Operation]) -> EtlResult<()> {
        for operation in operations {
            self.session.execute(operation).await?;
        }

        Ok(())
    }

    async fn abort(
        &mut self,
        tx_id: i64,
        action: &str,
        err: EtlError,
    ) -> EtlResult<TxOutcome> {
        error!(tx_id, action, error = %err, "transaction failed, rolling back");
        if let Err(rollback_err) = self.session.rollback().await {
            error!(tx_id, error = %rollback_err, "rollback failed");
        }

        if self.raise_on_db_error {
            return Err(err.with_kind(ErrorKind::LoadError));
        }

        Ok(TxOutcome::RolledBack)
    }
}

impl<S: Session> Load for SqlLoader<S> {
    type Item = TxActions;

    async fn load(
        &mut self,
        mut input: BoxStream<'static, EtlResult<TxActions>>,
        state: &mut StateStore,
    ) -> EtlResult<LoadSummary> {
        let mut summary = LoadSummary::default();
        while let Some(tx) = input.next().await {
            match self.load_tx(tx?, state).await? {
                TxOutcome::Committed { .. } | TxOutcome::DryRun { .. } => summary.loaded += 1,
                TxOutcome::RolledBack => summary.failed += 1,
            }
        }

        Ok(summary)
    }
}

/// Transactional load into the configured database, connecting when the load starts.
pub struct PgSqlLoad {
    db: PgConnectionConfig,
    config: LoadConfig,
}

impl PgSqlLoad {
    pub fn new(db: PgConnectionConfig, config: LoadConfig) -> Self {
        Self { db, config }
    }
}

impl Load for PgSqlLoad {
    type Item = TxActions;

    async fn load(
        &mut self,
        input: BoxStream<'static, EtlResult<TxActions>>,
        state: &mut StateStore,
    ) -> EtlResult<LoadSummary> {
        let client = postgres::client::connect(&self.db).await?;
        let mut loader = SqlLoader::from_config(PgSession::new(client), &self.config);

        loader.load(input, state).await
    }
}

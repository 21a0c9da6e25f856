//! Loaders writing generated rows to the target database.

mod base;
pub mod bulk;
mod session;
mod sql;
mod state;

pub use base::{Load, LoadSummary};
pub use session::{PgSession, Session};
pub use sql::{PgSqlLoad, SqlLoader, TxOutcome};
pub use state::StateLoad;

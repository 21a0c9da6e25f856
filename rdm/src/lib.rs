//! InvenioRDM domain of the migration.
//!
//! Target table models, the transaction actions replaying the change feed, the table
//! generators and entry transforms of the backfill, and the stream registry tying them to the
//! [`etl`] engine.

pub mod actions;
pub mod generators;
pub mod models;
pub mod pids;
pub mod publish;
pub mod rows;
pub mod source;
pub mod streams;
pub mod sync;
pub mod transforms;

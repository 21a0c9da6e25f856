//! Change data capture replay and backfill engine.
//!
//! A run is a sequence of streams. Each stream pulls items from an [`extract`] source, passes
//! them through a [`transform`] stage and hands them to a [`load`] target, while a shared
//! [`state`] store keeps the identifiers that tie rows written by different streams together.
//! Change transactions are classified by the [`tx`] dispatcher into actions that turn them
//! into ordered [`operation`]s applied atomically; backfill entries are fanned out into table
//! rows staged as CSV and copied in bulk.

pub mod error;
pub mod extract;
pub mod ids;
pub mod load;
mod macros;
pub mod operation;
pub mod state;
pub mod stream;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transform;
pub mod tx;
pub mod types;

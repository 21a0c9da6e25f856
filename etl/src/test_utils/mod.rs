//! Test doubles for the engine.
//!
//! - [`database`] - in-memory [`crate::load::Session`] with transactional rollback
//! - [`copy_target`] - in-memory [`crate::load::bulk::CopyTarget`] with simulated sequences
//! - [`action`] - table-driven transform actions and a transaction builder

pub mod action;
pub mod copy_target;
pub mod database;

use std::path::PathBuf;

use rand::Rng;

pub use action::{TableAction, tx};
pub use copy_target::MemoryCopyTarget;
pub use database::MemoryDatabase;

/// Creates a fresh directory under the system temp dir.
pub fn temp_dir(prefix: &str) -> PathBuf {
    let suffix: u64 = rand::rng().random();
    let dir = std::env::temp_dir().join(format!("{prefix}-{suffix:016x}"));
    std::fs::create_dir_all(&dir).expect("failed to create temp dir");

    dir
}

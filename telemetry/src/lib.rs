//! Tracing setup shared by the migrator binary and the tests.

pub mod tracing;

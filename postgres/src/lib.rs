//! Target database surface shared by the bulk and the transactional loaders.
//!
//! Holds the declarative table models, the text rendering of values per column type, the
//! statement builders and the connection helper for the target Postgres database.

pub mod client;
pub mod schema;
pub mod sequences;
pub mod sql;
pub mod types;

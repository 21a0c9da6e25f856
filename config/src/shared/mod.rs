//! Shared configuration types for migration runs.

mod base;
mod connection;
mod migrator;
mod stream;

pub use base::ValidationError;
pub use connection::{DefaultPgConnectionOptions, IntoConnectOptions, PgConnectionConfig, TlsConfig};
pub use migrator::{LogConfig, MigratorConfig, SecretKeysConfig, StateConfig};
pub use stream::{ExtractConfig, LoadConfig, StreamConfig, TransformConfig};

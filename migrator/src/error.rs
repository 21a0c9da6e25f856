use config::LoadConfigError;
use config::shared::ValidationError;
use etl::error::EtlError;
use telemetry::tracing::TracingError;
use thiserror::Error;

pub type MigratorResult<T> = Result<T, MigratorError>;

/// Every way a migration run can fail.
#[derive(Debug, Error)]
pub enum MigratorError {
    #[error("failed to load the configuration: {0}")]
    Config(#[from] LoadConfigError),

    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to initialize logging: {0}")]
    Tracing(#[from] TracingError),

    #[error("failed to start the runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error(transparent)]
    Etl(#[from] EtlError),
}

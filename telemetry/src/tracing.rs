use std::path::Path;
use std::sync::Once;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to install the global tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),

    #[error("failed to create the log directory: {0}")]
    LogDirectory(#[from] std::io::Error),

    #[error("invalid log level `{0}`")]
    InvalidLevel(String),
}

/// Keeps the non-blocking file writer alive.
///
/// Buffered log lines are flushed when the value is dropped, so it must live until the
/// process exits.
#[must_use]
pub struct LogFlusher {
    _guard: Option<WorkerGuard>,
}

/// Installs the global subscriber for `app_name`.
///
/// Everything at `INFO` and above goes to stdout, unless `RUST_LOG` or `level` says
/// otherwise. When `log_dir` is set, `ERROR` events are also appended to a daily rotated
/// `<app_name>.log` file in that directory.
pub fn init_tracing(
    app_name: &str,
    log_dir: Option<&Path>,
    level: Option<&str>,
) -> Result<LogFlusher, TracingError> {
    let default_level = match level {
        Some(level) => level
            .parse::<LevelFilter>()
            .map_err(|_| TracingError::InvalidLevel(level.to_string()))?,
        None => LevelFilter::INFO,
    };
    let stdout_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    let stdout_layer = fmt::layer().with_target(true).with_filter(stdout_filter);

    let (file_layer, guard) = match log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)?;
            let appender = tracing_appender::rolling::daily(log_dir, format!("{app_name}.log"));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(LevelFilter::ERROR);

            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(LogFlusher { _guard: guard })
}

static INIT_TEST_TRACING: Once = Once::new();

/// Installs a test writer subscriber once per test binary.
///
/// Output is only shown when `ENABLE_TRACING` is set, so passing tests stay quiet.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_err() {
            return;
        }

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_test_writer().with_filter(filter))
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_can_be_initialized_twice() {
        init_test_tracing();
        init_test_tracing();
    }
}

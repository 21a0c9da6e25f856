use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::load::Config;
use crate::shared::{PgConnectionConfig, StreamConfig, ValidationError};

/// Top level configuration of a migration run.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MigratorConfig {
    /// Target database.
    pub db: PgConnectionConfig,
    /// State snapshot settings.
    pub state: StateConfig,
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
    /// Symmetric key material used to re-encrypt secrets.
    #[serde(default)]
    pub secret_keys: Option<SecretKeysConfig>,
    /// Per-stream settings keyed by stream name.
    #[serde(default)]
    pub streams: BTreeMap<String, StreamConfig>,
}

impl MigratorConfig {
    /// Validates the whole configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.db.validate()?;
        self.state.validate()?;

        for (name, stream) in &self.streams {
            stream.validate(name)?;
        }

        Ok(())
    }
}

impl Config for MigratorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

/// Location and caching of the state snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StateConfig {
    /// Snapshot file, reloaded on the next run.
    pub path: PathBuf,
    /// Enable write-through caching on every state table.
    #[serde(default = "default_cache")]
    pub cache: bool,
}

fn default_cache() -> bool {
    true
}

impl StateConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.path.as_os_str().is_empty() {
            return Err(ValidationError::EmptyStatePath);
        }

        Ok(())
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LogConfig {
    /// Directory of the error log file. No file logging when absent.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Default filter directive, e.g. `info` or `etl=debug`.
    #[serde(default)]
    pub level: Option<String>,
}

/// Old and new symmetric secrets used to re-encrypt stored tokens.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SecretKeysConfig {
    pub old: SecretString,
    pub new: SecretString,
}

use serde::Deserialize;
use std::path::PathBuf;

use crate::shared::ValidationError;

/// Settings of a single stream, keyed by stream name in [`crate::shared::MigratorConfig`].
///
/// Each section is forwarded to the constructor of the respective component.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StreamConfig {
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub load: LoadConfig,
}

impl StreamConfig {
    /// Validates all the sections of the stream.
    pub fn validate(&self, name: &str) -> Result<(), ValidationError> {
        self.transform.validate(name)
    }
}

/// Extract settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExtractConfig {
    /// JSON-lines file to read from. Streams without a file use a null extractor.
    #[serde(default)]
    pub filepath: Option<PathBuf>,
}

/// Transform settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TransformConfig {
    /// Number of parallel transform workers. Zero transforms in order on the calling task.
    #[serde(default)]
    pub workers: usize,
    /// Propagate per-entry failures instead of logging and skipping them.
    #[serde(default)]
    pub throw: bool,
}

impl TransformConfig {
    /// Upper bound on parallel transform workers.
    pub const MAX_WORKERS: usize = 256;

    fn validate(&self, name: &str) -> Result<(), ValidationError> {
        if self.workers > Self::MAX_WORKERS {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("streams.{name}.transform.workers"),
                constraint: format!("must be at most {}", Self::MAX_WORKERS),
            });
        }

        Ok(())
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            throw: false,
        }
    }
}

/// Load settings shared by the bulk and the transactional loaders.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoadConfig {
    /// Directory in which `tables-<timestamp>` staging directories are created.
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,
    /// Directory holding pre-existing CSVs for generators flagged with `existing_data`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Use the pre-existing CSVs of `data_dir` instead of staging new ones.
    #[serde(default)]
    pub existing_data: bool,
    /// Remove staged CSVs after loading.
    #[serde(default = "default_cleanup")]
    pub cleanup: bool,
    /// Run the transactional loader without issuing statements.
    #[serde(default)]
    pub dry_run: bool,
    /// Propagate database errors raised while applying a transaction.
    #[serde(default)]
    pub raise_on_db_error: bool,
}

fn default_tmp_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_cleanup() -> bool {
    true
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            tmp_dir: default_tmp_dir(),
            data_dir: None,
            existing_data: false,
            cleanup: default_cleanup(),
            dry_run: false,
            raise_on_db_error: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sections_use_defaults() {
        let config: StreamConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config.transform.workers, 0);
        assert!(!config.transform.throw);
        assert!(config.load.cleanup);
        assert!(!config.load.dry_run);
        assert!(config.extract.filepath.is_none());
    }

    #[test]
    fn too_many_workers_are_rejected() {
        let config: StreamConfig =
            serde_json::from_str(r#"{"transform": {"workers": 1000}}"#).unwrap();

        let err = config.validate("records").unwrap_err();
        assert!(err.to_string().contains("streams.records.transform.workers"));
    }
}

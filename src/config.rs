// ⚙️ Pipeline Config - TOML file, every section defaulted
//
// [store]   backend = "jsonl" | "sqlite" | "memory", path
// [ranking] direction = "descending" | "ascending", period = "YYYY-MM" (optional)
// [logging] level

use crate::ranking::RankDirection;
use crate::records::Period;
use crate::store::{JsonlLog, MemoryLog, RecordLog, SqliteLog, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Jsonl,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Ignored by the memory backend
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: StoreBackend::Jsonl,
            path: PathBuf::from("clean_data/clean_data.jsonl"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub direction: RankDirection,

    /// Rank this period instead of the latest one in the snapshot
    pub period: Option<Period>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub store: StoreConfig,
    pub ranking: RankingConfig,
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config = Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })?;
        debug!(path = %path.display(), "loaded pipeline config");
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }

    /// Explicit path must exist; no path means defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Open the configured store backend
    pub fn open_log(&self) -> Result<Box<dyn RecordLog>, StoreError> {
        let log: Box<dyn RecordLog> = match self.store.backend {
            StoreBackend::Jsonl => Box::new(JsonlLog::open(&self.store.path)),
            StoreBackend::Sqlite => Box::new(SqliteLog::open(&self.store.path)?),
            StoreBackend::Memory => Box::new(MemoryLog::new()),
        };
        Ok(log)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.store.backend, StoreBackend::Jsonl);
        assert_eq!(config.ranking.direction, RankDirection::Descending);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_sections() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [store]
            backend = "sqlite"

            [ranking]
            direction = "ascending"
            period = "2025-12"
            "#,
        )
        .unwrap();

        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store.path, PathBuf::from("clean_data/clean_data.jsonl"));
        assert_eq!(config.ranking.direction, RankDirection::Ascending);
        assert_eq!(config.ranking.period, Some(Period::new(2025, 12).unwrap()));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = PipelineConfig::from_toml_str("[store]\nbackend = \"parquet\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(&path, "[ranking]\nperiod = \"2025-13\"\n").unwrap();

        let err = PipelineConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("pipeline.toml"));

        let missing = PipelineConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }

    #[test]
    fn test_open_memory_log() {
        let mut config = PipelineConfig::default();
        config.store.backend = StoreBackend::Memory;

        let log = config.open_log().unwrap();
        assert_eq!(log.record_count().unwrap(), 0);
    }

    #[test]
    fn test_open_sqlite_log_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.store.backend = StoreBackend::Sqlite;
        config.store.path = dir.path().join("store.db");

        let log = config.open_log().unwrap();
        assert_eq!(log.record_count().unwrap(), 0);
        assert!(config.store.path.exists());
    }
}

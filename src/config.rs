//! Index configuration
//!
//! Every field has a serde default so a partial JSON document (or `{}`)
//! yields a usable configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, IndexResult};

/// Configuration for an [`ArtifactIndex`](crate::index::ArtifactIndex)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexConfig {
    /// Directory holding journal segments (default: "index-journal")
    #[serde(default = "default_journal_dir")]
    pub journal_dir: PathBuf,

    /// Delay between checkpoint runs (default: 15000)
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,

    /// How much later the backend start time must move before a restart is
    /// assumed (default: 5000)
    #[serde(default = "default_restart_slop_ms")]
    pub restart_slop_ms: u64,

    /// Journal append attempts per mutation (default: 3)
    #[serde(default = "default_journal_append_attempts")]
    pub journal_append_attempts: u32,

    /// Delay between journal append attempts (default: 50)
    #[serde(default = "default_journal_retry_delay_ms")]
    pub journal_retry_delay_ms: u64,

    /// Rows requested per backend page (default: 1000)
    #[serde(default = "default_query_batch_size")]
    pub query_batch_size: usize,

    /// Capacity of the recently-invalidated AU cache (default: 256)
    #[serde(default = "default_invalidation_cache_capacity")]
    pub invalidation_cache_capacity: usize,

    /// First readiness retry delay (default: 100)
    #[serde(default = "default_readiness_initial_backoff_ms")]
    pub readiness_initial_backoff_ms: u64,

    /// Readiness retry delay cap (default: 10000)
    #[serde(default = "default_readiness_max_backoff_ms")]
    pub readiness_max_backoff_ms: u64,

    /// Emit a warning every this many failed readiness probes (default: 10)
    #[serde(default = "default_readiness_warn_every")]
    pub readiness_warn_every: u32,

    /// Hard-commit and drop all segments on a clean stop (default: true)
    #[serde(default = "default_final_checkpoint_on_stop")]
    pub final_checkpoint_on_stop: bool,
}

fn default_journal_dir() -> PathBuf {
    PathBuf::from("index-journal")
}

fn default_checkpoint_interval_ms() -> u64 {
    15_000
}

fn default_restart_slop_ms() -> u64 {
    5_000
}

fn default_journal_append_attempts() -> u32 {
    3
}

fn default_journal_retry_delay_ms() -> u64 {
    50
}

fn default_query_batch_size() -> usize {
    1000
}

fn default_invalidation_cache_capacity() -> usize {
    256
}

fn default_readiness_initial_backoff_ms() -> u64 {
    100
}

fn default_readiness_max_backoff_ms() -> u64 {
    10_000
}

fn default_readiness_warn_every() -> u32 {
    10
}

fn default_final_checkpoint_on_stop() -> bool {
    true
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            journal_dir: default_journal_dir(),
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            restart_slop_ms: default_restart_slop_ms(),
            journal_append_attempts: default_journal_append_attempts(),
            journal_retry_delay_ms: default_journal_retry_delay_ms(),
            query_batch_size: default_query_batch_size(),
            invalidation_cache_capacity: default_invalidation_cache_capacity(),
            readiness_initial_backoff_ms: default_readiness_initial_backoff_ms(),
            readiness_max_backoff_ms: default_readiness_max_backoff_ms(),
            readiness_warn_every: default_readiness_warn_every(),
            final_checkpoint_on_stop: default_final_checkpoint_on_stop(),
        }
    }
}

impl IndexConfig {
    /// Create a config journaling into `journal_dir`
    pub fn with_journal_dir(journal_dir: impl Into<PathBuf>) -> Self {
        Self {
            journal_dir: journal_dir.into(),
            ..Default::default()
        }
    }

    /// Parse a JSON document
    pub fn from_json_str(json: &str) -> IndexResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| IndexError::Config(format!("Failed to parse index config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> IndexResult<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            IndexError::Config(format!(
                "Failed to read index config {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&json)
    }

    /// Reject values the index cannot run with
    pub fn validate(&self) -> IndexResult<()> {
        if self.journal_dir.as_os_str().is_empty() {
            return Err(IndexError::Config("journal_dir must not be empty".into()));
        }
        if self.checkpoint_interval_ms == 0 {
            return Err(IndexError::Config(
                "checkpoint_interval_ms must be positive".into(),
            ));
        }
        if self.journal_append_attempts == 0 {
            return Err(IndexError::Config(
                "journal_append_attempts must be at least 1".into(),
            ));
        }
        if self.query_batch_size == 0 {
            return Err(IndexError::Config("query_batch_size must be positive".into()));
        }
        if self.invalidation_cache_capacity == 0 {
            return Err(IndexError::Config(
                "invalidation_cache_capacity must be positive".into(),
            ));
        }
        if self.readiness_initial_backoff_ms > self.readiness_max_backoff_ms {
            return Err(IndexError::Config(
                "readiness_initial_backoff_ms exceeds readiness_max_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }

    pub fn restart_slop(&self) -> Duration {
        Duration::from_millis(self.restart_slop_ms)
    }

    pub fn journal_retry_delay(&self) -> Duration {
        Duration::from_millis(self.journal_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IndexConfig::default();
        assert_eq!(config.checkpoint_interval_ms, 15_000);
        assert_eq!(config.journal_append_attempts, 3);
        assert!(config.final_checkpoint_on_stop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            IndexConfig::from_json_str(r#"{"journal_dir": "/var/index", "query_batch_size": 10}"#)
                .unwrap();
        assert_eq!(config.journal_dir, PathBuf::from("/var/index"));
        assert_eq!(config.query_batch_size, 10);
        assert_eq!(config.restart_slop_ms, 5_000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = IndexConfig::from_json_str(r#"{"journal_append_attempts": 0}"#);
        assert!(matches!(result, Err(IndexError::Config(_))));

        let config = IndexConfig {
            readiness_initial_backoff_ms: 50_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("index.json");
        fs::write(&path, r#"{"checkpoint_interval_ms": 250}"#).unwrap();

        let config = IndexConfig::load(&path).unwrap();
        assert_eq!(config.checkpoint_interval(), Duration::from_millis(250));
    }
}

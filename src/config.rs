//! Configuration file parser for ~/.config/feedmill/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as a warning, since they are
//! usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::DEFAULT_MAX_FEED_BYTES;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A key parsed but holds a value the pipeline cannot run with.
    #[error("Invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. `None` means `news.db` in the config directory.
    pub database_path: Option<PathBuf>,

    /// Number of concurrent ingestion workers.
    pub worker_count: usize,

    /// Capacity of the bounded work queue between the producer and workers.
    pub queue_capacity: usize,

    /// Language assigned when neither the channel nor the URL suffix gives one.
    pub default_language: String,

    /// Per-request timeout in seconds. 0 = no client-side timeout.
    pub fetch_timeout_secs: u64,

    /// Largest feed response accepted, in bytes.
    pub max_feed_bytes: usize,

    /// Source list document read by `feedmill import` when no file is given.
    pub sources_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            worker_count: 5,
            queue_capacity: 100,
            default_language: "tr".to_string(),
            fetch_timeout_secs: 30,
            max_feed_bytes: DEFAULT_MAX_FEED_BYTES,
            sources_file: PathBuf::from("rss_feeds.json"),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "database_path",
        "worker_count",
        "queue_capacity",
        "default_language",
        "fetch_timeout_secs",
        "max_feed_bytes",
        "sources_file",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Zero workers or queue capacity → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            workers = config.worker_count,
            queue_capacity = config.queue_capacity,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid {
                key: "worker_count",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "queue_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.default_language.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "default_language",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Client-side fetch timeout, `None` when disabled.
    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_secs > 0).then(|| Duration::from_secs(self.fetch_timeout_secs))
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Store Configuration
//!
//! Runtime settings for the node store. Values come from `StoreConfig::default()`
//! and can be overridden from the environment with `StoreConfig::from_env()`;
//! the struct also deserializes with serde so embedders can load it from
//! their own configuration files.
//!
//! | Setting | Default | Environment variable |
//! |---|---|---|
//! | `db_path` | `./data/nodegraph.db` | `NODEGRAPH_DB_PATH` |
//! | `lock_timeout_ms` | 10000 | `NODEGRAPH_LOCK_TIMEOUT_MS` |
//! | `refresh_timeout_ms` | 10000 | `NODEGRAPH_REFRESH_TIMEOUT_MS` |
//! | `batch_size` | 10000 | `NODEGRAPH_BATCH_SIZE` |
//! | `sequence_increment` | 1 | `NODEGRAPH_SEQUENCE_INCREMENT` |
//! | `default_namespace` | `urn:uuid:` | `NODEGRAPH_DEFAULT_NAMESPACE` |
//! | `max_term_length` | 8191 | `NODEGRAPH_MAX_TERM_LENGTH` |
//! | `track_revisions` | true | `NODEGRAPH_TRACK_REVISIONS` |
//! | `refresh_interval_ms` | unset | `NODEGRAPH_REFRESH_INTERVAL_MS` |

use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid_value(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the libsql database file
    pub db_path: PathBuf,

    /// Bounded wait for the process-wide read/write lock
    pub lock_timeout_ms: u64,

    /// Bounded wait for the index refresh barrier after a write
    pub refresh_timeout_ms: u64,

    /// Maximum rows per multi-row INSERT statement
    pub batch_size: usize,

    /// Size of the block leased from a backing sequence per round trip
    pub sequence_increment: i64,

    /// Namespace prepended to generated URIs when neither the write options
    /// nor the graph supply one
    pub default_namespace: String,

    /// Longest indexable keyword, in characters
    pub max_term_length: usize,

    /// Allocate revisions and mirror writes into the audit tables
    pub track_revisions: bool,

    /// Period of the background index refresher; `None` refreshes only on demand
    pub refresh_interval_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/nodegraph.db"),
            lock_timeout_ms: 10_000,
            refresh_timeout_ms: 10_000,
            batch_size: 10_000,
            sequence_increment: 1,
            default_namespace: "urn:uuid:".to_string(),
            max_term_length: 8191,
            track_revisions: true,
            refresh_interval_ms: None,
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by any `NODEGRAPH_*` variables that are set
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` but reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("NODEGRAPH_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(ms) = parse_var(&lookup, "NODEGRAPH_LOCK_TIMEOUT_MS")? {
            config.lock_timeout_ms = ms;
        }
        if let Some(ms) = parse_var(&lookup, "NODEGRAPH_REFRESH_TIMEOUT_MS")? {
            config.refresh_timeout_ms = ms;
        }
        if let Some(size) = parse_var(&lookup, "NODEGRAPH_BATCH_SIZE")? {
            config.batch_size = size;
        }
        if let Some(increment) = parse_var(&lookup, "NODEGRAPH_SEQUENCE_INCREMENT")? {
            config.sequence_increment = increment;
        }
        if let Some(ns) = lookup("NODEGRAPH_DEFAULT_NAMESPACE") {
            config.default_namespace = ns;
        }
        if let Some(len) = parse_var(&lookup, "NODEGRAPH_MAX_TERM_LENGTH")? {
            config.max_term_length = len;
        }
        if let Some(track) = parse_var(&lookup, "NODEGRAPH_TRACK_REVISIONS")? {
            config.track_revisions = track;
        }
        if let Some(ms) = parse_var(&lookup, "NODEGRAPH_REFRESH_INTERVAL_MS")? {
            config.refresh_interval_ms = Some(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_db_path(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = db_path.into();
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid_value("batch_size", "0", "must be positive"));
        }
        if self.sequence_increment < 1 {
            return Err(ConfigError::invalid_value(
                "sequence_increment",
                self.sequence_increment.to_string(),
                "must be at least 1",
            ));
        }
        if self.max_term_length == 0 {
            return Err(ConfigError::invalid_value(
                "max_term_length",
                "0",
                "must be positive",
            ));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::invalid_value(key, raw.clone(), e.to_string())),
    }
}

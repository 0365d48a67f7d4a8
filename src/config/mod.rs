//! Runtime configuration.
//!
//! Values come from a TOML file; every field has a default so an empty (or
//! absent) file yields a working in-process broker. `RELAYMQ_*` environment
//! variables override file values.

use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::core::queue::QueueOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("config parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub dispatch: DispatchConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub queues: Vec<QueueDecl>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BrokerConfig {
    /// Default `max_retries` for messages published without one.
    pub retry_attempts: u32,
    /// Base of the exponential redelivery delay.
    pub retry_delay_ms: u64,
    pub max_event_log_size: usize,
    pub default_max_queue_size: usize,
    /// Deadline for a single handler invocation.
    pub handler_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_ms: 1000,
            max_event_log_size: 10_000,
            default_max_queue_size: 1000,
            handler_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    pub tick_interval_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Redis,
}

impl std::str::FromStr for StorageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageKind::Memory),
            "redis" => Ok(StorageKind::Redis),
            other => Err(ConfigError::Parse(format!("unknown storage backend '{other}'"))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageKind,
    pub url: String,
    pub key_prefix: String,
    pub connect_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageKind::Memory,
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "relaymq:queue:".to_string(),
            connect_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `"info,relaymq::core=debug"`.
    pub level: String,
    pub thread_ids: bool,
    pub targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            thread_ids: true,
            targets: true,
        }
    }
}

/// A queue declared up front in the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct QueueDecl {
    pub name: String,
    pub max_size: Option<usize>,
    pub persistent_storage: Option<bool>,
    pub priority_ordering: Option<bool>,
    pub dead_letter_enabled: Option<bool>,
}

impl QueueDecl {
    pub fn options(&self, default_max_size: usize) -> QueueOptions {
        let base = QueueOptions::default();
        QueueOptions {
            max_size: self.max_size.unwrap_or(default_max_size),
            persistent_storage: self.persistent_storage.unwrap_or(base.persistent_storage),
            priority_ordering: self.priority_ordering.unwrap_or(base.priority_ordering),
            dead_letter_enabled: self.dead_letter_enabled.unwrap_or(base.dead_letter_enabled),
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&raw)?;
    Ok(config)
}

impl Config {
    /// Load configuration from an optional file path and environment variables.
    ///
    /// Precedence: built-in defaults, then the file (`path` or `RELAYMQ_CONFIG`),
    /// then environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let effective_path = path
            .map(str::to_string)
            .or_else(|| env::var("RELAYMQ_CONFIG").ok());

        let mut config = match effective_path {
            Some(p) => load_config(p)?,
            None => Config::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Applies `RELAYMQ_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RELAYMQ_STORAGE_BACKEND") {
            self.storage.backend = v.parse()?;
        }

        if let Some(v) = lookup("RELAYMQ_STORAGE_URL") {
            self.storage.url = v;
        }

        if let Some(v) = lookup("RELAYMQ_RETRY_ATTEMPTS") {
            self.broker.retry_attempts = v
                .parse()
                .map_err(|e| ConfigError::Parse(format!("RELAYMQ_RETRY_ATTEMPTS: {e}")))?;
        }

        if let Some(v) = lookup("RELAYMQ_RETRY_DELAY_MS") {
            self.broker.retry_delay_ms = v
                .parse()
                .map_err(|e| ConfigError::Parse(format!("RELAYMQ_RETRY_DELAY_MS: {e}")))?;
        }

        if let Some(v) = lookup("RELAYMQ_TICK_INTERVAL_MS") {
            self.dispatch.tick_interval_ms = v
                .parse()
                .map_err(|e| ConfigError::Parse(format!("RELAYMQ_TICK_INTERVAL_MS: {e}")))?;
        }

        if let Some(v) = lookup("RELAYMQ_LOG_LEVEL") {
            self.logging.level = v;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.broker.retry_attempts, 3);
        assert_eq!(cfg.broker.retry_delay_ms, 1000);
        assert_eq!(cfg.broker.max_event_log_size, 10_000);
        assert_eq!(cfg.dispatch.tick_interval_ms, 100);
        assert_eq!(cfg.storage.backend, StorageKind::Memory);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.queues.is_empty());
    }

    #[test]
    fn overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = [
            ("RELAYMQ_STORAGE_BACKEND", "Redis"),
            ("RELAYMQ_RETRY_ATTEMPTS", "7"),
            ("RELAYMQ_TICK_INTERVAL_MS", "25"),
            ("RELAYMQ_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(cfg.storage.backend, StorageKind::Redis);
        assert_eq!(cfg.broker.retry_attempts, 7);
        assert_eq!(cfg.dispatch.tick_interval_ms, 25);
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.broker.retry_delay_ms, 1000);
    }

    #[test]
    fn bad_override_is_rejected() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_overrides(|k| (k == "RELAYMQ_RETRY_DELAY_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn declared_queue_fills_unset_options() {
        let decl = QueueDecl {
            name: "alerts".into(),
            max_size: None,
            persistent_storage: Some(false),
            priority_ordering: None,
            dead_letter_enabled: None,
        };
        let opts = decl.options(250);
        assert_eq!(opts.max_size, 250);
        assert!(!opts.persistent_storage);
        assert!(opts.priority_ordering);
        assert!(opts.dead_letter_enabled);
    }
}

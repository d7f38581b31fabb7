//! Engine configuration.
//!
//! Values come from defaults, an optional TOML or JSON document, and finally
//! environment overrides:
//!
//! | Variable                   | Field                    |
//! |----------------------------|--------------------------|
//! | `MEALY_MEMORY_REDIS_URL`   | `redis_url`              |
//! | `MEALY_MEMORY_WORKERS`     | `workers`                |
//! | `MEALY_MEMORY_SCAN_BATCH`  | `scan_batch`             |
//! | `MEALY_MEMORY_RETAIN`      | `retain_previous_orders` |
//! | `MEALY_MEMORY_KEY_PREFIX`  | `key_prefix`             |

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, MemoryResult};
use crate::retry::BackoffPolicy;

/// Configuration for a memory-order run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker count; `None` uses the available parallelism.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Batch-size hint for cursor iteration.
    pub scan_batch: usize,

    /// Keep every order's trace sets in the store for inspection.
    pub retain_previous_orders: bool,

    /// Prefix prepended to every store key.
    pub key_prefix: String,

    /// Redis connection URL.
    pub redis_url: String,

    /// Retry policy for transient store failures.
    pub backoff: BackoffPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            scan_batch: 256,
            retain_previous_orders: false,
            key_prefix: String::new(),
            redis_url: "redis://127.0.0.1:6379/".to_string(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Config for tests and small automata: tiny batches and millisecond backoff.
    pub fn fast() -> Self {
        Self {
            scan_batch: 8,
            backoff: BackoffPolicy::fast(),
            ..Default::default()
        }
    }

    /// Set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Keep all orders in the store.
    pub fn with_retention(mut self, retain: bool) -> Self {
        self.retain_previous_orders = retain;
        self
    }

    /// Set the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> MemoryResult<Self> {
        Self::default().with_env_overrides()
    }

    /// Load a TOML file, then apply environment overrides.
    pub fn load_from_toml<P: AsRef<Path>>(path: P) -> MemoryResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)?.with_env_overrides()
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> MemoryResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document.
    pub fn from_json(json: &str) -> MemoryResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> MemoryResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Apply `MEALY_MEMORY_*` environment variables.
    pub fn with_env_overrides(mut self) -> MemoryResult<Self> {
        if let Ok(url) = env::var("MEALY_MEMORY_REDIS_URL") {
            self.redis_url = url;
        }
        if let Ok(workers) = env::var("MEALY_MEMORY_WORKERS") {
            self.workers = Some(parse_var("MEALY_MEMORY_WORKERS", &workers)?);
        }
        if let Ok(batch) = env::var("MEALY_MEMORY_SCAN_BATCH") {
            self.scan_batch = parse_var("MEALY_MEMORY_SCAN_BATCH", &batch)?;
        }
        if let Ok(retain) = env::var("MEALY_MEMORY_RETAIN") {
            self.retain_previous_orders = parse_var("MEALY_MEMORY_RETAIN", &retain)?;
        }
        if let Ok(prefix) = env::var("MEALY_MEMORY_KEY_PREFIX") {
            self.key_prefix = prefix;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.workers == Some(0) {
            return Err(MemoryError::Config("workers must be at least 1".to_string()));
        }
        if self.scan_batch == 0 {
            return Err(MemoryError::Config(
                "scan_batch must be at least 1".to_string(),
            ));
        }
        if self.backoff.multiplier < 1.0 {
            return Err(MemoryError::Config(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.backoff.multiplier
            )));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> MemoryResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MemoryError::Config(format!("invalid value for {name}: {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_partial_document() {
        let config = EngineConfig::from_toml_str(
            r#"
            workers = 4
            retain_previous_orders = true

            [backoff]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.workers, Some(4));
        assert!(config.retain_previous_orders);
        assert_eq!(config.scan_batch, 256);
        assert_eq!(config.backoff.max_attempts, 5);
        assert_eq!(config.backoff.base_delay_ms, 1_000);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = EngineConfig::fast().with_workers(2).with_key_prefix("run7:");
        let parsed = EngineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            EngineConfig::from_toml_str("workers = 0"),
            Err(MemoryError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("scan_batch = 0"),
            Err(MemoryError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("workers = \"many\""),
            Err(MemoryError::Toml(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "scan_batch = 32\nkey_prefix = \"t:\"\n").unwrap();

        let config = EngineConfig::load_from_toml(&path).unwrap();
        assert_eq!(config.scan_batch, 32);
        assert!(matches!(
            EngineConfig::load_from_toml(dir.path().join("missing.toml")),
            Err(MemoryError::Io(_))
        ));
    }

    #[test]
    fn test_parse_var() {
        assert_eq!(parse_var::<usize>("X", " 8 ").unwrap(), 8);
        assert!(parse_var::<bool>("X", "yes").is_err());
    }
}

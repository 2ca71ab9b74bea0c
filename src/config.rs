//! Engine runtime configuration.
//!
//! Batch and retry tunables load from `config/config.toml` (optional) with
//! `TESSERA__*` environment variables taking precedence, e.g.
//! `TESSERA__ENGINE__BATCH_SIZE=50`.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Write batching and retry settings applied to every persister built from
/// this configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Number of entities grouped into one write batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Bounded attempt count for transient write faults (1 = no retry).
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    /// Sleep between retry attempts, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_batch_size() -> usize {
    100
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    50
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl EngineConfig {
    /// Load the engine configuration from `config/config.toml`, falling back
    /// to environment variables, then to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("config/config.toml").required(false))
            .add_source(Environment::with_prefix("TESSERA").separator("__"))
            .build()?;

        match settings.get::<EngineConfig>("engine") {
            Ok(engine) => Ok(engine),
            // Missing section is fine; anything else is a real error.
            Err(ConfigError::NotFound(_)) => Ok(EngineConfig::default()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.retry_max_attempts, 3);
        assert_eq!(cfg.retry_backoff_ms, 50);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let cfg = EngineConfig::load().expect("load should fall back to defaults");
        assert!(cfg.batch_size > 0);
        assert!(cfg.retry_max_attempts >= 1);
    }
}

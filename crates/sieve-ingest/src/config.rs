//! Ingestion service configuration.
//!
//! Supports loading from a TOML file with environment variable overrides
//! (`PORT`, `QUEUE_TYPE`, `QUEUE_URL`/`BROKER_URL`).

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use sieve_common::QueueConfig;

/// Top-level configuration for the ingestion service.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Listen port.
    pub port: u16,

    /// Logging level.
    pub log_level: String,

    /// Queue adapter selection.
    pub queue: QueueConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            log_level: "info".to_string(),
            queue: QueueConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TomlConfig {
    port: Option<u16>,
    log_level: Option<String>,
    queue_type: Option<String>,
    queue_url: Option<String>,
}

impl IngestConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        let mut config = Self::default();

        if let Some(port) = file.port {
            config.port = port;
        }
        if let Some(log_level) = file.log_level {
            config.log_level = log_level;
        }
        if let Some(queue_type) = file
            .queue_type
            .as_deref()
            .and_then(sieve_common::QueueType::from_str)
        {
            config.queue.queue_type = queue_type;
        }
        if let Some(queue_url) = file.queue_url {
            config.queue.url = queue_url;
        }

        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = std::env::var("PORT").ok().and_then(|s| s.parse().ok()) {
            self.port = port;
        }
        self.queue.apply_env_overrides();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_common::QueueType;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.queue.queue_type, QueueType::Memory);
    }

    #[test]
    fn test_from_toml() {
        let config = IngestConfig::from_toml_str(
            r#"
            port = 9000
            log_level = "debug"
            queue_type = "broker"
            queue_url = "redis://broker:6379"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.queue.queue_type, QueueType::Broker);
        assert_eq!(config.queue.url, "redis://broker:6379");
    }

    #[test]
    fn test_from_toml_partial() {
        let config = IngestConfig::from_toml_str("port = 8123").unwrap();
        assert_eq!(config.port, 8123);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(IngestConfig::from_toml_str("port = {").is_err());
    }
}

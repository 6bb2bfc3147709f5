//! Query service configuration.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use sieve_common::{AnalyticalConfig, BlobConfig};

/// Top-level configuration for the query API.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Listen port.
    pub port: u16,

    /// Logging level.
    pub log_level: String,

    /// Analytical-store connection.
    pub analytical: AnalyticalConfig,

    /// Blob-store connection (payload hydration).
    pub blob: BlobConfig,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            log_level: "info".to_string(),
            analytical: AnalyticalConfig::default(),
            blob: BlobConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TomlConfig {
    port: Option<u16>,
    log_level: Option<String>,
    analytical_url: Option<String>,
    analytical_database: Option<String>,
    blob_endpoint: Option<String>,
    blob_bucket: Option<String>,
}

impl QueryConfig {
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
        if let Some(url) = file.analytical_url {
            config.analytical.url = url;
        }
        if let Some(database) = file.analytical_database {
            config.analytical.database = database;
        }
        if let Some(endpoint) = file.blob_endpoint {
            config.blob.endpoint = endpoint;
        }
        if let Some(bucket) = file.blob_bucket {
            config.blob.bucket = bucket;
        }

        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = std::env::var("PORT").ok().and_then(|s| s.parse().ok()) {
            self.port = port;
        }
        self.analytical.apply_env_overrides();
        self.blob.apply_env_overrides();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueryConfig::default();
        assert_eq!(config.port, 8081);
        assert_eq!(config.analytical.database, "sieve");
    }

    #[test]
    fn test_from_toml() {
        let config = QueryConfig::from_toml_str(
            r#"
            port = 9090
            analytical_url = "http://clickhouse:8123"
            blob_bucket = "payloads"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.analytical.url, "http://clickhouse:8123");
        assert_eq!(config.blob.bucket, "payloads");
    }
}

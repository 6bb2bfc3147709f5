//! Worker configuration.
//!
//! Supports loading from a TOML file with environment variable overrides
//! (`POLL_INTERVAL_MS`, `BATCH_SIZE`, `QUEUE_*`, `ANALYTICAL_*`, `BLOB_*`).

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use sieve_common::{AnalyticalConfig, BlobConfig, QueueConfig};

/// Top-level configuration for the processor worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Delay between queue polls.
    pub poll_interval: Duration,

    /// Maximum messages per poll.
    pub batch_size: usize,

    /// Logging level.
    pub log_level: String,

    /// Queue adapter selection.
    pub queue: QueueConfig,

    /// Analytical-store connection.
    pub analytical: AnalyticalConfig,

    /// Blob-store connection.
    pub blob: BlobConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            batch_size: 10,
            log_level: "info".to_string(),
            queue: QueueConfig::default(),
            analytical: AnalyticalConfig::default(),
            blob: BlobConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TomlConfig {
    poll_interval_ms: Option<u64>,
    batch_size: Option<usize>,
    log_level: Option<String>,
    queue_type: Option<String>,
    queue_url: Option<String>,
    analytical_url: Option<String>,
    analytical_database: Option<String>,
    blob_endpoint: Option<String>,
    blob_bucket: Option<String>,
}

impl WorkerConfig {
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

        if let Some(poll_ms) = file.poll_interval_ms {
            config.poll_interval = Duration::from_millis(poll_ms);
        }
        if let Some(batch_size) = file.batch_size {
            config.batch_size = batch_size;
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
        if let Some(poll_ms) = std::env::var("POLL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.poll_interval = Duration::from_millis(poll_ms);
        }
        if let Some(batch_size) = std::env::var("BATCH_SIZE").ok().and_then(|s| s.parse().ok()) {
            self.batch_size = batch_size;
        }
        self.queue.apply_env_overrides();
        self.analytical.apply_env_overrides();
        self.blob.apply_env_overrides();
    }
}

//! SDK configuration.
//!
//! Everything has a sensible default; deployments override through the
//! environment (`CAPTURE_LEVEL`, `INGESTION_URL`, `BUFFER_*`,
//! `TRANSPORT_*`).

use std::time::Duration;

/// How much of each step to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureLevel {
    /// Counts only: no decision events are emitted.
    MetricsOnly,
    /// Boundary items plus a deterministic uniform sample of the interior.
    #[default]
    Sampled,
    /// Every item.
    Full,
}

impl CaptureLevel {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "metrics_only" => Some(CaptureLevel::MetricsOnly),
            "sampled" => Some(CaptureLevel::Sampled),
            "full" => Some(CaptureLevel::Full),
            _ => None,
        }
    }
}

/// Event buffer knobs.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Hard bound on buffered events; the oldest event is dropped beyond it.
    pub max_size: usize,
    /// Buffered events that trigger a flush.
    pub batch_size: usize,
    /// Periodic flush interval.
    pub flush_interval: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            batch_size: 100,
            flush_interval: Duration::from_millis(5000),
        }
    }
}

/// Transport knobs.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Ingestion base URL; envelopes go to `{api_url}/ingest`.
    pub api_url: String,
    /// Per-attempt timeout. A timed-out attempt is not retried.
    pub timeout: Duration,
    /// Attempt budget.
    pub max_retries: u32,
    /// Base backoff delay; attempt `a` waits `retry_delay * 2^a`.
    pub retry_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// Top-level SDK configuration.
#[derive(Debug, Clone, Default)]
pub struct SdkConfig {
    pub capture_level: CaptureLevel,
    pub buffer: BufferConfig,
    pub transport: TransportConfig,
}

impl SdkConfig {
    /// Defaults overridden by the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply recognised environment keys.
    pub fn apply_env_overrides(&mut self) {
        if let Some(level) = std::env::var("CAPTURE_LEVEL")
            .ok()
            .and_then(|s| CaptureLevel::from_str(&s))
        {
            self.capture_level = level;
        }
        if let Ok(url) = std::env::var("INGESTION_URL") {
            self.transport.api_url = url;
        }

        if let Some(max_size) = env_usize("BUFFER_MAX_SIZE") {
            self.buffer.max_size = max_size;
        }
        if let Some(batch_size) = env_usize("BUFFER_BATCH_SIZE") {
            self.buffer.batch_size = batch_size;
        }
        if let Some(flush_ms) = env_u64("BUFFER_FLUSH_MS") {
            self.buffer.flush_interval = Duration::from_millis(flush_ms);
        }

        if let Some(timeout_ms) = env_u64("TRANSPORT_TIMEOUT_MS") {
            self.transport.timeout = Duration::from_millis(timeout_ms);
        }
        if let Some(max_retries) = env_u64("TRANSPORT_MAX_RETRIES") {
            self.transport.max_retries = max_retries as u32;
        }
        if let Some(delay_ms) = env_u64("TRANSPORT_RETRY_DELAY_MS") {
            self.transport.retry_delay = Duration::from_millis(delay_ms);
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse().ok()
}

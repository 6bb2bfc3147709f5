//! Retry/backoff HTTP sender for event envelopes.
//!
//! The transport is the SDK's error wall: every failure mode — DNS,
//! connection refused, 5xx, partial body — resolves to silence from the
//! application's perspective. Failures are visible only through the stats
//! counters, a `debug` log line, and the optional observer callback.
//!
//! Retry policy: up to `max_retries` attempts with exponential backoff
//! (`retry_delay * 2^attempt`). Per-attempt timeouts are treated as
//! non-retryable so a slow collector cannot eat the caller's latency budget
//! several times over.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sieve_common::{DecisionEvent, EventEnvelope, Run, Step};
use thiserror::Error;

use crate::config::TransportConfig;
use crate::observer::{CaptureObserver, NoopObserver};

#[derive(Debug, Error)]
enum TransportError {
    #[error("attempt timed out")]
    Timeout,

    #[error("request failed: {0}")]
    Http(reqwest::Error),

    #[error("server returned {0}")]
    Status(reqwest::StatusCode),
}

/// Counters for transport activity.
#[derive(Debug, Default)]
pub struct TransportStats {
    /// Envelopes delivered with a 2xx response.
    pub delivered: AtomicU64,
    /// Individual retry attempts beyond the first.
    pub retries: AtomicU64,
    /// Envelopes abandoned after exhausting the policy.
    pub failures: AtomicU64,
}

impl TransportStats {
    pub fn snapshot(&self) -> TransportStatsSnapshot {
        TransportStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of transport stats.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStatsSnapshot {
    pub delivered: u64,
    pub retries: u64,
    pub failures: u64,
}

/// HTTP sender for the ingestion endpoint.
pub struct Transport {
    http: reqwest::Client,
    config: TransportConfig,
    stats: Arc<TransportStats>,
    observer: Arc<dyn CaptureObserver>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self::with_observer(config, Arc::new(NoopObserver))
    }

    pub fn with_observer(config: TransportConfig, observer: Arc<dyn CaptureObserver>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            config,
            stats: Arc::new(TransportStats::default()),
            observer,
        }
    }

    /// Shared stats handle.
    pub fn stats(&self) -> Arc<TransportStats> {
        Arc::clone(&self.stats)
    }

    /// Send a batch of decision events. Never fails observably.
    pub async fn send_decision_events(&self, events: &[DecisionEvent]) {
        if events.is_empty() {
            return;
        }
        self.send(&EventEnvelope::Decisions(events.to_vec())).await;
    }

    /// Send a run snapshot. Never fails observably.
    pub async fn send_run(&self, run: &Run) {
        self.send(&EventEnvelope::Run(run.clone())).await;
    }

    /// Send a step snapshot. Never fails observably.
    pub async fn send_step(&self, step: &Step) {
        self.send(&EventEnvelope::Step(step.clone())).await;
    }

    async fn send(&self, envelope: &EventEnvelope) {
        match self.dispatch(envelope).await {
            Ok(()) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    envelope_type = envelope.type_name(),
                    error = %e,
                    "Dropping envelope after transport failure"
                );
                self.observer.on_transport_failure(&e.to_string());
            }
        }
    }

    async fn dispatch(&self, envelope: &EventEnvelope) -> Result<(), TransportError> {
        let url = format!("{}/ingest", self.config.api_url.trim_end_matches('/'));
        let attempts = self.config.max_retries.max(1);

        let mut last_error = TransportError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = self.config.retry_delay * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(backoff).await;
                self.stats.retries.fetch_add(1, Ordering::Relaxed);
            }

            match self.http.post(&url).json(envelope).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    last_error = TransportError::Status(response.status());
                }
                Err(e) if e.is_timeout() => {
                    // Timeouts exhaust the budget immediately.
                    return Err(TransportError::Timeout);
                }
                Err(e) => {
                    last_error = TransportError::Http(e);
                }
            }
        }

        Err(last_error)
    }
}

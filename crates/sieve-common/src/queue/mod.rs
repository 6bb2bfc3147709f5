//! Durable queue abstraction between ingestion and the processor worker.
//!
//! The contract is broker-agnostic: durable FIFO, at-least-once delivery,
//! manual ack/nack, bounded poll. Three adapters implement it:
//!
//! - [`MemoryQueue`]: in-process, for tests and single-binary setups.
//! - [`HttpQueue`]: pushes to a queue-fronting HTTP endpoint, for local
//!   development without a broker.
//! - [`BrokerQueue`]: Redis Streams with a consumer group, for production.
//!   Unacked entries stay pending and are reclaimed after an idle window,
//!   which is what gives at-least-once semantics across worker restarts.

mod broker;
mod http;
mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::envelope::EventEnvelope;
use crate::model::{DecisionEvent, Run, Step};

pub use broker::{BrokerQueue, BrokerQueueConfig};
pub use http::HttpQueue;
pub use memory::MemoryQueue;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker error: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("queue http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("queue payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("unknown receipt: {0}")]
    UnknownReceipt(String),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Opaque delivery receipt, echoed back on ack/nack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt(pub String);

/// One message pulled off the queue.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub receipt: Receipt,
    pub envelope: EventEnvelope,
}

/// Durable FIFO with manual acknowledgement.
#[async_trait]
pub trait QueueAdapter: Send + Sync {
    /// Enqueue one envelope.
    async fn push_envelope(&self, envelope: &EventEnvelope) -> Result<(), QueueError>;

    /// Pull up to `max` messages. Non-blocking: returns quickly with an
    /// empty batch when the queue is empty.
    async fn poll(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge successful processing; the message will not redeliver.
    async fn ack(&self, receipt: &Receipt) -> Result<(), QueueError>;

    /// Return a message for redelivery.
    async fn nack(&self, receipt: &Receipt) -> Result<(), QueueError>;

    async fn push_decision_event(&self, event: &DecisionEvent) -> Result<(), QueueError> {
        self.push_envelope(&EventEnvelope::Decision(event.clone()))
            .await
    }

    /// Batch push. Events are enqueued individually so the worker's
    /// per-message error containment applies to each one.
    async fn push_decision_events(&self, events: &[DecisionEvent]) -> Result<(), QueueError> {
        for event in events {
            self.push_decision_event(event).await?;
        }
        Ok(())
    }

    async fn push_run(&self, run: &Run) -> Result<(), QueueError> {
        self.push_envelope(&EventEnvelope::Run(run.clone())).await
    }

    async fn push_step(&self, step: &Step) -> Result<(), QueueError> {
        self.push_envelope(&EventEnvelope::Step(step.clone())).await
    }
}

/// Which adapter a service should use. Selected by `QUEUE_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueType {
    Memory,
    Http,
    Broker,
}

impl QueueType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Some(QueueType::Memory),
            "http" => Some(QueueType::Http),
            "broker" => Some(QueueType::Broker),
            _ => None,
        }
    }
}

/// Queue selection plus endpoint, resolved from the environment.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub queue_type: QueueType,
    /// `QUEUE_URL` for the http adapter, `BROKER_URL` for the broker.
    pub url: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_type: QueueType::Memory,
            url: String::new(),
        }
    }
}

impl QueueConfig {
    /// Apply `QUEUE_TYPE` / `QUEUE_URL` / `BROKER_URL` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(queue_type) = std::env::var("QUEUE_TYPE")
            .ok()
            .and_then(|s| QueueType::from_str(&s))
        {
            self.queue_type = queue_type;
        }
        if let Ok(url) = std::env::var("QUEUE_URL") {
            self.url = url;
        }
        if let Ok(url) = std::env::var("BROKER_URL") {
            self.url = url;
        }
    }
}

/// Build the adapter named by the config.
pub fn build_queue(config: &QueueConfig) -> Result<std::sync::Arc<dyn QueueAdapter>, QueueError> {
    match config.queue_type {
        QueueType::Memory => Ok(std::sync::Arc::new(MemoryQueue::new())),
        QueueType::Http => Ok(std::sync::Arc::new(HttpQueue::new(&config.url)?)),
        QueueType::Broker => Ok(std::sync::Arc::new(BrokerQueue::new(
            BrokerQueueConfig::new(&config.url),
        )?)),
    }
}

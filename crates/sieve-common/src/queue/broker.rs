//! Durable broker adapter backed by Redis Streams.
//!
//! A consumer group gives the queue contract for free: entries appended
//! with XADD survive broker restarts (AOF/RDB), XREADGROUP delivers each
//! entry to exactly one consumer, and an entry stays in the pending list
//! until XACK. Unacked entries from a crashed worker are reclaimed with
//! XAUTOCLAIM once they have been idle long enough, so delivery is
//! at-least-once. A nack is deliberately a no-op: the entry simply stays
//! pending and redelivers after the idle window.

use redis::aio::MultiplexedConnection;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::envelope::EventEnvelope;

use super::{QueueAdapter, QueueError, QueueMessage, Receipt};

/// Field name carrying the serialized envelope inside a stream entry.
const PAYLOAD_FIELD: &str = "payload";

/// Configuration for the Redis Streams adapter.
#[derive(Debug, Clone)]
pub struct BrokerQueueConfig {
    /// Redis URL, e.g. "redis://localhost:6379".
    pub url: String,
    /// Stream key holding the event log.
    pub stream: String,
    /// Consumer group shared by all workers.
    pub group: String,
    /// This worker's consumer name.
    pub consumer: String,
    /// How long an entry must sit unacked before another consumer may
    /// reclaim it (milliseconds).
    pub claim_min_idle_ms: u64,
}

impl BrokerQueueConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            stream: "sieve:events".to_string(),
            group: "sieve-workers".to_string(),
            consumer: format!("worker-{}", uuid::Uuid::new_v4()),
            claim_min_idle_ms: 30_000,
        }
    }
}

/// Queue adapter over a Redis stream + consumer group.
pub struct BrokerQueue {
    client: redis::Client,
    config: BrokerQueueConfig,
    /// Cached connection, re-established on the next call after an error.
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl BrokerQueue {
    /// Creates the adapter. Connection is established lazily so a worker
    /// can start while the broker is still down.
    pub fn new(config: BrokerQueueConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(config.url.as_str())?;
        Ok(Self {
            client,
            config,
            conn: Mutex::new(None),
        })
    }

    async fn conn(&self) -> Result<MultiplexedConnection, QueueError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // Create the consumer group at stream start; tolerate it already
        // existing from a previous worker.
        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&self.config.stream, &self.config.group, "0")
            .await;
        if let Err(e) = created {
            if e.code() != Some("BUSYGROUP") {
                return Err(e.into());
            }
        }

        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Forget the cached connection so the next call reconnects.
    async fn invalidate(&self) {
        *self.conn.lock().await = None;
    }

    fn decode(&self, entry_id: String, payload: Option<String>) -> Option<QueueMessage> {
        let payload = payload?;
        match serde_json::from_str::<EventEnvelope>(&payload) {
            Ok(envelope) => Some(QueueMessage {
                receipt: Receipt(entry_id),
                envelope,
            }),
            Err(e) => {
                // A poison entry would redeliver forever; drop it instead.
                tracing::warn!(entry_id = %entry_id, error = %e, "Discarding undecodable stream entry");
                None
            }
        }
    }
}

#[async_trait]
impl QueueAdapter for BrokerQueue {
    async fn push_envelope(&self, envelope: &EventEnvelope) -> Result<(), QueueError> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.conn().await?;

        let result: Result<String, redis::RedisError> = conn
            .xadd(&self.config.stream, "*", &[(PAYLOAD_FIELD, payload)])
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                self.invalidate().await;
                Err(e.into())
            }
        }
    }

    async fn poll(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let mut conn = self.conn().await?;
        let mut batch: Vec<QueueMessage> = Vec::new();
        let mut poison: Vec<String> = Vec::new();

        // First pick up entries abandoned by dead consumers.
        let claimed: Result<StreamAutoClaimReply, redis::RedisError> = conn
            .xautoclaim_options(
                &self.config.stream,
                &self.config.group,
                &self.config.consumer,
                self.config.claim_min_idle_ms as usize,
                "0-0",
                StreamAutoClaimOptions::default().count(max),
            )
            .await;

        let claimed = match claimed {
            Ok(reply) => reply,
            Err(e) => {
                self.invalidate().await;
                return Err(e.into());
            }
        };
        for entry in claimed.claimed {
            let payload = entry.get::<String>(PAYLOAD_FIELD);
            match self.decode(entry.id.clone(), payload) {
                Some(message) => batch.push(message),
                None => poison.push(entry.id),
            }
        }

        // Then read new entries, non-blocking.
        if batch.len() < max {
            let options = StreamReadOptions::default()
                .group(&self.config.group, &self.config.consumer)
                .count(max - batch.len());
            let reply: Result<StreamReadReply, redis::RedisError> = conn
                .xread_options(&[&self.config.stream], &[">"], &options)
                .await;

            match reply {
                Ok(reply) => {
                    for key in reply.keys {
                        for entry in key.ids {
                            let payload = entry.get::<String>(PAYLOAD_FIELD);
                            match self.decode(entry.id.clone(), payload) {
                                Some(message) => batch.push(message),
                                None => poison.push(entry.id),
                            }
                        }
                    }
                }
                Err(e) => {
                    self.invalidate().await;
                    return Err(e.into());
                }
            }
        }

        // Ack undecodable entries so they never come back.
        if !poison.is_empty() {
            let _: Result<u64, redis::RedisError> = conn
                .xack(&self.config.stream, &self.config.group, &poison)
                .await;
        }

        Ok(batch)
    }

    async fn ack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let result: Result<u64, redis::RedisError> = conn
            .xack(&self.config.stream, &self.config.group, &[&receipt.0])
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                self.invalidate().await;
                Err(e.into())
            }
        }
    }

    async fn nack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        // Leaving the entry in the pending list is the redelivery path;
        // it becomes claimable after claim_min_idle_ms.
        tracing::debug!(receipt = %receipt.0, "Message nacked, left pending for reclaim");
        Ok(())
    }
}

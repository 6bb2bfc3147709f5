//! In-memory queue adapter for tests and single-process deployments.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::envelope::EventEnvelope;

use super::{QueueAdapter, QueueError, QueueMessage, Receipt};

#[derive(Default)]
struct Inner {
    ready: VecDeque<(u64, EventEnvelope)>,
    /// Delivered but not yet acknowledged, keyed by receipt.
    pending: HashMap<u64, EventEnvelope>,
}

/// FIFO backed by a `VecDeque`. Unacked messages survive in the pending map
/// until acked or nacked; a nack puts the message back at the head so
/// redelivery happens on the next poll.
#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    next_receipt: AtomicU64,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages waiting for delivery.
    pub async fn ready_len(&self) -> usize {
        self.inner.lock().await.ready.len()
    }

    /// Number of delivered-but-unacked messages.
    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }
}

#[async_trait]
impl QueueAdapter for MemoryQueue {
    async fn push_envelope(&self, envelope: &EventEnvelope) -> Result<(), QueueError> {
        let receipt = self.next_receipt.fetch_add(1, Ordering::Relaxed);
        self.inner
            .lock()
            .await
            .ready
            .push_back((receipt, envelope.clone()));
        Ok(())
    }

    async fn poll(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let mut inner = self.inner.lock().await;
        let mut batch = Vec::with_capacity(max.min(inner.ready.len()));

        while batch.len() < max {
            let Some((id, envelope)) = inner.ready.pop_front() else {
                break;
            };
            inner.pending.insert(id, envelope.clone());
            batch.push(QueueMessage {
                receipt: Receipt(id.to_string()),
                envelope,
            });
        }

        Ok(batch)
    }

    async fn ack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let id: u64 = receipt
            .0
            .parse()
            .map_err(|_| QueueError::UnknownReceipt(receipt.0.clone()))?;
        self.inner
            .lock()
            .await
            .pending
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.0.clone()))
    }

    async fn nack(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let id: u64 = receipt
            .0
            .parse()
            .map_err(|_| QueueError::UnknownReceipt(receipt.0.clone()))?;
        let mut inner = self.inner.lock().await;
        match inner.pending.remove(&id) {
            Some(envelope) => {
                inner.ready.push_front((id, envelope));
                Ok(())
            }
            None => Err(QueueError::UnknownReceipt(receipt.0.clone())),
        }
    }
}

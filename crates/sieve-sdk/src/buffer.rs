//! Bounded, drop-oldest event batcher feeding the transport.
//!
//! ## Architecture
//!
//! ```text
//! Application                  Background
//! ───────────                  ──────────
//! [Capture facade]             [Flush task]
//!     │                            ▲
//!     │ add()                      │ drain in batches
//!     ▼                            │
//! [Bounded VecDeque] ──────────────┘ ──► [Transport] ──► /ingest
//! ```
//!
//! Three triggers dispatch a flush: the buffer reaching `batch_size`, the
//! periodic timer, and an explicit `force_flush`. At most one flush is in
//! flight at a time; overlapping triggers observe the running flush and
//! return. Bounded memory is the invariant: when the buffer is full the
//! oldest event is dropped, and producers are never throttled. A batch the
//! transport fails to deliver is dropped rather than re-enqueued — the
//! transport has already done bounded retry internally.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use sieve_common::DecisionEvent;
use tokio::task::JoinHandle;

use crate::config::BufferConfig;
use crate::observer::CaptureObserver;
use crate::transport::Transport;

/// Counters for buffer activity.
#[derive(Debug, Default)]
pub struct BufferStats {
    /// Events accepted by `add`.
    pub added: AtomicU64,
    /// Oldest events evicted to stay within `max_size`.
    pub dropped: AtomicU64,
    /// Events handed to the transport.
    pub flushed: AtomicU64,
    /// Flush operations performed.
    pub flushes: AtomicU64,
}

impl BufferStats {
    pub fn snapshot(&self) -> BufferStatsSnapshot {
        BufferStatsSnapshot {
            added: self.added.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of buffer stats.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferStatsSnapshot {
    pub added: u64,
    pub dropped: u64,
    pub flushed: u64,
    pub flushes: u64,
}

/// Bounded FIFO of decision events with size- and time-based flushing.
pub struct EventBuffer {
    queue: Mutex<VecDeque<DecisionEvent>>,
    config: BufferConfig,
    transport: Arc<Transport>,
    flush_in_progress: AtomicBool,
    stats: Arc<BufferStats>,
    observer: Arc<dyn CaptureObserver>,
    timer: Mutex<Option<JoinHandle<()>>>,
    /// Back-reference for spawning flush tasks from `&self` methods.
    weak_self: Mutex<Weak<Self>>,
}

impl EventBuffer {
    /// Creates the buffer and starts its periodic flush timer. Must be
    /// called from within a tokio runtime.
    pub fn new(
        config: BufferConfig,
        transport: Arc<Transport>,
        observer: Arc<dyn CaptureObserver>,
    ) -> Arc<Self> {
        let buffer = Arc::new(Self {
            queue: Mutex::new(VecDeque::with_capacity(config.max_size.min(1024))),
            config,
            transport,
            flush_in_progress: AtomicBool::new(false),
            stats: Arc::new(BufferStats::default()),
            observer,
            timer: Mutex::new(None),
            weak_self: Mutex::new(Weak::new()),
        });
        *buffer.weak_self.lock() = Arc::downgrade(&buffer);

        let handle = Self::spawn_timer(Arc::downgrade(&buffer), buffer.config.flush_interval);
        *buffer.timer.lock() = Some(handle);
        buffer
    }

    fn spawn_timer(weak: Weak<Self>, period: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; skip it.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(buffer) => buffer.schedule_flush(),
                    None => break,
                }
            }
        })
    }

    /// Shared stats handle.
    pub fn stats(&self) -> Arc<BufferStats> {
        Arc::clone(&self.stats)
    }

    /// Current number of buffered events.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Append an event. Non-blocking and total: at `max_size` the oldest
    /// event is evicted first. Schedules a flush once `batch_size` is
    /// reached.
    pub fn add(&self, event: DecisionEvent) {
        let should_flush = {
            let mut queue = self.queue.lock();
            if queue.len() >= self.config.max_size.max(1) {
                queue.pop_front();
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                self.observer.on_events_dropped(1);
            }
            queue.push_back(event);
            self.stats.added.fetch_add(1, Ordering::Relaxed);
            queue.len() >= self.config.batch_size
        };

        if should_flush {
            self.schedule_flush();
        }
    }

    /// Fire-and-forget flush. A no-op when a flush is already running.
    pub fn schedule_flush(&self) {
        let Some(buffer) = self.weak_self.lock().upgrade() else {
            return;
        };
        if self
            .flush_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        tokio::spawn(async move {
            buffer.flush_now().await;
            buffer.flush_in_progress.store(false, Ordering::Release);
        });
    }

    /// Drain everything and cancel the periodic timer. The one buffer
    /// operation that may block the caller; intended for graceful shutdown.
    pub async fn force_flush(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }

        // Wait for any in-flight flush to finish, then drain the rest.
        while self
            .flush_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.flush_now().await;
        self.flush_in_progress.store(false, Ordering::Release);
    }

    async fn flush_now(&self) {
        loop {
            let chunk: Vec<DecisionEvent> = {
                let mut queue = self.queue.lock();
                if queue.is_empty() {
                    break;
                }
                let take = queue.len().min(self.config.batch_size.max(1));
                queue.drain(..take).collect()
            };

            self.stats.flushes.fetch_add(1, Ordering::Relaxed);
            // Delivery failures are the transport's concern; the batch is
            // gone either way.
            self.transport.send_decision_events(&chunk).await;
            self.stats
                .flushed
                .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        }
    }
}

impl Drop for EventBuffer {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::observer::NoopObserver;
    use sieve_common::DecisionEventBuilder;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event(i: usize) -> DecisionEvent {
        DecisionEventBuilder::new("s1", "r1", "p")
            .item_id(format!("item-{i}"))
            .build()
    }

    fn buffer_with(server_url: &str, config: BufferConfig) -> Arc<EventBuffer> {
        let transport = Arc::new(Transport::new(TransportConfig {
            api_url: server_url.to_string(),
            timeout: Duration::from_secs(1),
            max_retries: 1,
            retry_delay: Duration::from_millis(1),
        }));
        EventBuffer::new(config, transport, Arc::new(NoopObserver))
    }

    #[tokio::test]
    async fn test_add_is_bounded_drop_oldest() {
        let buffer = buffer_with(
            "http://127.0.0.1:1",
            BufferConfig {
                max_size: 3,
                batch_size: 100,
                flush_interval: Duration::from_secs(3600),
            },
        );

        for i in 0..4 {
            buffer.add(event(i));
        }

        // Exactly one oldest event evicted.
        assert_eq!(buffer.len(), 3);
        let stats = buffer.stats().snapshot();
        assert_eq!(stats.added, 4);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn test_batch_size_triggers_flush() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ingest"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let buffer = buffer_with(
            &server.uri(),
            BufferConfig {
                max_size: 100,
                batch_size: 5,
                flush_interval: Duration::from_secs(3600),
            },
        );

        for i in 0..5 {
            buffer.add(event(i));
        }

        // The flush is fire-and-forget; give it a moment.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.stats().snapshot().flushed, 5);
    }

    #[tokio::test]
    async fn test_force_flush_drains_everything() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let buffer = buffer_with(
            &server.uri(),
            BufferConfig {
                max_size: 100,
                batch_size: 50,
                flush_interval: Duration::from_secs(3600),
            },
        );

        for i in 0..7 {
            buffer.add(event(i));
        }
        buffer.force_flush().await;

        assert!(buffer.is_empty());
        assert_eq!(buffer.stats().snapshot().flushed, 7);
    }

    #[tokio::test]
    async fn test_failed_flush_drops_batch_and_recovers() {
        // Nothing is listening; delivery fails after bounded retry.
        let buffer = buffer_with(
            "http://127.0.0.1:1",
            BufferConfig {
                max_size: 100,
                batch_size: 50,
                flush_interval: Duration::from_secs(3600),
            },
        );

        for i in 0..3 {
            buffer.add(event(i));
        }
        buffer.force_flush().await;

        // The batch is gone (no re-enqueue) and the buffer still works.
        assert!(buffer.is_empty());
        buffer.add(event(99));
        assert_eq!(buffer.len(), 1);
        buffer.force_flush().await;
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_periodic_timer_flushes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let buffer = buffer_with(
            &server.uri(),
            BufferConfig {
                max_size: 100,
                batch_size: 50,
                flush_interval: Duration::from_millis(50),
            },
        );

        buffer.add(event(0));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(buffer.is_empty());
        assert_eq!(buffer.stats().snapshot().flushed, 1);
    }

    #[tokio::test]
    async fn test_observer_notified_on_drop() {
        use std::sync::atomic::AtomicU64;

        #[derive(Default)]
        struct Drops(AtomicU64);
        impl CaptureObserver for Drops {
            fn on_events_dropped(&self, count: u64) {
                self.0.fetch_add(count, Ordering::Relaxed);
            }
        }

        let observer = Arc::new(Drops::default());
        let transport = Arc::new(Transport::new(TransportConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        }));
        let buffer = EventBuffer::new(
            BufferConfig {
                max_size: 1,
                batch_size: 100,
                flush_interval: Duration::from_secs(3600),
            },
            transport,
            Arc::clone(&observer) as Arc<dyn CaptureObserver>,
        );

        buffer.add(event(0));
        buffer.add(event(1));
        assert_eq!(observer.0.load(Ordering::Relaxed), 1);
    }
}

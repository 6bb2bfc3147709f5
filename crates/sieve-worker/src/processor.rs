//! The processor worker loop.
//!
//! ## Architecture
//!
//! ```text
//! [Queue] ──poll──► [Processor] ──► [Blob store]      (raw payloads)
//!                       │
//!                       ├─────────► [Analytical store] (reference rows,
//!                       │                               metric rows)
//!                       └─────────► in-memory caches   (run/step/events)
//! ```
//!
//! A single cooperative loop pulls batches off the queue. Writes within a
//! message are sequential: blob put, then analytical insert, then cache
//! update. A message is acknowledged only after all of that succeeded; on
//! failure it is nacked and the broker redelivers. Redelivery is harmless:
//! blob keys are deterministic, the analytical tables merge by primary key,
//! and the idempotency set short-circuits messages this process already
//! handled. Caches are touched only from this loop, so no locking.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::interval;

use sieve_common::blob::BlobMetadata;
use sieve_common::{
    decision_key, run_key, step_key, DecisionEvent, EventEnvelope, QueueAdapter, Run, Step,
};

use crate::aggregate::{
    aggregate_run, aggregate_step, decision_event_row, run_row, step_row, StepAggregation,
};
use crate::config::WorkerConfig;
use crate::sinks::{MetricsSink, PayloadStore};

/// Errors that fail a single message (and trigger redelivery).
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("blob write failed: {0}")]
    Blob(#[from] sieve_common::BlobError),

    #[error("analytical write failed: {0}")]
    Analytical(#[from] sieve_common::AnalyticalError),

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Counters for processor activity.
#[derive(Debug, Default)]
pub struct ProcessorStats {
    /// Messages pulled off the queue.
    pub received: AtomicU64,
    /// Messages fully processed and acked.
    pub processed: AtomicU64,
    /// Messages skipped by the idempotency set.
    pub duplicates: AtomicU64,
    /// Messages that failed and were left for redelivery.
    pub failures: AtomicU64,
    /// Terminal runs aggregated into the runs table.
    pub runs_finalized: AtomicU64,
    /// Completed steps aggregated into the steps table.
    pub steps_finalized: AtomicU64,
}

impl ProcessorStats {
    pub fn snapshot(&self) -> ProcessorStatsSnapshot {
        ProcessorStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            runs_finalized: self.runs_finalized.load(Ordering::Relaxed),
            steps_finalized: self.steps_finalized.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of processor stats.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessorStatsSnapshot {
    pub received: u64,
    pub processed: u64,
    pub duplicates: u64,
    pub failures: u64,
    pub runs_finalized: u64,
    pub steps_finalized: u64,
}

/// The worker. Owns its caches; process one instance per task.
pub struct Processor {
    queue: Arc<dyn QueueAdapter>,
    sink: Arc<dyn MetricsSink>,
    store: Arc<dyn PayloadStore>,
    config: WorkerConfig,
    stats: Arc<ProcessorStats>,

    /// Stable message ids this process has already handled.
    seen: HashSet<String>,
    /// Runs observed so far, keyed by run id.
    run_cache: HashMap<String, Run>,
    /// Steps observed so far, keyed by step id.
    step_cache: HashMap<String, Step>,
    /// Captured decision events per step.
    step_events: HashMap<String, Vec<DecisionEvent>>,
}

impl Processor {
    pub fn new(
        queue: Arc<dyn QueueAdapter>,
        sink: Arc<dyn MetricsSink>,
        store: Arc<dyn PayloadStore>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            sink,
            store,
            config,
            stats: Arc::new(ProcessorStats::default()),
            seen: HashSet::new(),
            run_cache: HashMap::new(),
            step_cache: HashMap::new(),
            step_events: HashMap::new(),
        }
    }

    /// Shared stats handle, for health reporting alongside the loop.
    pub fn stats_handle(&self) -> Arc<ProcessorStats> {
        Arc::clone(&self.stats)
    }

    /// Run until shutdown. Finishes the in-flight batch before exiting.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis(),
            batch_size = self.config.batch_size,
            "Processor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            received = stats.received,
            processed = stats.processed,
            duplicates = stats.duplicates,
            failures = stats.failures,
            "Processor stopped"
        );
    }

    /// Pull and handle one batch. Broker errors are logged and retried on
    /// the next tick; they never crash the loop.
    pub async fn poll_once(&mut self) {
        let batch = match self.queue.poll(self.config.batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, "Queue poll failed, will retry");
                return;
            }
        };

        for message in batch {
            self.stats.received.fetch_add(1, Ordering::Relaxed);

            match self.handle_envelope(&message.envelope).await {
                Ok(()) => {
                    self.stats.processed.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = self.queue.ack(&message.receipt).await {
                        tracing::warn!(error = %e, "Ack failed; message may redeliver");
                    }
                }
                Err(e) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        envelope_type = message.envelope.type_name(),
                        error = %e,
                        "Message failed, leaving for redelivery"
                    );
                    if let Err(e) = self.queue.nack(&message.receipt).await {
                        tracing::debug!(error = %e, "Nack failed");
                    }
                }
            }
        }
    }

    /// Handle one envelope. Public for tests; the loop is just poll +
    /// ack/nack around this.
    pub async fn handle_envelope(&mut self, envelope: &EventEnvelope) -> Result<(), ProcessError> {
        if let Some(key) = envelope.dedupe_key() {
            if self.seen.contains(&key) {
                self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }

        match envelope {
            EventEnvelope::Decision(event) => self.handle_decision(event).await?,
            EventEnvelope::Decisions(events) => {
                for event in events {
                    self.handle_decision(event).await?;
                }
            }
            EventEnvelope::Run(run) => self.handle_run(run).await?,
            EventEnvelope::Step(step) => self.handle_step(step).await?,
        }

        if let Some(key) = envelope.dedupe_key() {
            self.seen.insert(key);
        }
        Ok(())
    }

    async fn handle_decision(&mut self, event: &DecisionEvent) -> Result<(), ProcessError> {
        // Batch elements carry their own identity; dedupe them individually.
        let dedupe = format!("decision:{}", event.event_id);
        if self.seen.contains(&dedupe) {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let blob_key = decision_key(&event.event_id, event.timestamp);
        let metadata = BlobMetadata {
            event_id: Some(event.event_id.clone()),
            run_id: Some(event.run_id.clone()),
            step_id: Some(event.step_id.clone()),
        };
        self.store
            .put(&blob_key, serde_json::to_vec(event)?, &metadata)
            .await?;

        self.sink
            .insert_decision_event(&decision_event_row(event, &blob_key))
            .await?;

        self.step_events
            .entry(event.step_id.clone())
            .or_default()
            .push(event.clone());
        self.seen.insert(dedupe);

        // Late-arriving events for an already-completed step: refresh the
        // step row (and the run totals, if terminal) so every arrival order
        // converges to the same state.
        let completed_step = self
            .step_cache
            .get(&event.step_id)
            .filter(|step| step.completed_at.is_some())
            .cloned();
        if let Some(step) = completed_step {
            self.finalize_step(&step).await?;
            self.refinalize_run_of(&step.run_id).await?;
        }
        Ok(())
    }

    async fn handle_run(&mut self, run: &Run) -> Result<(), ProcessError> {
        let blob_key = run_key(&run.run_id, run.started_at);
        let metadata = BlobMetadata {
            run_id: Some(run.run_id.clone()),
            ..Default::default()
        };
        self.store
            .put(&blob_key, serde_json::to_vec(run)?, &metadata)
            .await?;

        self.run_cache.insert(run.run_id.clone(), run.clone());

        if run.status.is_terminal() {
            self.finalize_run(run).await?;
        }
        Ok(())
    }

    async fn handle_step(&mut self, step: &Step) -> Result<(), ProcessError> {
        let blob_key = step_key(&step.step_id, step.started_at);
        let metadata = BlobMetadata {
            run_id: Some(step.run_id.clone()),
            step_id: Some(step.step_id.clone()),
            ..Default::default()
        };
        self.store
            .put(&blob_key, serde_json::to_vec(step)?, &metadata)
            .await?;

        self.step_cache.insert(step.step_id.clone(), step.clone());

        if step.completed_at.is_some() {
            self.finalize_step(step).await?;
            self.refinalize_run_of(&step.run_id).await?;
        }
        Ok(())
    }

    /// Aggregate a completed step's events and insert its metrics row.
    async fn finalize_step(&self, step: &Step) -> Result<(), ProcessError> {
        let events = self
            .step_events
            .get(&step.step_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let aggregation = aggregate_step(step, events);

        // Audit trail for which source served the count.
        tracing::debug!(
            step_id = %step.step_id,
            input_count = aggregation.input_count,
            input_count_source = aggregation.input_count_source.as_str(),
            "Step metrics aggregated"
        );

        self.sink.insert_step(&step_row(step, &aggregation)).await?;
        self.stats.steps_finalized.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Sum a terminal run's cached steps into its totals row.
    async fn finalize_run(&self, run: &Run) -> Result<(), ProcessError> {
        let aggregations: Vec<StepAggregation> = self
            .step_cache
            .values()
            .filter(|step| step.run_id == run.run_id)
            .map(|step| {
                let events = self
                    .step_events
                    .get(&step.step_id)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                aggregate_step(step, events)
            })
            .collect();

        let totals = aggregate_run(&aggregations);
        self.sink.insert_run(&run_row(run, &totals)).await?;
        self.stats.runs_finalized.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            run_id = %run.run_id,
            status = %run.status,
            total_steps = totals.total_steps,
            overall_elimination_ratio = totals.overall_elimination_ratio,
            "Run finalized"
        );
        Ok(())
    }

    /// Refresh a run's totals row if the run is already terminal. The
    /// tables merge by primary key, so a refreshed row simply supersedes
    /// the earlier one.
    async fn refinalize_run_of(&self, run_id: &str) -> Result<(), ProcessError> {
        let terminal_run = self
            .run_cache
            .get(run_id)
            .filter(|run| run.status.is_terminal())
            .cloned();
        if let Some(run) = terminal_run {
            self.finalize_run(&run).await?;
        }
        Ok(())
    }
}

//! The capture facade: what an application author writes against.
//!
//! Wraps arbitrary step functions, derives per-item decisions by diffing
//! input and output, and emits everything to the collector in the
//! background. The contract with the application is strict:
//!
//! - Application errors raised inside a step function are re-raised
//!   unchanged. Never swallowed.
//! - The SDK's own failures (buffer overflow, transport errors, collector
//!   unreachable) are always swallowed. `start_run`, `step` and `end_run`
//!   add no error modes to caller code.
//! - No caller is ever blocked on observability I/O. Sends are spawned;
//!   the only operation that may block is the explicit `flush()` at
//!   shutdown.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use sieve_common::{JsonMap, Run, Step, StepType};

use crate::buffer::EventBuffer;
use crate::config::{CaptureLevel, SdkConfig};
use crate::derive::{derive_decisions, input_count_of, output_count_of, DecisionFn};
use crate::observer::{CaptureObserver, NoopObserver};
use crate::transport::Transport;

/// Counters for facade activity.
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub runs_started: AtomicU64,
    pub runs_finished: AtomicU64,
    pub steps_captured: AtomicU64,
    pub events_emitted: AtomicU64,
}

impl CaptureStats {
    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_finished: self.runs_finished.load(Ordering::Relaxed),
            steps_captured: self.steps_captured.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of capture stats.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStatsSnapshot {
    pub runs_started: u64,
    pub runs_finished: u64,
    pub steps_captured: u64,
    pub events_emitted: u64,
}

/// In-process capture client. Cheap to share via `Arc`; all methods take
/// `&self`.
pub struct CaptureClient {
    level: CaptureLevel,
    runs: DashMap<String, Run>,
    transport: Arc<Transport>,
    buffer: Arc<EventBuffer>,
    stats: Arc<CaptureStats>,
}

impl CaptureClient {
    /// Creates a client. Must be called from within a tokio runtime (the
    /// buffer starts its flush timer immediately).
    pub fn new(config: SdkConfig) -> Self {
        Self::with_observer(config, Arc::new(NoopObserver))
    }

    /// Creates a client with an observer for SDK-internal failures.
    pub fn with_observer(config: SdkConfig, observer: Arc<dyn CaptureObserver>) -> Self {
        let transport = Arc::new(Transport::with_observer(
            config.transport.clone(),
            Arc::clone(&observer),
        ));
        let buffer = EventBuffer::new(config.buffer.clone(), Arc::clone(&transport), observer);

        Self {
            level: config.capture_level,
            runs: DashMap::new(),
            transport,
            buffer,
            stats: Arc::new(CaptureStats::default()),
        }
    }

    /// Creates a client configured from the environment.
    pub fn from_env() -> Self {
        Self::new(SdkConfig::from_env())
    }

    /// Shared stats handle.
    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Number of runs currently in flight.
    pub fn active_runs(&self) -> usize {
        self.runs.len()
    }

    /// Begin a run. Registers it locally, fires a best-effort send, and
    /// returns the new run id. Never fails.
    pub fn start_run(
        &self,
        pipeline_id: &str,
        input: Value,
        metadata: Option<JsonMap>,
    ) -> String {
        let run = Run::new(pipeline_id, input, metadata);
        let run_id = run.run_id.clone();

        self.spawn_send_run(run.clone());
        self.runs.insert(run_id.clone(), run);
        self.stats.runs_started.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(run_id = %run_id, pipeline_id, "Run started");
        run_id
    }

    /// Execute one step under observation.
    ///
    /// Sends the step on entry and again on exit, derives decision events
    /// from the input/output diff, and returns the function's result
    /// untouched. If `f` fails, `completed_at` is still recorded and the
    /// error is returned to the caller unchanged.
    #[allow(clippy::too_many_arguments)]
    pub async fn step<I, O, E, F, Fut>(
        &self,
        run_id: &str,
        step_type: StepType,
        name: &str,
        f: F,
        input: I,
        config: Option<JsonMap>,
        decision_fn: Option<&DecisionFn>,
    ) -> Result<O, E>
    where
        I: Serialize,
        O: Serialize,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<O, E>>,
    {
        let pipeline_id = self
            .runs
            .get(run_id)
            .map(|run| run.pipeline_id.clone())
            .unwrap_or_default();

        let input_value = serde_json::to_value(&input).unwrap_or(Value::Null);
        let input_count = input_count_of(&input_value);

        let mut step = Step::new(run_id, pipeline_id, step_type, name, config.clone());
        self.spawn_send_step(step.clone());

        let result = f(input).await;

        step.completed_at = Some(Utc::now());

        // Counts ride on the step config so metrics aggregation works even
        // when no decision events are emitted.
        let mut enriched = config.unwrap_or_default();
        enriched.insert("inputCount".to_string(), Value::from(input_count));

        match &result {
            Ok(output) => {
                let output_value = serde_json::to_value(output).unwrap_or(Value::Null);
                let output_count = output_count_of(Some(&output_value));
                enriched.insert("outputCount".to_string(), Value::from(output_count));
                step.config = Some(enriched.clone());
                self.spawn_send_step(step.clone());

                let events = derive_decisions(
                    &step,
                    &input_value,
                    Some(&output_value),
                    &enriched,
                    self.level,
                    decision_fn,
                );
                self.stats
                    .events_emitted
                    .fetch_add(events.len() as u64, Ordering::Relaxed);
                for event in events {
                    self.buffer.add(event);
                }
            }
            Err(_) => {
                // The failed step is still observed; derivation is skipped
                // because there is no output to diff.
                step.config = Some(enriched);
                self.spawn_send_step(step.clone());
            }
        }

        self.stats.steps_captured.fetch_add(1, Ordering::Relaxed);
        result
    }

    /// Terminate a run. `Failed` iff an error is supplied. Unknown run ids
    /// are ignored.
    pub fn end_run(&self, run_id: &str, output: Option<Value>, error: Option<String>) {
        let Some((_, mut run)) = self.runs.remove(run_id) else {
            tracing::debug!(run_id, "end_run for unknown run, ignoring");
            return;
        };

        run.finish(output, error);
        self.stats.runs_finished.fetch_add(1, Ordering::Relaxed);
        self.spawn_send_run(run);
    }

    /// Drain buffered events. May block; intended for graceful shutdown.
    /// Without this, events still buffered at process exit are lost.
    pub async fn flush(&self) {
        self.buffer.force_flush().await;
    }

    fn spawn_send_run(&self, run: Run) {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            transport.send_run(&run).await;
        });
    }

    fn spawn_send_step(&self, step: Step) {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            transport.send_step(&step).await;
        });
    }
}

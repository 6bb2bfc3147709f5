//! Processor worker: polls the durable queue, writes raw payloads to the
//! blob store, aggregates per-step and per-run metrics, and emits them to
//! the analytical store with idempotent-write semantics.

pub mod aggregate;
pub mod config;
pub mod processor;
pub mod sinks;

pub use aggregate::{
    aggregate_run, aggregate_step, decision_event_row, run_row, step_row, CountSource,
    RunAggregation, StepAggregation,
};
pub use config::WorkerConfig;
pub use processor::{ProcessError, Processor, ProcessorStats, ProcessorStatsSnapshot};
pub use sinks::{MetricsSink, PayloadStore};

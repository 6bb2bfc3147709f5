//! Shared types and clients for the sieve decision observability pipeline.
//!
//! This crate contains:
//! - The canonical event model (Run, Step, DecisionEvent) and the
//!   `{type, data}` wire envelope
//! - The ClickHouse analytical-store client and schema
//! - The S3-compatible blob-store client with deterministic keys
//! - The queue abstraction with memory, HTTP and Redis Streams adapters

pub mod analytical;
pub mod blob;
pub mod envelope;
pub mod model;
pub mod queue;

pub use analytical::{
    AnalyticalClient, AnalyticalConfig, AnalyticalError, DecisionEventRow, RunRow, StepMetricsRow,
};
pub use blob::{decision_key, run_key, step_key, BlobClient, BlobConfig, BlobError, BlobMetadata};
pub use envelope::EventEnvelope;
pub use model::{
    elimination_ratio, DecisionEvent, DecisionEventBuilder, JsonMap, Outcome, Run, RunStatus,
    Step, StepType,
};
pub use queue::{
    build_queue, BrokerQueue, BrokerQueueConfig, HttpQueue, MemoryQueue, QueueAdapter,
    QueueConfig, QueueError, QueueMessage, QueueType, Receipt,
};

//! Validating admission layer between capture clients and the durable
//! queue.
//!
//! Accepts heterogeneous `{type, data}` envelopes over HTTP, validates each
//! against the schema for its type, and hands valid payloads to a queue
//! adapter. Holds no state beyond the adapter handle.

pub mod config;
pub mod server;
pub mod validate;

pub use config::IngestConfig;
pub use server::router;
pub use validate::{
    validate_decision, validate_decisions, validate_run, validate_step, BatchValidation,
    ValidationError,
};

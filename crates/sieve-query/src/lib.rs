//! Query API over the analytical and blob stores.
//!
//! Serves run/step/item-trajectory queries for the dashboard. Every list
//! and lookup is a single-table read against the analytical store; full
//! payloads are hydrated from the blob store only when a request opts in
//! with `include_raw=true`.

pub mod api;
pub mod config;

pub use api::{router, EventReference, RunSummary, StepMetrics, StepSummary};
pub use config::QueryConfig;

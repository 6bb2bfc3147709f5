//! Seams between the processor and its two storage backends.
//!
//! The processor writes through these traits rather than the concrete
//! clients so the pipeline logic can be exercised against in-memory fakes.
//! The production implementations delegate straight to the shared clients.

use async_trait::async_trait;

use sieve_common::analytical::{
    AnalyticalClient, AnalyticalError, DecisionEventRow, RunRow, StepMetricsRow,
};
use sieve_common::blob::{BlobClient, BlobError, BlobMetadata};

/// Destination for aggregated rows.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn insert_run(&self, row: &RunRow) -> Result<(), AnalyticalError>;
    async fn insert_step(&self, row: &StepMetricsRow) -> Result<(), AnalyticalError>;
    async fn insert_decision_event(&self, row: &DecisionEventRow) -> Result<(), AnalyticalError>;
}

#[async_trait]
impl MetricsSink for AnalyticalClient {
    async fn insert_run(&self, row: &RunRow) -> Result<(), AnalyticalError> {
        AnalyticalClient::insert_run(self, row).await
    }

    async fn insert_step(&self, row: &StepMetricsRow) -> Result<(), AnalyticalError> {
        AnalyticalClient::insert_step(self, row).await
    }

    async fn insert_decision_event(&self, row: &DecisionEventRow) -> Result<(), AnalyticalError> {
        AnalyticalClient::insert_decision_event(self, row).await
    }
}

/// Destination for raw payloads.
#[async_trait]
pub trait PayloadStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
        metadata: &BlobMetadata,
    ) -> Result<(), BlobError>;
}

#[async_trait]
impl PayloadStore for BlobClient {
    async fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
        metadata: &BlobMetadata,
    ) -> Result<(), BlobError> {
        BlobClient::put(self, key, payload, metadata).await
    }
}

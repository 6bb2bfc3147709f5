//! S3-compatible blob-store client for raw event payloads.
//!
//! The blob store owns the authoritative payload of every ingested entity;
//! the analytical store only keeps an indexable reference (`blob_key`).
//! Keys are content-addressed and date-partitioned:
//!
//! ```text
//! decisions/YYYY/MM/DD/<eventId>.json
//! runs/YYYY/MM/DD/<runId>.json
//! steps/YYYY/MM/DD/<stepId>.json
//! ```
//!
//! The date comes from the entity's own timestamp, so a replayed message
//! produces the same key and the write is a no-op in effect. Talks plain
//! HTTP to any S3-compatible endpoint (MinIO in the stack).

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use thiserror::Error;

/// Pause before the single retry of a transient failure.
const RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(200);

/// Server-side trouble worth one retry; client errors are not.
fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Errors that can occur during blob-store operations.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bucket creation failed: {0}")]
    Bucket(String),

    #[error("unexpected status {status} for {key}")]
    Status { status: StatusCode, key: String },
}

/// Configuration for the blob-store client.
#[derive(Debug, Clone)]
pub struct BlobConfig {
    /// Base endpoint, e.g. "http://localhost:9000".
    pub endpoint: String,
    /// Bucket name, auto-created on startup.
    pub bucket: String,
    /// Optional bearer token for authenticated endpoints.
    pub auth_token: Option<String>,
    /// Per-request timeout.
    pub timeout: std::time::Duration,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            bucket: "sieve-payloads".to_string(),
            auth_token: None,
            timeout: std::time::Duration::from_secs(10),
        }
    }
}

impl BlobConfig {
    /// Apply `BLOB_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("BLOB_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Ok(bucket) = std::env::var("BLOB_BUCKET") {
            self.bucket = bucket;
        }
        if let Ok(token) = std::env::var("BLOB_AUTH_TOKEN") {
            self.auth_token = Some(token);
        }
    }
}

/// Metadata attached to stored payloads as `x-amz-meta-*` headers.
#[derive(Debug, Clone, Default)]
pub struct BlobMetadata {
    pub event_id: Option<String>,
    pub run_id: Option<String>,
    pub step_id: Option<String>,
}

/// Deterministic key for a decision-event payload.
pub fn decision_key(event_id: &str, timestamp: DateTime<Utc>) -> String {
    format!(
        "decisions/{}/{event_id}.json",
        timestamp.format("%Y/%m/%d")
    )
}

/// Deterministic key for a run payload.
pub fn run_key(run_id: &str, started_at: DateTime<Utc>) -> String {
    format!("runs/{}/{run_id}.json", started_at.format("%Y/%m/%d"))
}

/// Deterministic key for a step payload.
pub fn step_key(step_id: &str, started_at: DateTime<Utc>) -> String {
    format!("steps/{}/{step_id}.json", started_at.format("%Y/%m/%d"))
}

/// Blob-store client.
#[derive(Clone)]
pub struct BlobClient {
    http: reqwest::Client,
    config: BlobConfig,
}

impl BlobClient {
    /// Creates a new client. Does not touch the network; call
    /// [`BlobClient::ensure_bucket`] during service initialization.
    pub fn new(config: BlobConfig) -> Result<Self, BlobError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{key}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket
        )
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(ref token) = self.config.auth_token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    /// Sends a request, retrying once on a transient failure (transport
    /// error, 5xx or 429). Client errors and successes are returned as-is
    /// from the first attempt.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, BlobError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        match build().send().await {
            Ok(response) if !is_transient(response.status()) => return Ok(response),
            Ok(response) => {
                tracing::debug!(status = %response.status(), "Transient blob response, retrying once");
            }
            Err(e) => {
                tracing::debug!(error = %e, "Blob request failed, retrying once");
            }
        }

        tokio::time::sleep(RETRY_DELAY).await;
        Ok(build().send().await?)
    }

    /// Creates the bucket if it does not exist. Part of service startup;
    /// failure here is an unrecoverable initialization error.
    pub async fn ensure_bucket(&self) -> Result<(), BlobError> {
        let url = format!(
            "{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket
        );
        let response = self
            .send_with_retry(|| self.http.put(&url).headers(self.auth_headers()))
            .await?;

        match response.status() {
            // 409 = already exists and owned; both are fine.
            status if status.is_success() || status == StatusCode::CONFLICT => Ok(()),
            status => Err(BlobError::Bucket(format!(
                "PUT {} returned {status}",
                self.config.bucket
            ))),
        }
    }

    /// Returns true if an object exists under `key`.
    pub async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        let url = self.object_url(key);
        let response = self
            .send_with_retry(|| self.http.head(&url).headers(self.auth_headers()))
            .await?;
        Ok(response.status().is_success())
    }

    /// Stores a JSON payload under `key`. Idempotent: an existing object is
    /// left untouched, which is equivalent to an overwrite since payloads
    /// are stable for a given key.
    pub async fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
        metadata: &BlobMetadata,
    ) -> Result<(), BlobError> {
        // The existence check gates the write; a failing check must surface
        // rather than degrade into a blind overwrite attempt.
        if self.exists(key).await? {
            tracing::debug!(key, "Blob already present, skipping write");
            return Ok(());
        }

        let mut headers = self.auth_headers();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        for (name, value) in [
            ("x-amz-meta-event-id", &metadata.event_id),
            ("x-amz-meta-run-id", &metadata.run_id),
            ("x-amz-meta-step-id", &metadata.step_id),
        ] {
            if let Some(value) = value {
                if let Ok(value) = HeaderValue::from_str(value) {
                    headers.insert(name, value);
                }
            }
        }

        let url = self.object_url(key);
        let response = self
            .send_with_retry(|| {
                self.http
                    .put(&url)
                    .headers(headers.clone())
                    .body(payload.clone())
            })
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(BlobError::Status {
                status,
                key: key.to_string(),
            })
        }
    }

    /// Fetches a payload. Returns `None` when the object is absent.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        let url = self.object_url(key);
        let response = self
            .send_with_retry(|| self.http.get(&url).headers(self.auth_headers()))
            .await?;

        match response.status() {
            status if status.is_success() => Ok(Some(response.bytes().await?.to_vec())),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(BlobError::Status {
                status,
                key: key.to_string(),
            }),
        }
    }
}

//! ClickHouse client wrapper for the analytical store.
//!
//! Provides a type-safe interface for schema management, idempotent inserts
//! and the read queries served by the query API. Every table uses a
//! ReplacingMergeTree keyed on `updated_at`, so repeated inserts of the same
//! primary key converge to one row; reads go through FINAL to observe the
//! merged state immediately.

use chrono::{DateTime, Utc};
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during analytical-store operations.
#[derive(Debug, Error)]
pub enum AnalyticalError {
    #[error("ClickHouse client error: {0}")]
    Client(#[from] clickhouse::error::Error),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Schema creation failed: {0}")]
    Schema(String),
}

/// Configuration for the analytical-store client.
#[derive(Debug, Clone)]
pub struct AnalyticalConfig {
    /// ClickHouse HTTP URL (e.g., "http://localhost:8123").
    pub url: String,
    /// Database name.
    pub database: String,
    /// Username (optional).
    pub user: Option<String>,
    /// Password (optional).
    pub password: Option<String>,
}

impl Default for AnalyticalConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "sieve".to_string(),
            user: None,
            password: None,
        }
    }
}

impl AnalyticalConfig {
    /// Apply `ANALYTICAL_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("ANALYTICAL_HOST") {
            let port =
                std::env::var("ANALYTICAL_PORT").unwrap_or_else(|_| "8123".to_string());
            self.url = format!("http://{host}:{port}");
        }
        if let Ok(database) = std::env::var("ANALYTICAL_DATABASE") {
            self.database = database;
        }
        if let Ok(user) = std::env::var("ANALYTICAL_USER") {
            self.user = Some(user);
        }
        if let Ok(password) = std::env::var("ANALYTICAL_PASSWORD") {
            self.password = Some(password);
        }
    }
}

/// One row of the `runs` table.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct RunRow {
    pub run_id: String,
    pub pipeline_id: String,
    pub status: String,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis::option")]
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub total_steps: u32,
    pub total_input_count: u64,
    pub total_output_count: u64,
    pub overall_elimination_ratio: f64,
    /// User metadata, JSON-serialized. Opaque to the store.
    pub metadata: String,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub updated_at: DateTime<Utc>,
}

/// One row of the `steps` table, carrying the per-step aggregates.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct StepMetricsRow {
    pub step_id: String,
    pub run_id: String,
    pub pipeline_id: String,
    pub step_type: String,
    pub name: String,
    pub input_count: u64,
    pub output_count: u64,
    pub elimination_ratio: f64,
    pub kept_count: u64,
    pub eliminated_count: u64,
    pub scored_count: u64,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis::option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub updated_at: DateTime<Utc>,
}

/// One row of the `decision_events` table. The full payload lives in the
/// blob store under `blob_key`; this row is the indexable reference.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct DecisionEventRow {
    pub run_id: String,
    pub step_id: String,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub timestamp: DateTime<Utc>,
    pub event_id: String,
    pub pipeline_id: String,
    pub outcome: String,
    pub item_id: String,
    pub score: Option<f64>,
    pub blob_key: String,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub updated_at: DateTime<Utc>,
}

/// Predicate selecting runs worth investigating: heavy elimination or a
/// non-success terminal state.
const BAD_RUN_PREDICATE: &str =
    "(overall_elimination_ratio > 0.8 OR status = 'failed' OR error IS NOT NULL)";

/// Analytical-store client.
#[derive(Clone)]
pub struct AnalyticalClient {
    client: Client,
}

impl AnalyticalClient {
    /// Creates a new client with the given configuration.
    pub fn new(config: &AnalyticalConfig) -> Self {
        let mut client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database);

        if let Some(ref user) = config.user {
            client = client.with_user(user);
        }
        if let Some(ref password) = config.password {
            client = client.with_password(password);
        }

        Self { client }
    }

    /// Returns a reference to the underlying clickhouse client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Tests the connection by running a simple query.
    pub async fn ping(&self) -> Result<(), AnalyticalError> {
        self.client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .map_err(|e| AnalyticalError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Creates all required tables using the embedded schema. Idempotent.
    pub async fn create_tables(&self) -> Result<(), AnalyticalError> {
        let schema = include_str!("schema.sql");

        // Split by semicolons and execute each statement
        for statement in schema.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }

            let non_comment_lines: Vec<&str> = statement
                .lines()
                .filter(|line| !line.trim().starts_with("--") && !line.trim().is_empty())
                .collect();

            if non_comment_lines.is_empty() {
                continue;
            }

            self.client
                .query(statement)
                .execute()
                .await
                .map_err(|e| AnalyticalError::Schema(format!("{}: {}", e, statement)))?;
        }

        Ok(())
    }

    /// Inserts one run row. Re-inserting the same `run_id` replaces it.
    pub async fn insert_run(&self, row: &RunRow) -> Result<(), AnalyticalError> {
        let mut insert = self.client.insert("runs")?;
        insert.write(row).await?;
        insert.end().await?;
        Ok(())
    }

    /// Inserts one step metrics row.
    pub async fn insert_step(&self, row: &StepMetricsRow) -> Result<(), AnalyticalError> {
        let mut insert = self.client.insert("steps")?;
        insert.write(row).await?;
        insert.end().await?;
        Ok(())
    }

    /// Inserts one decision-event reference row.
    pub async fn insert_decision_event(
        &self,
        row: &DecisionEventRow,
    ) -> Result<(), AnalyticalError> {
        let mut insert = self.client.insert("decision_events")?;
        insert.write(row).await?;
        insert.end().await?;
        Ok(())
    }

    /// Performs a single batch insert of decision-event rows.
    pub async fn insert_decision_events(
        &self,
        rows: &[DecisionEventRow],
    ) -> Result<(), AnalyticalError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut insert = self.client.insert("decision_events")?;
        for row in rows {
            insert.write(row).await?;
        }
        insert.end().await?;
        Ok(())
    }

    /// Lists runs ordered by `started_at` descending. With `bad_only`, keeps
    /// only runs matching the bad-run predicate.
    pub async fn list_runs(
        &self,
        bad_only: bool,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<RunRow>, AnalyticalError> {
        let query = if bad_only {
            format!(
                "SELECT ?fields FROM runs FINAL WHERE {BAD_RUN_PREDICATE} \
                 ORDER BY started_at DESC LIMIT ? OFFSET ?"
            )
        } else {
            "SELECT ?fields FROM runs FINAL ORDER BY started_at DESC LIMIT ? OFFSET ?"
                .to_string()
        };

        let rows = self
            .client
            .query(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all::<RunRow>()
            .await?;
        Ok(rows)
    }

    /// Looks up one run by id.
    pub async fn fetch_run(&self, run_id: &str) -> Result<Option<RunRow>, AnalyticalError> {
        let row = self
            .client
            .query("SELECT ?fields FROM runs FINAL WHERE run_id = ? LIMIT 1")
            .bind(run_id)
            .fetch_optional::<RunRow>()
            .await?;
        Ok(row)
    }

    /// Looks up one step by id.
    pub async fn fetch_step(
        &self,
        step_id: &str,
    ) -> Result<Option<StepMetricsRow>, AnalyticalError> {
        let row = self
            .client
            .query("SELECT ?fields FROM steps FINAL WHERE step_id = ? LIMIT 1")
            .bind(step_id)
            .fetch_optional::<StepMetricsRow>()
            .await?;
        Ok(row)
    }

    /// All steps of a run, in execution order.
    pub async fn fetch_steps_for_run(
        &self,
        run_id: &str,
    ) -> Result<Vec<StepMetricsRow>, AnalyticalError> {
        let rows = self
            .client
            .query("SELECT ?fields FROM steps FINAL WHERE run_id = ? ORDER BY started_at ASC")
            .bind(run_id)
            .fetch_all::<StepMetricsRow>()
            .await?;
        Ok(rows)
    }

    /// Decision-event references for a step, bounded by `limit`.
    pub async fn fetch_events_for_step(
        &self,
        step_id: &str,
        limit: u64,
    ) -> Result<Vec<DecisionEventRow>, AnalyticalError> {
        let rows = self
            .client
            .query(
                "SELECT ?fields FROM decision_events FINAL WHERE step_id = ? \
                 ORDER BY timestamp ASC LIMIT ?",
            )
            .bind(step_id)
            .bind(limit)
            .fetch_all::<DecisionEventRow>()
            .await?;
        Ok(rows)
    }

    /// Every decision made about one item across a run: the item trajectory.
    pub async fn fetch_item_trajectory(
        &self,
        run_id: &str,
        item_id: &str,
    ) -> Result<Vec<DecisionEventRow>, AnalyticalError> {
        let rows = self
            .client
            .query(
                "SELECT ?fields FROM decision_events FINAL \
                 WHERE run_id = ? AND item_id = ? ORDER BY timestamp ASC",
            )
            .bind(run_id)
            .bind(item_id)
            .fetch_all::<DecisionEventRow>()
            .await?;
        Ok(rows)
    }
}

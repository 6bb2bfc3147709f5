//! REST endpoints over the analytical store.
//!
//! - `GET /runs?bad_filter=&limit=&offset=` — run summaries, newest first
//! - `GET /runs/:id?include_raw=` — run + full step list
//! - `GET /runs/:id/items/:item_id` — one item's trajectory across steps
//! - `GET /steps/:id/details?include_raw=&decision_limit=` — step + bounded
//!   decision-event references
//!
//! Default responses never touch the blob store; `include_raw=true` hydrates
//! raw payloads per request. A missing blob degrades gracefully: the field
//! is omitted and a warning logged. All responses are
//! `{success, data, count?}` with 404/500 on error.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use sieve_common::analytical::{DecisionEventRow, RunRow, StepMetricsRow};
use sieve_common::{run_key, AnalyticalClient, BlobClient};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub analytical: Arc<AnalyticalClient>,
    pub blob: Arc<BlobClient>,
}

/// Build the service router.
pub fn router(analytical: Arc<AnalyticalClient>, blob: Arc<BlobClient>) -> Router {
    Router::new()
        .route("/runs", get(list_runs))
        .route("/runs/:id", get(get_run))
        .route("/runs/:id/items/:item_id", get(get_item_trajectory))
        .route("/steps/:id/details", get(get_step_details))
        .route("/health", get(health))
        .with_state(AppState { analytical, blob })
}

// ============================================================================
// Response shaping
// ============================================================================

fn iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Run summary as served to the dashboard.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub pipeline_id: String,
    pub status: String,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub total_steps: u32,
    pub total_input_count: u64,
    pub total_output_count: u64,
    pub overall_elimination_ratio: f64,
    pub metadata: Value,
}

impl From<RunRow> for RunSummary {
    fn from(row: RunRow) -> Self {
        let metadata = serde_json::from_str(&row.metadata).unwrap_or(Value::Null);
        Self {
            run_id: row.run_id,
            pipeline_id: row.pipeline_id,
            status: row.status,
            started_at: iso(row.started_at),
            completed_at: row.completed_at.map(iso),
            error: row.error,
            total_steps: row.total_steps,
            total_input_count: row.total_input_count,
            total_output_count: row.total_output_count,
            overall_elimination_ratio: row.overall_elimination_ratio,
            metadata,
        }
    }
}

/// Per-step aggregates nested under the step summary.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMetrics {
    pub input_count: u64,
    pub output_count: u64,
    pub elimination_ratio: f64,
    pub kept_count: u64,
    pub eliminated_count: u64,
    pub scored_count: u64,
}

/// Step summary with its metrics.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub step_id: String,
    pub run_id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub name: String,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub metrics: StepMetrics,
}

impl From<StepMetricsRow> for StepSummary {
    fn from(row: StepMetricsRow) -> Self {
        Self {
            step_id: row.step_id,
            run_id: row.run_id,
            step_type: row.step_type,
            name: row.name,
            started_at: iso(row.started_at),
            completed_at: row.completed_at.map(iso),
            metrics: StepMetrics {
                input_count: row.input_count,
                output_count: row.output_count,
                elimination_ratio: row.elimination_ratio,
                kept_count: row.kept_count,
                eliminated_count: row.eliminated_count,
                scored_count: row.scored_count,
            },
        }
    }
}

/// Decision-event reference, optionally hydrated with its raw payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReference {
    pub event_id: String,
    pub step_id: String,
    pub run_id: String,
    pub outcome: String,
    pub item_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub timestamp: String,
    pub blob_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<Value>,
}

impl From<DecisionEventRow> for EventReference {
    fn from(row: DecisionEventRow) -> Self {
        Self {
            event_id: row.event_id,
            step_id: row.step_id,
            run_id: row.run_id,
            outcome: row.outcome,
            item_id: row.item_id,
            score: row.score,
            timestamp: iso(row.timestamp),
            blob_key: row.blob_key,
            raw_payload: None,
        }
    }
}

fn ok(data: impl Serialize) -> Response {
    Json(json!({"success": true, "data": data})).into_response()
}

fn ok_list(data: impl Serialize, count: usize) -> Response {
    Json(json!({"success": true, "data": data, "count": count})).into_response()
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"success": false, "error": format!("{what} not found")})),
    )
        .into_response()
}

fn internal(error: impl std::fmt::Display) -> Response {
    tracing::error!(error = %error, "Query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"success": false, "error": "internal error"})),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": iso(Utc::now()),
    }))
}

/// Query parameters for run listing.
#[derive(Debug, Default, Deserialize)]
pub struct RunsParams {
    #[serde(default)]
    pub bad_filter: Option<bool>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl RunsParams {
    pub fn limit(&self) -> u64 {
        self.limit.unwrap_or(50).min(1000)
    }

    pub fn offset(&self) -> u64 {
        self.offset.unwrap_or(0)
    }
}

async fn list_runs(State(state): State<AppState>, Query(params): Query<RunsParams>) -> Response {
    let bad_only = params.bad_filter.unwrap_or(false);
    match state
        .analytical
        .list_runs(bad_only, params.limit(), params.offset())
        .await
    {
        Ok(rows) => {
            let summaries: Vec<RunSummary> = rows.into_iter().map(RunSummary::from).collect();
            let count = summaries.len();
            ok_list(summaries, count)
        }
        Err(e) => internal(e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct IncludeRawParams {
    #[serde(default)]
    pub include_raw: Option<bool>,
}

async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(params): Query<IncludeRawParams>,
) -> Response {
    let row = match state.analytical.fetch_run(&run_id).await {
        Ok(Some(row)) => row,
        Ok(None) => return not_found("run"),
        Err(e) => return internal(e),
    };

    let steps = match state.analytical.fetch_steps_for_run(&run_id).await {
        Ok(rows) => rows.into_iter().map(StepSummary::from).collect::<Vec<_>>(),
        Err(e) => return internal(e),
    };

    let started_at = row.started_at;
    let summary = RunSummary::from(row);
    let mut data = match serde_json::to_value(&summary) {
        Ok(value) => value,
        Err(e) => return internal(e),
    };
    data["steps"] = json!(steps);

    if params.include_raw.unwrap_or(false) {
        let key = run_key(&run_id, started_at);
        match state.blob.get(&key).await {
            Ok(Some(bytes)) => {
                if let Ok(payload) = serde_json::from_slice::<Value>(&bytes) {
                    data["rawPayload"] = payload;
                }
            }
            Ok(None) => tracing::warn!(key = %key, "Run blob missing, omitting rawPayload"),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Run blob fetch failed, omitting rawPayload")
            }
        }
    }

    ok(data)
}

/// Query parameters for step details.
#[derive(Debug, Default, Deserialize)]
pub struct StepDetailsParams {
    #[serde(default)]
    pub include_raw: Option<bool>,
    pub decision_limit: Option<u64>,
}

impl StepDetailsParams {
    pub fn decision_limit(&self) -> u64 {
        self.decision_limit.unwrap_or(100).min(1000)
    }
}

async fn get_step_details(
    State(state): State<AppState>,
    Path(step_id): Path<String>,
    Query(params): Query<StepDetailsParams>,
) -> Response {
    let step = match state.analytical.fetch_step(&step_id).await {
        Ok(Some(row)) => StepSummary::from(row),
        Ok(None) => return not_found("step"),
        Err(e) => return internal(e),
    };

    let rows = match state
        .analytical
        .fetch_events_for_step(&step_id, params.decision_limit())
        .await
    {
        Ok(rows) => rows,
        Err(e) => return internal(e),
    };

    let mut decisions: Vec<EventReference> = rows.into_iter().map(EventReference::from).collect();

    if params.include_raw.unwrap_or(false) {
        for reference in &mut decisions {
            match state.blob.get(&reference.blob_key).await {
                Ok(Some(bytes)) => {
                    reference.raw_payload = serde_json::from_slice(&bytes).ok();
                }
                Ok(None) => {
                    tracing::warn!(key = %reference.blob_key, "Decision blob missing");
                }
                Err(e) => {
                    tracing::warn!(key = %reference.blob_key, error = %e, "Decision blob fetch failed");
                }
            }
        }
    }

    let count = decisions.len();
    ok_list(json!({"step": step, "decisions": decisions}), count)
}

async fn get_item_trajectory(
    State(state): State<AppState>,
    Path((run_id, item_id)): Path<(String, String)>,
) -> Response {
    match state.analytical.fetch_item_trajectory(&run_id, &item_id).await {
        Ok(rows) if rows.is_empty() => not_found("item"),
        Ok(rows) => {
            let references: Vec<EventReference> =
                rows.into_iter().map(EventReference::from).collect();
            let count = references.len();
            ok_list(references, count)
        }
        Err(e) => internal(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_row() -> RunRow {
        RunRow {
            run_id: "r1".to_string(),
            pipeline_id: "p".to_string(),
            status: "completed".to_string(),
            started_at: "2026-03-01T12:00:00Z".parse().unwrap(),
            completed_at: Some("2026-03-01T12:00:05Z".parse().unwrap()),
            error: None,
            total_steps: 2,
            total_input_count: 10,
            total_output_count: 4,
            overall_elimination_ratio: 0.6,
            metadata: r#"{"tenant":"acme"}"#.to_string(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_run_summary_shape() {
        let summary = RunSummary::from(run_row());
        let value = serde_json::to_value(&summary).unwrap();

        assert_eq!(value["runId"], "r1");
        assert_eq!(value["overallEliminationRatio"], 0.6);
        assert_eq!(value["metadata"]["tenant"], "acme");
        assert_eq!(value["startedAt"], "2026-03-01T12:00:00.000Z");
        // error omitted when absent
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_step_summary_nests_metrics() {
        let row = StepMetricsRow {
            step_id: "s1".to_string(),
            run_id: "r1".to_string(),
            pipeline_id: "p".to_string(),
            step_type: "filter".to_string(),
            name: "price-filter".to_string(),
            input_count: 4,
            output_count: 2,
            elimination_ratio: 0.5,
            kept_count: 2,
            eliminated_count: 2,
            scored_count: 0,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            updated_at: Utc::now(),
        };

        let value = serde_json::to_value(StepSummary::from(row)).unwrap();
        assert_eq!(value["type"], "filter");
        assert_eq!(value["metrics"]["inputCount"], 4);
        assert_eq!(value["metrics"]["eliminationRatio"], 0.5);
    }

    #[test]
    fn test_event_reference_shape() {
        let row = DecisionEventRow {
            run_id: "r1".to_string(),
            step_id: "s1".to_string(),
            timestamp: Utc::now(),
            event_id: "e1".to_string(),
            pipeline_id: "p".to_string(),
            outcome: "eliminated".to_string(),
            item_id: "b".to_string(),
            score: None,
            blob_key: "decisions/2026/03/01/e1.json".to_string(),
            updated_at: Utc::now(),
        };

        let value = serde_json::to_value(EventReference::from(row)).unwrap();
        assert_eq!(value["outcome"], "eliminated");
        assert_eq!(value["blobKey"], "decisions/2026/03/01/e1.json");
        // No hydration by default.
        assert!(value.get("rawPayload").is_none());
        assert!(value.get("score").is_none());
    }

    #[test]
    fn test_runs_params_defaults_and_caps() {
        let params = RunsParams::default();
        assert_eq!(params.limit(), 50);
        assert_eq!(params.offset(), 0);

        let params = RunsParams {
            bad_filter: Some(true),
            limit: Some(100_000),
            offset: Some(10),
        };
        assert_eq!(params.limit(), 1000);
        assert_eq!(params.offset(), 10);
    }

    #[test]
    fn test_step_details_params_cap() {
        let params = StepDetailsParams {
            include_raw: None,
            decision_limit: Some(50_000),
        };
        assert_eq!(params.decision_limit(), 1000);
        assert_eq!(StepDetailsParams::default().decision_limit(), 100);
    }
}

//! HTTP surface of the ingestion service.
//!
//! `POST /ingest` accepts `{type, data}` envelopes, validates them against
//! the schema for their type, and forwards valid payloads to the durable
//! queue. The service holds no database. Validation failures are 400s the
//! client must correct; enqueue failures are 500s the client may retry.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use sieve_common::QueueAdapter;

use crate::validate::{
    validate_decision, validate_decisions, validate_run, validate_step, ValidationError,
};

/// Shared handler state: just the queue handle.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn QueueAdapter>,
}

/// Build the service router.
pub fn router(queue: Arc<dyn QueueAdapter>) -> Router {
    Router::new()
        .route("/ingest", post(ingest))
        .route("/health", get(health))
        .with_state(AppState { queue })
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    }))
}

fn bad_request(error: &ValidationError) -> Response {
    let details = match error {
        ValidationError::EmptyBatch { details } => Some(json!(details)),
        _ => None,
    };
    let mut body = json!({"success": false, "error": error.to_string()});
    if let Some(details) = details {
        body["details"] = details;
    }
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

fn enqueue_failed(error: impl std::fmt::Display) -> Response {
    tracing::error!(error = %error, "Failed to enqueue validated payload");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"success": false, "error": "Failed to enqueue event"})),
    )
        .into_response()
}

async fn ingest(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let (Some(event_type), Some(data)) = (
        body.get("type").and_then(Value::as_str).map(str::to_owned),
        body.get("data").cloned(),
    ) else {
        return bad_request(&ValidationError::MissingTypeOrData);
    };

    match event_type.as_str() {
        "decision" => match validate_decision(data) {
            Ok(event) => match state.queue.push_decision_event(&event).await {
                Ok(()) => Json(json!({"success": true, "queued": true})).into_response(),
                Err(e) => enqueue_failed(e),
            },
            Err(e) => bad_request(&e),
        },
        "decisions" => match validate_decisions(data) {
            Ok(batch) => match state.queue.push_decision_events(&batch.valid).await {
                Ok(()) => {
                    if batch.is_partial() {
                        tracing::warn!(
                            queued = batch.valid.len(),
                            total = batch.total,
                            errors = ?batch.errors,
                            "Accepted partial decision batch"
                        );
                    }
                    Json(json!({
                        "success": true,
                        "queued": batch.valid.len(),
                        "total": batch.total,
                        "partial": batch.is_partial(),
                    }))
                    .into_response()
                }
                Err(e) => enqueue_failed(e),
            },
            Err(e) => bad_request(&e),
        },
        "run" => match validate_run(data) {
            Ok(run) => match state.queue.push_run(&run).await {
                Ok(()) => Json(json!({"success": true, "queued": true})).into_response(),
                Err(e) => enqueue_failed(e),
            },
            Err(e) => bad_request(&e),
        },
        "step" => match validate_step(data) {
            Ok(step) => match state.queue.push_step(&step).await {
                Ok(()) => Json(json!({"success": true, "queued": true})).into_response(),
                Err(e) => enqueue_failed(e),
            },
            Err(e) => bad_request(&e),
        },
        other => bad_request(&ValidationError::UnknownType(other.to_string())),
    }
}

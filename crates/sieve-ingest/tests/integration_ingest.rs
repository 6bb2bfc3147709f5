//! Integration tests for the ingestion HTTP surface.
//!
//! Drives the axum router directly with an in-memory queue and verifies the
//! admission contract: validation failures are 400s, enqueue failures are
//! 500s, partial batches are accepted and reported.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use sieve_common::{EventEnvelope, MemoryQueue, QueueAdapter};
use sieve_ingest::router;

async fn post_ingest(queue: Arc<dyn QueueAdapter>, body: Value) -> (StatusCode, Value) {
    let app = router(queue);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/ingest")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn valid_event(item: &str) -> Value {
    json!({
        "eventId": format!("e-{item}"),
        "stepId": "s1",
        "runId": "r1",
        "outcome": "kept",
        "itemId": item,
        "input": {"id": item},
        "reason": "Item passed filter step",
        "timestamp": "2026-03-01T12:00:00.000Z"
    })
}

#[tokio::test]
async fn test_single_decision_is_queued() {
    let queue = Arc::new(MemoryQueue::new());
    let (status, body) = post_ingest(
        queue.clone(),
        json!({"type": "decision", "data": valid_event("a")}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["queued"], json!(true));
    assert_eq!(queue.ready_len().await, 1);
}

#[tokio::test]
async fn test_run_and_step_are_queued() {
    let queue = Arc::new(MemoryQueue::new());

    let run = json!({
        "runId": "r1",
        "pipelineId": "p",
        "status": "running",
        "input": {"q": "laptops"},
        "startedAt": 1772366400000i64
    });
    let (status, _) = post_ingest(queue.clone(), json!({"type": "run", "data": run})).await;
    assert_eq!(status, StatusCode::OK);

    let step = json!({
        "stepId": "s1",
        "runId": "r1",
        "type": "filter",
        "name": "price-filter",
        "startedAt": "2026-03-01T12:00:01Z"
    });
    let (status, _) = post_ingest(queue.clone(), json!({"type": "step", "data": step})).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(queue.ready_len().await, 2);
}

#[tokio::test]
async fn test_partial_batch_reports_counts() {
    let queue = Arc::new(MemoryQueue::new());
    let (status, body) = post_ingest(
        queue.clone(),
        json!({
            "type": "decisions",
            "data": [valid_event("a"), {"broken": true}, valid_event("c")]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["queued"], json!(2));
    assert_eq!(body["total"], json!(3));
    assert_eq!(body["partial"], json!(true));

    // Only the valid events reached the queue.
    assert_eq!(queue.ready_len().await, 2);
}

#[tokio::test]
async fn test_fully_valid_batch_is_not_partial() {
    let queue = Arc::new(MemoryQueue::new());
    let (status, body) = post_ingest(
        queue.clone(),
        json!({"type": "decisions", "data": [valid_event("a"), valid_event("b")]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queued"], json!(2));
    assert_eq!(body["partial"], json!(false));
}

#[tokio::test]
async fn test_all_invalid_batch_is_400() {
    let queue = Arc::new(MemoryQueue::new());
    let (status, body) = post_ingest(
        queue.clone(),
        json!({"type": "decisions", "data": [{"broken": true}]}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
    assert!(body["details"].as_array().is_some());
    assert_eq!(queue.ready_len().await, 0);
}

#[tokio::test]
async fn test_missing_type_or_data_is_400() {
    let queue = Arc::new(MemoryQueue::new());

    let (status, body) = post_ingest(queue.clone(), json!({"data": {}})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("type and data"));

    let (status, _) = post_ingest(queue.clone(), json!({"type": "decision"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_type_is_400() {
    let queue = Arc::new(MemoryQueue::new());
    let (status, body) = post_ingest(queue, json!({"type": "metric", "data": {}})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("metric"));
}

#[tokio::test]
async fn test_invalid_payload_is_400_with_detail() {
    let queue = Arc::new(MemoryQueue::new());
    let mut event = valid_event("a");
    event["outcome"] = json!("maybe");

    let (status, body) = post_ingest(queue, json!({"type": "decision", "data": event})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("decision"));
}

#[tokio::test]
async fn test_enqueue_failure_is_500() {
    struct FailingQueue;

    #[async_trait::async_trait]
    impl QueueAdapter for FailingQueue {
        async fn push_envelope(
            &self,
            _envelope: &EventEnvelope,
        ) -> Result<(), sieve_common::QueueError> {
            Err(sieve_common::QueueError::Unavailable(
                "broker down".to_string(),
            ))
        }
        async fn poll(
            &self,
            _max: usize,
        ) -> Result<Vec<sieve_common::QueueMessage>, sieve_common::QueueError> {
            Ok(Vec::new())
        }
        async fn ack(&self, _r: &sieve_common::Receipt) -> Result<(), sieve_common::QueueError> {
            Ok(())
        }
        async fn nack(&self, _r: &sieve_common::Receipt) -> Result<(), sieve_common::QueueError> {
            Ok(())
        }
    }

    let (status, body) = post_ingest(
        Arc::new(FailingQueue),
        json!({"type": "decision", "data": valid_event("a")}),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = router(Arc::new(MemoryQueue::new()));
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], json!("ok"));
    assert!(body["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn test_queued_envelopes_decode_back() {
    let queue = Arc::new(MemoryQueue::new());
    post_ingest(
        queue.clone(),
        json!({"type": "decision", "data": valid_event("a")}),
    )
    .await;

    let batch = queue.poll(10).await.unwrap();
    assert_eq!(batch.len(), 1);
    match &batch[0].envelope {
        EventEnvelope::Decision(event) => {
            assert_eq!(event.item_id, "a");
            // Dates arrive canonicalised to timestamps.
            assert_eq!(event.timestamp.timestamp_millis(), 1772366400000);
        }
        other => panic!("wrong envelope: {}", other.type_name()),
    }
}

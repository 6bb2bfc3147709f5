//! Schema validation for ingested envelopes.
//!
//! The ingestion service is pure validate-and-forward: a payload either
//! deserializes into the canonical model (dates canonicalised, unknown
//! fields rejected) or comes back as a 400 with a machine-readable detail.
//! Batch payloads are validated element by element so one bad event does
//! not sink its neighbours.

use serde_json::Value;
use thiserror::Error;

use sieve_common::{DecisionEvent, Run, Step};

/// A rejected payload, with enough detail for the client to correct it.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Request body must include type and data")]
    MissingTypeOrData,

    #[error("Unknown event type: {0}")]
    UnknownType(String),

    #[error("Invalid {kind} payload: {detail}")]
    InvalidPayload { kind: &'static str, detail: String },

    #[error("Batch must be a non-empty array")]
    NotABatch,

    #[error("No valid events in batch")]
    EmptyBatch { details: Vec<String> },
}

fn decode<T: serde::de::DeserializeOwned>(
    kind: &'static str,
    data: Value,
) -> Result<T, ValidationError> {
    serde_json::from_value(data).map_err(|e| ValidationError::InvalidPayload {
        kind,
        detail: e.to_string(),
    })
}

fn require_non_empty(kind: &'static str, field: &str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        Err(ValidationError::InvalidPayload {
            kind,
            detail: format!("{field} must be non-empty"),
        })
    } else {
        Ok(())
    }
}

/// Validate a single decision event.
pub fn validate_decision(data: Value) -> Result<DecisionEvent, ValidationError> {
    let event: DecisionEvent = decode("decision", data)?;
    require_non_empty("decision", "eventId", &event.event_id)?;
    require_non_empty("decision", "stepId", &event.step_id)?;
    require_non_empty("decision", "runId", &event.run_id)?;
    require_non_empty("decision", "itemId", &event.item_id)?;
    Ok(event)
}

/// Validate a run.
pub fn validate_run(data: Value) -> Result<Run, ValidationError> {
    let run: Run = decode("run", data)?;
    require_non_empty("run", "runId", &run.run_id)?;
    require_non_empty("run", "pipelineId", &run.pipeline_id)?;
    if let Some(completed_at) = run.completed_at {
        if completed_at < run.started_at {
            return Err(ValidationError::InvalidPayload {
                kind: "run",
                detail: "completedAt precedes startedAt".to_string(),
            });
        }
    }
    Ok(run)
}

/// Validate a step.
pub fn validate_step(data: Value) -> Result<Step, ValidationError> {
    let step: Step = decode("step", data)?;
    require_non_empty("step", "stepId", &step.step_id)?;
    require_non_empty("step", "runId", &step.run_id)?;
    Ok(step)
}

/// Outcome of a batch validation: the events that passed, plus one error
/// string per rejected element.
#[derive(Debug)]
pub struct BatchValidation {
    pub valid: Vec<DecisionEvent>,
    pub errors: Vec<String>,
    pub total: usize,
}

impl BatchValidation {
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty() && !self.valid.is_empty()
    }
}

/// Validate a `decisions` batch element by element. A batch with zero valid
/// elements is an error; partial batches are accepted and reported.
pub fn validate_decisions(data: Value) -> Result<BatchValidation, ValidationError> {
    let Value::Array(elements) = data else {
        return Err(ValidationError::NotABatch);
    };
    if elements.is_empty() {
        return Err(ValidationError::NotABatch);
    }

    let total = elements.len();
    let mut valid = Vec::with_capacity(total);
    let mut errors = Vec::new();

    for (index, element) in elements.into_iter().enumerate() {
        match validate_decision(element) {
            Ok(event) => valid.push(event),
            Err(e) => errors.push(format!("element {index}: {e}")),
        }
    }

    if valid.is_empty() {
        return Err(ValidationError::EmptyBatch { details: errors });
    }

    Ok(BatchValidation {
        valid,
        errors,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

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

    #[test]
    fn test_validate_decision_accepts_both_date_forms() {
        let mut with_millis = valid_event("a");
        with_millis["timestamp"] = json!(1772366400000i64);
        let event = validate_decision(with_millis).unwrap();
        assert_eq!(event.timestamp.timestamp_millis(), 1772366400000);

        let event = validate_decision(valid_event("b")).unwrap();
        assert_eq!(event.item_id, "b");
    }

    #[test]
    fn test_validate_decision_rejects_unknown_fields() {
        let mut event = valid_event("a");
        event["extra"] = json!("nope");
        assert!(validate_decision(event).is_err());
    }

    #[test]
    fn test_validate_decision_rejects_bad_outcome() {
        let mut event = valid_event("a");
        event["outcome"] = json!("maybe");
        assert!(validate_decision(event).is_err());
    }

    #[test]
    fn test_validate_decision_rejects_empty_ids() {
        let mut event = valid_event("a");
        event["runId"] = json!("");
        assert!(validate_decision(event).is_err());
    }

    #[test]
    fn test_validate_run_ordering_invariant() {
        let run = json!({
            "runId": "r1",
            "pipelineId": "p",
            "status": "completed",
            "input": null,
            "startedAt": "2026-03-01T12:00:00Z",
            "completedAt": "2026-03-01T11:00:00Z"
        });
        let error = validate_run(run).unwrap_err();
        assert!(error.to_string().contains("completedAt"));
    }

    #[test]
    fn test_validate_step() {
        let step = json!({
            "stepId": "s1",
            "runId": "r1",
            "type": "filter",
            "name": "price-filter",
            "startedAt": 1772366400000i64
        });
        let step = validate_step(step).unwrap();
        assert_eq!(step.name, "price-filter");
    }

    #[test]
    fn test_validate_decisions_partial_batch() {
        let batch = json!([valid_event("a"), {"broken": true}, valid_event("c")]);
        let result = validate_decisions(batch).unwrap();

        assert_eq!(result.total, 3);
        assert_eq!(result.valid.len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert!(result.is_partial());
        assert!(result.errors[0].starts_with("element 1:"));
    }

    #[test]
    fn test_validate_decisions_all_invalid_is_error() {
        let batch = json!([{"broken": true}, {"also": "broken"}]);
        let error = validate_decisions(batch).unwrap_err();
        match error {
            ValidationError::EmptyBatch { details } => assert_eq!(details.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_decisions_rejects_non_array() {
        assert!(validate_decisions(json!({"not": "array"})).is_err());
        assert!(validate_decisions(json!([])).is_err());
    }
}

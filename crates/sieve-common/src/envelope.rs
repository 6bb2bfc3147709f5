//! Heterogeneous event envelope `{type, data}`.
//!
//! The wire format is a tagged variant over a small closed set of types:
//! `decision`, `decisions`, `run`, `step`. Modeled as a sum type so every
//! consumer dispatches exhaustively instead of probing an untyped record.

use serde::{Deserialize, Serialize};

use crate::model::{DecisionEvent, Run, Step};

/// One ingested message. Serializes to `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum EventEnvelope {
    Decision(DecisionEvent),
    Decisions(Vec<DecisionEvent>),
    Run(Run),
    Step(Step),
}

impl EventEnvelope {
    /// Wire name of the variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            EventEnvelope::Decision(_) => "decision",
            EventEnvelope::Decisions(_) => "decisions",
            EventEnvelope::Run(_) => "run",
            EventEnvelope::Step(_) => "step",
        }
    }

    /// Stable identity used by the processor's idempotency set.
    ///
    /// Runs and steps are legitimately delivered twice (start and
    /// completion), so their key includes the lifecycle position; decision
    /// events are append-once and keyed by id alone. Batch envelopes have no
    /// single identity; their elements are deduplicated individually.
    pub fn dedupe_key(&self) -> Option<String> {
        match self {
            EventEnvelope::Decision(event) => Some(format!("decision:{}", event.event_id)),
            EventEnvelope::Decisions(_) => None,
            EventEnvelope::Run(run) => Some(format!("run:{}:{}", run.run_id, run.status)),
            EventEnvelope::Step(step) => Some(format!(
                "step:{}:{}",
                step.step_id,
                if step.completed_at.is_some() {
                    "completed"
                } else {
                    "started"
                }
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunStatus, StepType};
    use serde_json::json;

    #[test]
    fn test_envelope_wire_shape() {
        let run = Run::new("p", json!(null), None);
        let envelope = EventEnvelope::Run(run.clone());
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["type"], "run");
        assert_eq!(value["data"]["runId"], run.run_id.as_str());
    }

    #[test]
    fn test_envelope_roundtrip_decisions() {
        let value = json!({
            "type": "decisions",
            "data": [{
                "eventId": "e1",
                "stepId": "s1",
                "runId": "r1",
                "outcome": "eliminated",
                "itemId": "b",
                "input": {"id": "b"},
                "reason": "Item eliminated by filter step",
                "timestamp": 1772366400500i64
            }]
        });

        let envelope: EventEnvelope = serde_json::from_value(value).unwrap();
        match envelope {
            EventEnvelope::Decisions(events) => {
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].item_id, "b");
            }
            other => panic!("wrong variant: {}", other.type_name()),
        }
    }

    #[test]
    fn test_envelope_unknown_type_rejected() {
        let result: Result<EventEnvelope, _> =
            serde_json::from_value(json!({"type": "metric", "data": {}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_dedupe_key_distinguishes_lifecycle() {
        let mut run = Run::new("p", json!(null), None);
        let started = EventEnvelope::Run(run.clone()).dedupe_key().unwrap();
        run.finish(None, None);
        let finished = EventEnvelope::Run(run.clone()).dedupe_key().unwrap();

        assert_ne!(started, finished);
        assert_eq!(run.status, RunStatus::Completed);

        let mut step = Step::new("r", "p", StepType::Filter, "f", None);
        let open = EventEnvelope::Step(step.clone()).dedupe_key().unwrap();
        step.completed_at = Some(chrono::Utc::now());
        let closed = EventEnvelope::Step(step).dedupe_key().unwrap();
        assert_ne!(open, closed);
    }

    #[test]
    fn test_dedupe_key_batch_has_none() {
        let envelope = EventEnvelope::Decisions(Vec::new());
        assert!(envelope.dedupe_key().is_none());
    }
}

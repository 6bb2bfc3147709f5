//! Canonical types for the decision observability pipeline.
//!
//! Three entities flow end-to-end: a `Run` is one pipeline execution, a
//! `Step` is one node within a run, and a `DecisionEvent` records a single
//! per-item outcome at a single step. All timestamps are UTC with
//! millisecond precision; on the wire they are accepted both as ISO-8601
//! strings and as epoch milliseconds, and always emitted as ISO-8601.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque user payload mapping (config, metadata). Passed through the
/// pipeline unmodified; never typed beyond "string to JSON value".
pub type JsonMap = BTreeMap<String, Value>;

/// Terminal and non-terminal run states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Whether this status is absorbing (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of work a step performs. Drives automatic decision derivation:
/// `rank` and `score` steps produce `scored` outcomes, the rest produce
/// `kept`/`eliminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Filter,
    Rank,
    Llm,
    Transform,
    Score,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Filter => "filter",
            StepType::Rank => "rank",
            StepType::Llm => "llm",
            StepType::Transform => "transform",
            StepType::Score => "score",
        }
    }

    /// Steps whose output elements carry a score rather than a keep/drop
    /// verdict.
    pub fn is_scoring(&self) -> bool {
        matches!(self, StepType::Rank | StepType::Score)
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happened to one item at one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Kept,
    Eliminated,
    Scored,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Kept => "kept",
            Outcome::Eliminated => "eliminated",
            Outcome::Scored => "scored",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One pipeline execution.
///
/// Created by the capture facade in `Running` status and mutated only by the
/// same facade on termination. Once terminal, the client never touches it
/// again; the processor recreates runs independently in its cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Run {
    pub run_id: String,
    pub pipeline_id: String,
    pub status: RunStatus,
    /// Opaque pipeline input payload.
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(with = "ts_millis")]
    pub started_at: DateTime<Utc>,
    #[serde(
        default,
        with = "ts_millis_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonMap>,
}

impl Run {
    /// Create a new run in `Running` status with a fresh id.
    pub fn new(pipeline_id: impl Into<String>, input: Value, metadata: Option<JsonMap>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            pipeline_id: pipeline_id.into(),
            status: RunStatus::Running,
            input,
            output: None,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            metadata,
        }
    }

    /// Transition to a terminal state. `Failed` iff an error is supplied.
    pub fn finish(&mut self, output: Option<Value>, error: Option<String>) {
        self.status = if error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        self.completed_at = Some(Utc::now());
        self.output = output;
        self.error = error;
    }
}

/// One node within a run.
///
/// Steps of the same type may repeat within a run; `step_id` distinguishes
/// them. `run_id` and `pipeline_id` are denormalized onto the record so the
/// processor never needs a join to associate a step with its run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Step {
    pub step_id: String,
    pub run_id: String,
    #[serde(default)]
    pub pipeline_id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub name: String,
    /// Step knobs (thresholds, match types) echoed into events so queries
    /// can correlate behavior to configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<JsonMap>,
    #[serde(with = "ts_millis")]
    pub started_at: DateTime<Utc>,
    #[serde(
        default,
        with = "ts_millis_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(
        run_id: impl Into<String>,
        pipeline_id: impl Into<String>,
        step_type: StepType,
        name: impl Into<String>,
        config: Option<JsonMap>,
    ) -> Self {
        Self {
            step_id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            pipeline_id: pipeline_id.into(),
            step_type,
            name: name.into(),
            config,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Read an integer knob out of the config map.
    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.as_ref()?.get(key)?.as_u64()
    }
}

/// One decision about one item at one step. Appended once by the client,
/// never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DecisionEvent {
    pub event_id: String,
    pub step_id: String,
    pub run_id: String,
    #[serde(default)]
    pub pipeline_id: String,
    pub outcome: Outcome,
    /// Stable across steps for the same item.
    pub item_id: String,
    /// The item as seen by the step.
    pub input: Value,
    /// The item as emitted, when it survived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Carries `inputCount`, `outputCount`, the `sampled` flag and echoed
    /// step config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonMap>,
    #[serde(with = "ts_millis")]
    pub timestamp: DateTime<Utc>,
}

impl DecisionEvent {
    /// Read an integer field out of the metadata map.
    pub fn metadata_u64(&self, key: &str) -> Option<u64> {
        self.metadata.as_ref()?.get(key)?.as_u64()
    }
}

/// Builder for decision events, used by the capture facade.
#[derive(Debug)]
pub struct DecisionEventBuilder {
    event: DecisionEvent,
}

impl DecisionEventBuilder {
    pub fn new(
        step_id: impl Into<String>,
        run_id: impl Into<String>,
        pipeline_id: impl Into<String>,
    ) -> Self {
        Self {
            event: DecisionEvent {
                event_id: Uuid::new_v4().to_string(),
                step_id: step_id.into(),
                run_id: run_id.into(),
                pipeline_id: pipeline_id.into(),
                outcome: Outcome::Kept,
                item_id: String::new(),
                input: Value::Null,
                output: None,
                reason: String::new(),
                score: None,
                metadata: None,
                timestamp: Utc::now(),
            },
        }
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.event.outcome = outcome;
        self
    }

    pub fn item_id(mut self, item_id: impl Into<String>) -> Self {
        self.event.item_id = item_id.into();
        self
    }

    pub fn input(mut self, input: Value) -> Self {
        self.event.input = input;
        self
    }

    pub fn output(mut self, output: Option<Value>) -> Self {
        self.event.output = output;
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.event.reason = reason.into();
        self
    }

    pub fn score(mut self, score: Option<f64>) -> Self {
        self.event.score = score;
        self
    }

    pub fn metadata(mut self, metadata: JsonMap) -> Self {
        self.event.metadata = Some(metadata);
        self
    }

    pub fn build(self) -> DecisionEvent {
        self.event
    }
}

/// Elimination ratio for a step or run: `1 - output/max(input, 1)`, clamped
/// to `[0, 1]`. Zero inputs yield zero by definition.
pub fn elimination_ratio(input_count: u64, output_count: u64) -> f64 {
    let denominator = input_count.max(1) as f64;
    (1.0 - output_count as f64 / denominator).clamp(0.0, 1.0)
}

/// Serde helper: emit ISO-8601, accept ISO-8601 strings or epoch millis.
pub mod ts_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Iso(String),
        Millis(i64),
    }

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        match Wire::deserialize(d)? {
            Wire::Iso(s) => s
                .parse::<DateTime<Utc>>()
                .map_err(|e| serde::de::Error::custom(format!("invalid timestamp {s:?}: {e}"))),
            Wire::Millis(ms) => DateTime::from_timestamp_millis(ms).ok_or_else(|| {
                serde::de::Error::custom(format!("timestamp out of range: {ms}"))
            }),
        }
    }
}

/// Serde helper: optional variant of [`ts_millis`].
pub mod ts_millis_option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => super::ts_millis::serialize(dt, s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Iso(String),
            Millis(i64),
        }
        let wire = Option::<Wire>::deserialize(d)?;
        match wire {
            None => Ok(None),
            Some(Wire::Iso(s)) => s
                .parse::<DateTime<Utc>>()
                .map(Some)
                .map_err(serde::de::Error::custom),
            Some(Wire::Millis(ms)) => DateTime::from_timestamp_millis(ms)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {ms}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_run_new_is_running() {
        let run = Run::new("search-pipeline", json!({"query": "laptops"}), None);

        assert_eq!(run.pipeline_id, "search-pipeline");
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.completed_at.is_none());
        assert!(run.error.is_none());
        assert!(!run.run_id.is_empty());
    }

    #[test]
    fn test_run_finish_completed() {
        let mut run = Run::new("p", json!(null), None);
        run.finish(Some(json!([1, 2])), None);

        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.completed_at.unwrap() >= run.started_at);
        assert!(run.error.is_none());
    }

    #[test]
    fn test_run_finish_failed_iff_error() {
        let mut run = Run::new("p", json!(null), None);
        run.finish(None, Some("step blew up".to_string()));

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("step blew up"));
    }

    #[test]
    fn test_step_new() {
        let step = Step::new("run-1", "p", StepType::Filter, "price-filter", None);

        assert_eq!(step.run_id, "run-1");
        assert_eq!(step.step_type, StepType::Filter);
        assert!(step.completed_at.is_none());
    }

    #[test]
    fn test_step_config_u64() {
        let mut config = JsonMap::new();
        config.insert("inputCount".to_string(), json!(42));
        let step = Step::new("r", "p", StepType::Filter, "f", Some(config));

        assert_eq!(step.config_u64("inputCount"), Some(42));
        assert_eq!(step.config_u64("missing"), None);
    }

    #[test]
    fn test_step_type_is_scoring() {
        assert!(StepType::Rank.is_scoring());
        assert!(StepType::Score.is_scoring());
        assert!(!StepType::Filter.is_scoring());
        assert!(!StepType::Llm.is_scoring());
        assert!(!StepType::Transform.is_scoring());
    }

    #[test]
    fn test_elimination_ratio() {
        assert_eq!(elimination_ratio(4, 2), 0.5);
        assert_eq!(elimination_ratio(10, 10), 0.0);
        assert_eq!(elimination_ratio(10, 0), 1.0);
        // Zero inputs are defined to have ratio 0.
        assert_eq!(elimination_ratio(0, 0), 0.0);
        // More output than input clamps rather than going negative.
        assert_eq!(elimination_ratio(2, 4), 0.0);
    }

    #[test]
    fn test_timestamps_accept_iso_and_millis() {
        let from_iso: Run = serde_json::from_value(json!({
            "runId": "r1",
            "pipelineId": "p",
            "status": "running",
            "input": null,
            "startedAt": "2026-03-01T12:00:00.500Z"
        }))
        .unwrap();
        let from_millis: Run = serde_json::from_value(json!({
            "runId": "r1",
            "pipelineId": "p",
            "status": "running",
            "input": null,
            "startedAt": 1772366400500i64
        }))
        .unwrap();

        assert_eq!(from_iso.started_at, from_millis.started_at);
        assert_eq!(from_iso.started_at.timestamp_millis(), 1772366400500);
    }

    #[test]
    fn test_timestamps_emitted_as_iso() {
        let run = Run::new("p", json!(null), None);
        let value = serde_json::to_value(&run).unwrap();
        let emitted = value["startedAt"].as_str().unwrap();

        assert!(emitted.ends_with('Z'));
        assert!(emitted.parse::<DateTime<Utc>>().is_ok());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<DecisionEvent, _> = serde_json::from_value(json!({
            "eventId": "e1",
            "stepId": "s1",
            "runId": "r1",
            "outcome": "kept",
            "itemId": "a",
            "input": {},
            "reason": "ok",
            "timestamp": 1772366400500i64,
            "bogus": true
        }));

        assert!(result.is_err());
    }

    #[test]
    fn test_decision_event_roundtrip() {
        let mut metadata = JsonMap::new();
        metadata.insert("inputCount".to_string(), json!(4));
        metadata.insert("sampled".to_string(), json!(false));

        let event = DecisionEventBuilder::new("s1", "r1", "p")
            .outcome(Outcome::Scored)
            .item_id("item-a")
            .input(json!({"id": "a"}))
            .output(Some(json!({"id": "a", "score": 0.9})))
            .reason("Item scored: 0.9")
            .score(Some(0.9))
            .metadata(metadata)
            .build();

        let json = serde_json::to_string(&event).unwrap();
        let decoded: DecisionEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded.event_id, event.event_id);
        assert_eq!(decoded.outcome, Outcome::Scored);
        assert_eq!(decoded.score, Some(0.9));
        assert_eq!(decoded.metadata_u64("inputCount"), Some(4));
        assert_eq!(decoded.timestamp, event.timestamp);
    }

    #[test]
    fn test_outcome_wire_casing() {
        assert_eq!(serde_json::to_string(&Outcome::Kept).unwrap(), "\"kept\"");
        assert_eq!(
            serde_json::to_string(&StepType::Transform).unwrap(),
            "\"transform\""
        );
        assert_eq!(
            serde_json::to_string(&RunStatus::Failed).unwrap(),
            "\"failed\""
        );
    }
}

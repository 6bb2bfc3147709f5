//! Automatic decision derivation from a step's input/output diff.
//!
//! Given the value a step consumed and the value it produced, derive one
//! `DecisionEvent` per input item. Structural inspection requires a runtime
//! value model, so derivation works on `serde_json::Value`; statically typed
//! pipelines are better served by passing decisions explicitly through the
//! decision callback, and this module is the fallback for dynamic shapes
//! (sequences of objects with an identity field).

use serde_json::Value;

use sieve_common::{DecisionEvent, DecisionEventBuilder, JsonMap, Outcome, Step, StepType};

use crate::config::CaptureLevel;
use crate::sampler::{should_sample, target_size};

/// Explicit decision returned by an application callback. `None` from the
/// callback skips the item entirely.
#[derive(Debug, Clone)]
pub struct DecisionOverride {
    pub outcome: Outcome,
    pub reason: String,
    pub score: Option<f64>,
}

/// Application callback deciding an item's fate: receives the input element
/// and the presumed output element.
pub type DecisionFn = dyn Fn(&Value, Option<&Value>) -> Option<DecisionOverride> + Send + Sync;

/// Length of an ordered sequence, or 1 for a scalar payload.
pub fn input_count_of(value: &Value) -> u64 {
    match value {
        Value::Array(items) => items.len() as u64,
        _ => 1,
    }
}

/// Like [`input_count_of`] but for the produced side, where absence (or an
/// explicit null) means nothing came out.
pub fn output_count_of(value: Option<&Value>) -> u64 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Array(items)) => items.len() as u64,
        Some(_) => 1,
    }
}

/// Identity of an element: the first present of `id`, `itemId`, `key` on an
/// object. Strings and numbers qualify; anything else falls through to the
/// positional fallback.
fn identity_of(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    for key in ["id", "itemId", "key"] {
        match object.get(key) {
            Some(Value::String(s)) => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn eliminated_reason(step_type: StepType, config: &JsonMap) -> String {
    if let Some(threshold) = config.get("threshold") {
        format!("Item below threshold {threshold}")
    } else if let Some(match_type) = config.get("matchType") {
        format!("Item did not match {match_type} criteria")
    } else {
        format!("Item eliminated by {step_type} step")
    }
}

fn automatic_decision(
    step_type: StepType,
    config: &JsonMap,
    matched: Option<&Value>,
) -> DecisionOverride {
    match matched {
        Some(output) if step_type.is_scoring() => {
            let score = output
                .get("score")
                .and_then(Value::as_f64)
                .or_else(|| output.get("relevanceScore").and_then(Value::as_f64));
            let reason = match score {
                Some(s) => format!("Item scored: {s}"),
                None => "Item scored: unknown".to_string(),
            };
            DecisionOverride {
                outcome: Outcome::Scored,
                reason,
                score,
            }
        }
        Some(_) => DecisionOverride {
            outcome: Outcome::Kept,
            reason: format!("Item passed {step_type} step"),
            score: None,
        },
        None => DecisionOverride {
            outcome: Outcome::Eliminated,
            reason: eliminated_reason(step_type, config),
            score: None,
        },
    }
}

fn event_metadata(
    config: &JsonMap,
    input_count: u64,
    output_count: u64,
    sampled: bool,
) -> JsonMap {
    let mut metadata = JsonMap::new();
    metadata.insert("inputCount".to_string(), Value::from(input_count));
    metadata.insert("outputCount".to_string(), Value::from(output_count));
    metadata.insert("sampled".to_string(), Value::from(sampled));
    if !config.is_empty() {
        metadata.insert(
            "config".to_string(),
            Value::Object(config.clone().into_iter().collect()),
        );
    }
    metadata
}

/// Derive the decision events for one completed step.
///
/// The per-item diff only applies when both sides are ordered sequences;
/// otherwise at most one event describes the whole payload. Under the
/// `sampled` capture level, only indices selected by the deterministic
/// sampler are emitted; under `metrics_only`, nothing is.
pub fn derive_decisions(
    step: &Step,
    input: &Value,
    output: Option<&Value>,
    config: &JsonMap,
    level: CaptureLevel,
    decision_fn: Option<&DecisionFn>,
) -> Vec<DecisionEvent> {
    if level == CaptureLevel::MetricsOnly {
        return Vec::new();
    }

    let input_count = input_count_of(input);
    let output_count = output_count_of(output);

    let (Value::Array(input_items), Some(Value::Array(output_items))) = (input, output) else {
        return derive_single(step, input, output, config, input_count, output_count);
    };

    // Map identified output elements to their index for O(1) lookup.
    // Elements without an identity field stay out of the map: positional
    // fallback ids index two unrelated collections and must never be used
    // as match keys.
    let mut by_identity = std::collections::HashMap::new();
    for (index, item) in output_items.iter().enumerate() {
        if let Some(id) = identity_of(item) {
            by_identity.entry(id).or_insert(index);
        }
    }

    let n = input_items.len();
    let k = target_size(n);
    let mut events = Vec::new();

    for (i, item) in input_items.iter().enumerate() {
        let identity = identity_of(item);
        let item_id = identity
            .clone()
            .unwrap_or_else(|| format!("item-{i}"));

        // Identity lookup first, whole-value equality as the fallback.
        let matched: Option<&Value> = identity
            .as_ref()
            .and_then(|id| by_identity.get(id))
            .map(|&index| &output_items[index])
            .or_else(|| output_items.iter().find(|candidate| *candidate == item));

        let decision = match decision_fn {
            Some(callback) => match callback(item, matched) {
                Some(decision) => decision,
                None => continue,
            },
            None => automatic_decision(step.step_type, config, matched),
        };

        if level == CaptureLevel::Sampled && !should_sample(i, n, k) {
            continue;
        }
        let sampled = i > 0 && n > 0 && i < n - 1;

        events.push(
            DecisionEventBuilder::new(&step.step_id, &step.run_id, &step.pipeline_id)
                .outcome(decision.outcome)
                .item_id(item_id)
                .input(item.clone())
                .output(matched.cloned())
                .reason(decision.reason)
                .score(decision.score)
                .metadata(event_metadata(config, input_count, output_count, sampled))
                .build(),
        );
    }

    events
}

/// Non-sequence payloads collapse to one event describing the whole step.
fn derive_single(
    step: &Step,
    input: &Value,
    output: Option<&Value>,
    config: &JsonMap,
    input_count: u64,
    output_count: u64,
) -> Vec<DecisionEvent> {
    let produced = output_count > 0;
    let (outcome, reason) = if produced {
        (
            Outcome::Kept,
            format!("Item passed {} step", step.step_type),
        )
    } else {
        (Outcome::Eliminated, eliminated_reason(step.step_type, config))
    };

    vec![
        DecisionEventBuilder::new(&step.step_id, &step.run_id, &step.pipeline_id)
            .outcome(outcome)
            .item_id("single-item")
            .input(input.clone())
            .output(output.filter(|v| !v.is_null()).cloned())
            .reason(reason)
            .metadata(event_metadata(config, input_count, output_count, false))
            .build(),
    ]
}

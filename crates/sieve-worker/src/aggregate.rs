//! Per-step and per-run metric aggregation.
//!
//! Aggregation is commutative (counts by outcome), so it tolerates any
//! arrival order and any amount of redelivery. The interesting part is
//! where `input_count` comes from: a configured value beats event metadata,
//! which beats counting the captured events — captured events are a sample
//! under the `sampled` level and would undercount.

use chrono::Utc;

use sieve_common::analytical::{DecisionEventRow, RunRow, StepMetricsRow};
use sieve_common::{elimination_ratio, DecisionEvent, Outcome, Run, Step};

/// Which source supplied a step's `input_count`, kept for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountSource {
    /// `config.inputCount` on the step record.
    Config,
    /// `metadata.inputCount` of the first captured event.
    EventMetadata,
    /// Number of captured events (last resort).
    EventCount,
}

impl CountSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CountSource::Config => "config",
            CountSource::EventMetadata => "event_metadata",
            CountSource::EventCount => "event_count",
        }
    }
}

/// Aggregated metrics for one completed step.
#[derive(Debug, Clone)]
pub struct StepAggregation {
    pub input_count: u64,
    pub output_count: u64,
    pub kept_count: u64,
    pub eliminated_count: u64,
    pub scored_count: u64,
    pub elimination_ratio: f64,
    pub input_count_source: CountSource,
}

/// Aggregate a step's captured decision events into its metrics row values.
pub fn aggregate_step(step: &Step, events: &[DecisionEvent]) -> StepAggregation {
    let mut kept_count = 0u64;
    let mut eliminated_count = 0u64;
    let mut scored_count = 0u64;
    for event in events {
        match event.outcome {
            Outcome::Kept => kept_count += 1,
            Outcome::Eliminated => eliminated_count += 1,
            Outcome::Scored => scored_count += 1,
        }
    }

    // Precedence: configured > first-event metadata > event-list length.
    let (input_count, input_count_source) = if let Some(count) = step.config_u64("inputCount") {
        (count, CountSource::Config)
    } else if let Some(count) = events.first().and_then(|e| e.metadata_u64("inputCount")) {
        (count, CountSource::EventMetadata)
    } else {
        (events.len() as u64, CountSource::EventCount)
    };

    let output_count = step
        .config_u64("outputCount")
        .or_else(|| events.first().and_then(|e| e.metadata_u64("outputCount")))
        .unwrap_or(kept_count + scored_count);

    StepAggregation {
        input_count,
        output_count,
        kept_count,
        eliminated_count,
        scored_count,
        elimination_ratio: elimination_ratio(input_count, output_count),
        input_count_source,
    }
}

/// Build the metrics row for a completed step.
pub fn step_row(step: &Step, aggregation: &StepAggregation) -> StepMetricsRow {
    StepMetricsRow {
        step_id: step.step_id.clone(),
        run_id: step.run_id.clone(),
        pipeline_id: step.pipeline_id.clone(),
        step_type: step.step_type.as_str().to_string(),
        name: step.name.clone(),
        input_count: aggregation.input_count,
        output_count: aggregation.output_count,
        elimination_ratio: aggregation.elimination_ratio,
        kept_count: aggregation.kept_count,
        eliminated_count: aggregation.eliminated_count,
        scored_count: aggregation.scored_count,
        started_at: step.started_at,
        completed_at: step.completed_at,
        updated_at: Utc::now(),
    }
}

/// Totals for one terminal run, summed over its steps' aggregations.
#[derive(Debug, Clone, Default)]
pub struct RunAggregation {
    pub total_steps: u32,
    pub total_input_count: u64,
    pub total_output_count: u64,
    pub overall_elimination_ratio: f64,
}

/// Sum step aggregations into run totals.
pub fn aggregate_run(steps: &[StepAggregation]) -> RunAggregation {
    let total_input_count: u64 = steps.iter().map(|s| s.input_count).sum();
    let total_output_count: u64 = steps.iter().map(|s| s.output_count).sum();

    RunAggregation {
        total_steps: steps.len() as u32,
        total_input_count,
        total_output_count,
        overall_elimination_ratio: elimination_ratio(total_input_count, total_output_count),
    }
}

/// Build the row for a terminal run.
pub fn run_row(run: &Run, aggregation: &RunAggregation) -> RunRow {
    let metadata = run
        .metadata
        .as_ref()
        .and_then(|m| serde_json::to_string(m).ok())
        .unwrap_or_else(|| "{}".to_string());

    RunRow {
        run_id: run.run_id.clone(),
        pipeline_id: run.pipeline_id.clone(),
        status: run.status.as_str().to_string(),
        started_at: run.started_at,
        completed_at: run.completed_at,
        error: run.error.clone(),
        total_steps: aggregation.total_steps,
        total_input_count: aggregation.total_input_count,
        total_output_count: aggregation.total_output_count,
        overall_elimination_ratio: aggregation.overall_elimination_ratio,
        metadata,
        updated_at: Utc::now(),
    }
}

/// Build the reference row for one decision event.
pub fn decision_event_row(event: &DecisionEvent, blob_key: &str) -> DecisionEventRow {
    DecisionEventRow {
        run_id: event.run_id.clone(),
        step_id: event.step_id.clone(),
        timestamp: event.timestamp,
        event_id: event.event_id.clone(),
        pipeline_id: event.pipeline_id.clone(),
        outcome: event.outcome.as_str().to_string(),
        item_id: event.item_id.clone(),
        score: event.score,
        blob_key: blob_key.to_string(),
        updated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sieve_common::{DecisionEventBuilder, JsonMap, StepType};

    fn step_with_config(config: Option<JsonMap>) -> Step {
        Step::new("r1", "p", StepType::Filter, "price-filter", config)
    }

    fn event(outcome: Outcome, metadata: Option<JsonMap>) -> DecisionEvent {
        let builder = DecisionEventBuilder::new("s1", "r1", "p")
            .outcome(outcome)
            .item_id("x");
        match metadata {
            Some(m) => builder.metadata(m).build(),
            None => builder.build(),
        }
    }

    fn counted_metadata(input: u64, output: u64) -> JsonMap {
        let mut m = JsonMap::new();
        m.insert("inputCount".to_string(), json!(input));
        m.insert("outputCount".to_string(), json!(output));
        m
    }

    #[test]
    fn test_outcome_counting() {
        let events = vec![
            event(Outcome::Kept, None),
            event(Outcome::Kept, None),
            event(Outcome::Eliminated, None),
            event(Outcome::Scored, None),
        ];
        let agg = aggregate_step(&step_with_config(None), &events);

        assert_eq!(agg.kept_count, 2);
        assert_eq!(agg.eliminated_count, 1);
        assert_eq!(agg.scored_count, 1);
    }

    #[test]
    fn test_input_count_prefers_config() {
        let mut config = JsonMap::new();
        config.insert("inputCount".to_string(), json!(5000));
        let events = vec![event(Outcome::Kept, Some(counted_metadata(37, 20)))];

        let agg = aggregate_step(&step_with_config(Some(config)), &events);
        assert_eq!(agg.input_count, 5000);
        assert_eq!(agg.input_count_source, CountSource::Config);
    }

    #[test]
    fn test_input_count_falls_back_to_event_metadata() {
        let events = vec![event(Outcome::Kept, Some(counted_metadata(4, 2)))];
        let agg = aggregate_step(&step_with_config(None), &events);

        assert_eq!(agg.input_count, 4);
        assert_eq!(agg.output_count, 2);
        assert_eq!(agg.input_count_source, CountSource::EventMetadata);
    }

    #[test]
    fn test_input_count_last_resort_is_event_count() {
        let events = vec![event(Outcome::Kept, None), event(Outcome::Eliminated, None)];
        let agg = aggregate_step(&step_with_config(None), &events);

        assert_eq!(agg.input_count, 2);
        assert_eq!(agg.input_count_source, CountSource::EventCount);
        // No counts anywhere: output falls back to kept + scored.
        assert_eq!(agg.output_count, 1);
    }

    #[test]
    fn test_happy_path_filter_scenario() {
        // 4 in, 2 kept, 2 eliminated.
        let mut config = JsonMap::new();
        config.insert("inputCount".to_string(), json!(4));
        config.insert("outputCount".to_string(), json!(2));
        let events = vec![
            event(Outcome::Kept, None),
            event(Outcome::Eliminated, None),
            event(Outcome::Kept, None),
            event(Outcome::Eliminated, None),
        ];

        let agg = aggregate_step(&step_with_config(Some(config)), &events);
        assert_eq!(agg.input_count, 4);
        assert_eq!(agg.output_count, 2);
        assert_eq!(agg.kept_count, 2);
        assert_eq!(agg.eliminated_count, 2);
        assert_eq!(agg.elimination_ratio, 0.5);
        // Filter invariant: input - output = eliminated.
        assert_eq!(agg.input_count - agg.output_count, agg.eliminated_count);
    }

    #[test]
    fn test_zero_input_step() {
        let mut config = JsonMap::new();
        config.insert("inputCount".to_string(), json!(0));
        config.insert("outputCount".to_string(), json!(0));

        let agg = aggregate_step(&step_with_config(Some(config)), &[]);
        assert_eq!(agg.input_count, 0);
        assert_eq!(agg.elimination_ratio, 0.0);
        assert_eq!(agg.kept_count + agg.eliminated_count + agg.scored_count, 0);
    }

    #[test]
    fn test_run_aggregation_sums_steps() {
        let steps = vec![
            StepAggregation {
                input_count: 4,
                output_count: 2,
                kept_count: 2,
                eliminated_count: 2,
                scored_count: 0,
                elimination_ratio: 0.5,
                input_count_source: CountSource::Config,
            },
            StepAggregation {
                input_count: 2,
                output_count: 1,
                kept_count: 1,
                eliminated_count: 1,
                scored_count: 0,
                elimination_ratio: 0.5,
                input_count_source: CountSource::Config,
            },
        ];

        let agg = aggregate_run(&steps);
        assert_eq!(agg.total_steps, 2);
        assert_eq!(agg.total_input_count, 6);
        assert_eq!(agg.total_output_count, 3);
        assert_eq!(agg.overall_elimination_ratio, 0.5);
    }

    #[test]
    fn test_run_aggregation_empty() {
        let agg = aggregate_run(&[]);
        assert_eq!(agg.total_steps, 0);
        assert_eq!(agg.overall_elimination_ratio, 0.0);
    }

    #[test]
    fn test_run_row_carries_error_and_metadata() {
        let mut metadata = JsonMap::new();
        metadata.insert("tenant".to_string(), json!("acme"));
        let mut run = Run::new("p", json!(null), Some(metadata));
        run.finish(None, Some("step blew up".to_string()));

        let row = run_row(&run, &RunAggregation::default());
        assert_eq!(row.status, "failed");
        assert_eq!(row.error.as_deref(), Some("step blew up"));
        assert!(row.metadata.contains("acme"));
    }

    #[test]
    fn test_decision_event_row_reference() {
        let event = DecisionEventBuilder::new("s1", "r1", "p")
            .outcome(Outcome::Scored)
            .item_id("a")
            .score(Some(0.7))
            .build();

        let row = decision_event_row(&event, "decisions/2026/03/05/e.json");
        assert_eq!(row.outcome, "scored");
        assert_eq!(row.score, Some(0.7));
        assert_eq!(row.blob_key, "decisions/2026/03/05/e.json");
        assert_eq!(row.timestamp, event.timestamp);
    }
}

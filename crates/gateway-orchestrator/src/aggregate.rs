//! Result aggregation and workflow timing.
//!
//! Aggregation is additive: every task appears in the output, completed or
//! not, under its id and agent type.

use crate::workflow::{
    AggregatedResult, AggregatedSection, TaskTiming, WorkflowMetrics, WorkflowTaskOutcome,
};
use gateway_core::TaskStatus;
use std::fmt::Write as _;
use std::time::Duration;

/// Merge task outcomes into one composite payload
#[must_use]
pub fn aggregate(outcomes: &[WorkflowTaskOutcome]) -> AggregatedResult {
    let sections: Vec<AggregatedSection> = outcomes
        .iter()
        .map(|outcome| AggregatedSection {
            task_id: outcome.task_id.clone(),
            agent_type: outcome.agent_type.clone(),
            status: outcome.status,
            content: outcome.result.as_ref().map(|r| r.content.clone()),
            error: outcome.error.clone(),
        })
        .collect();

    let mut composite = String::new();
    for section in &sections {
        if !composite.is_empty() {
            composite.push_str("\n\n");
        }
        let _ = writeln!(composite, "## {} ({})", section.task_id, section.agent_type);
        match (&section.content, &section.error) {
            (Some(content), _) => composite.push_str(content),
            (None, Some(error)) => {
                let _ = write!(
                    composite,
                    "[{}: {}] {}",
                    section.status, error.kind, error.message
                );
            }
            (None, None) => {
                let _ = write!(composite, "[{}]", section.status);
            }
        }
    }

    AggregatedResult {
        sections,
        composite,
    }
}

/// Timing for a workflow that ran for `elapsed` over `wave_count` waves
#[must_use]
pub fn workflow_metrics(
    outcomes: &[WorkflowTaskOutcome],
    wave_count: usize,
    elapsed: Duration,
) -> WorkflowMetrics {
    let tasks: Vec<TaskTiming> = outcomes
        .iter()
        .map(|outcome| TaskTiming {
            task_id: outcome.task_id.clone(),
            wave: outcome.wave,
            latency_ms: task_latency_ms(outcome),
            queue_wait_ms: queue_wait_ms(outcome),
        })
        .collect();

    let total_latency_ms = elapsed.as_millis() as u64;
    let sequential_latency_estimate_ms = tasks.iter().map(|t| t.latency_ms).sum();
    let speedup_factor = if total_latency_ms == 0 {
        1.0
    } else {
        sequential_latency_estimate_ms as f64 / total_latency_ms as f64
    };

    WorkflowMetrics {
        total_latency_ms,
        sequential_latency_estimate_ms,
        speedup_factor,
        wave_count,
        tasks,
    }
}

fn task_latency_ms(outcome: &WorkflowTaskOutcome) -> u64 {
    if let Some(result) = &outcome.result {
        return result.latency_ms;
    }
    match (outcome.started_at, outcome.completed_at) {
        (Some(started), Some(completed)) => (completed - started).num_milliseconds().max(0) as u64,
        _ => 0,
    }
}

fn queue_wait_ms(outcome: &WorkflowTaskOutcome) -> u64 {
    let Some(submitted) = outcome.submitted_at else {
        return 0;
    };
    outcome
        .started_at
        .or(outcome.completed_at)
        .map_or(0, |until| (until - submitted).num_milliseconds().max(0) as u64)
}

/// Count of outcomes that completed
#[must_use]
pub fn completed_count(outcomes: &[WorkflowTaskOutcome]) -> usize {
    outcomes
        .iter()
        .filter(|o| o.status == TaskStatus::Completed)
        .count()
}

//! Workflow request and result types.

use chrono::{DateTime, Utc};
use gateway_core::{TaskError, TaskId, TaskRequest, TaskResult, TaskStatus, WorkflowId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow submission.
///
/// Task ids are local to the workflow and every task must carry one;
/// `dependencies` refer to those local ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    /// Caller supplied workflow id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<WorkflowId>,

    /// Free-form workflow label (e.g. "claims_intake")
    pub workflow_type: String,

    /// The DAG
    pub tasks: Vec<TaskRequest>,

    /// Opaque caller context, returned with the result
    #[serde(default)]
    pub context: serde_json::Value,

    /// Deadline for the whole workflow; orchestrator default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl WorkflowRequest {
    /// Create a request with no context
    #[must_use]
    pub fn new(workflow_type: impl Into<String>, tasks: Vec<TaskRequest>) -> Self {
        Self {
            id: None,
            workflow_type: workflow_type.into(),
            tasks,
            context: serde_json::Value::Null,
            timeout_seconds: None,
        }
    }

    /// Set the workflow id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(WorkflowId::new(id));
        self
    }

    /// Set the caller context
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// Set the workflow deadline
    #[must_use]
    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }
}

/// Workflow lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// Accepted, not started
    Created,
    /// Waves executing
    Running,
    /// Every task completed
    Complete,
    /// At least one task completed
    Partial,
    /// No task completed
    Failed,
    /// The deadline elapsed
    TimedOut,
    /// Cancelled by the caller
    Cancelled,
}

impl WorkflowStatus {
    /// Whether the workflow finished
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Created | Self::Running)
    }

    /// Uppercase label used in logs and metrics
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Complete => "COMPLETE",
            Self::Partial => "PARTIAL",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Status derived from task outcomes
    #[must_use]
    pub fn from_outcomes(completed: usize, total: usize) -> Self {
        if total > 0 && completed == total {
            Self::Complete
        } else if completed > 0 {
            Self::Partial
        } else {
            Self::Failed
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one workflow task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTaskOutcome {
    /// Local task id
    pub task_id: String,
    /// Scheduler task id; absent when the task was never submitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_task_id: Option<TaskId>,
    /// Agent type
    pub agent_type: String,
    /// Wave the task belongs to
    pub wave: usize,
    /// Status as last observed
    pub status: TaskStatus,
    /// Present iff COMPLETED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    /// Failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// Submission to the scheduler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    /// Processing start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Per-task timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTiming {
    /// Local task id
    pub task_id: String,
    /// Wave index
    pub wave: usize,
    /// Processing time; backend latency when the task completed
    pub latency_ms: u64,
    /// Time spent before processing started
    pub queue_wait_ms: u64,
}

/// Workflow timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    /// Wall clock time across all waves
    pub total_latency_ms: u64,
    /// Sum of task latencies, i.e. the cost of running them one by one
    pub sequential_latency_estimate_ms: u64,
    /// Estimate over wall clock
    pub speedup_factor: f64,
    /// Number of waves
    pub wave_count: usize,
    /// Per-task breakdown
    pub tasks: Vec<TaskTiming>,
}

/// One task's contribution to the composite output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSection {
    /// Local task id
    pub task_id: String,
    /// Agent type
    pub agent_type: String,
    /// Task status
    pub status: TaskStatus,
    /// Output text of a completed task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Failure detail of any other task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

/// Every task's outcome merged into one payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// Sections in wave order
    pub sections: Vec<AggregatedSection>,
    /// Sections rendered as labelled text blocks
    pub composite: String,
}

/// Workflow outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Workflow id
    pub id: WorkflowId,
    /// Caller supplied label
    pub workflow_type: String,
    /// Status
    pub status: WorkflowStatus,
    /// Caller context, passed through
    #[serde(default)]
    pub context: serde_json::Value,
    /// Local task ids per wave
    pub waves: Vec<Vec<String>>,
    /// Per-task outcomes, in wave order
    pub tasks: Vec<WorkflowTaskOutcome>,
    /// Composite output
    pub aggregated_result: AggregatedResult,
    /// Timing
    pub metrics: WorkflowMetrics,
    /// Start time
    pub created_at: DateTime<Utc>,
    /// Finish time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

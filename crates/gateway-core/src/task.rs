//! Task lifecycle types.
//!
//! Status moves strictly forward:
//!
//! ```text
//! QUEUED -> DISPATCHED -> PROCESSING -> { COMPLETED, FAILED, TIMEOUT }
//! QUEUED | DISPATCHED -> CANCELLED
//! QUEUED -> FAILED   (dependency failed)
//! QUEUED -> TIMEOUT  (no capacity before the deadline)
//! ```
//!
//! Once terminal, exactly one of `result`/`error` is set and the task is
//! immutable.

use crate::request::{TaskPayload, TaskRequest};
use crate::types::{Priority, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting in the scheduler (queue, dependency hold, or batch group)
    Queued,
    /// Admitted to a backend and handed to its worker pool
    Dispatched,
    /// Backend call in flight
    Processing,
    /// Finished with a result
    Completed,
    /// Finished with an error
    Failed,
    /// Deadline elapsed
    Timeout,
    /// Cancelled before processing started
    Cancelled,
}

impl TaskStatus {
    /// Whether the status is final
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal transition
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Queued, Self::Dispatched | Self::Cancelled | Self::Failed | Self::Timeout) => {
                true
            }
            (Self::Dispatched, Self::Processing | Self::Cancelled) => true,
            (Self::Processing, Self::Completed | Self::Failed | Self::Timeout) => true,
            _ => false,
        }
    }

    /// Uppercase label used in logs and metrics
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Dispatched => "DISPATCHED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of failure recorded on a FAILED/TIMEOUT/CANCELLED task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Every backend candidate failed with a non-timeout error
    BackendError,
    /// Every backend candidate failed and the last failure was a timeout
    BackendTimeout,
    /// A dependency did not complete
    DependencyFailed,
    /// In-flight call aborted by a cancel request
    Cancelled,
    /// `timeout_seconds` elapsed while processing
    Timeout,
    /// `timeout_seconds` elapsed while still queued (no capacity)
    QueueTimeout,
    /// The owning workflow hit its deadline
    WorkflowTimeout,
    /// Submission was rejected by a full queue
    QueueFull,
    /// Submission was rejected as malformed
    Validation,
}

impl ErrorKind {
    /// Snake-case label
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BackendError => "backend_error",
            Self::BackendTimeout => "backend_timeout",
            Self::DependencyFailed => "dependency_failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::QueueTimeout => "queue_timeout",
            Self::WorkflowTimeout => "workflow_timeout",
            Self::QueueFull => "queue_full",
            Self::Validation => "validation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized successful result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Generated text
    pub content: String,
    /// Tokens generated
    pub token_count: u32,
    /// Backend call latency in milliseconds
    pub latency_ms: u64,
    /// Backend that produced the result
    pub backend_id: String,
    /// Model that produced the result
    pub model_name: String,
    /// Total backend attempts across the fallback chain
    pub attempt_count: u32,
}

/// Normalized failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Failure kind
    pub kind: ErrorKind,
    /// Human readable message
    pub message: String,
    /// Backend attempts made before failing
    pub attempt_count: u32,
    /// Per-candidate failure descriptions, in the order they were tried
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,
}

impl TaskError {
    /// Create an error with no backend attempts
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempt_count: 0,
            chain: Vec::new(),
        }
    }

    /// Set the attempt count
    #[must_use]
    pub fn with_attempts(mut self, attempt_count: u32) -> Self {
        self.attempt_count = attempt_count;
        self
    }

    /// Set the failure chain
    #[must_use]
    pub fn with_chain(mut self, chain: Vec<String>) -> Self {
        self.chain = chain;
        self
    }
}

/// Terminal outcome applied to a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// COMPLETED with a result
    Completed(TaskResult),
    /// FAILED with an error
    Failed(TaskError),
    /// TIMEOUT with an error
    TimedOut(TaskError),
    /// CANCELLED with an error
    Cancelled(TaskError),
}

impl TaskOutcome {
    /// Status this outcome moves the task into
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Completed(_) => TaskStatus::Completed,
            Self::Failed(_) => TaskStatus::Failed,
            Self::TimedOut(_) => TaskStatus::Timeout,
            Self::Cancelled(_) => TaskStatus::Cancelled,
        }
    }
}

/// A unit of inference work tracked by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task id
    pub id: TaskId,
    /// Agent type routing key
    pub agent_type: String,
    /// Messages and generation parameters
    pub payload: TaskPayload,
    /// Priority at submission
    pub priority: Priority,
    /// Tasks that must complete first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<TaskId>,
    /// Timeout in seconds
    pub timeout_seconds: u64,
    /// Current status
    pub status: TaskStatus,
    /// Present iff COMPLETED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    /// Present iff FAILED, TIMEOUT or CANCELLED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// Submission time
    pub submitted_at: DateTime<Utc>,
    /// Processing start time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build a QUEUED task from a validated request
    #[must_use]
    pub fn from_request(request: &TaskRequest, id: TaskId, default_timeout_seconds: u64) -> Self {
        Self {
            id,
            agent_type: request.agent_type.clone(),
            payload: request.payload(),
            priority: request.priority,
            dependencies: request.dependencies.clone(),
            timeout_seconds: request.timeout_seconds.unwrap_or(default_timeout_seconds),
            status: TaskStatus::Queued,
            result: None,
            error: None,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether the task is terminal
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a terminal outcome. Returns `false` (and leaves the task
    /// untouched) when the transition is not legal from the current status.
    pub fn finish(&mut self, outcome: TaskOutcome) -> bool {
        let next = outcome.status();
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.completed_at = Some(Utc::now());
        match outcome {
            TaskOutcome::Completed(result) => self.result = Some(result),
            TaskOutcome::Failed(error)
            | TaskOutcome::TimedOut(error)
            | TaskOutcome::Cancelled(error) => self.error = Some(error),
        }
        true
    }

    /// Time spent processing, if the task started and finished
    #[must_use]
    pub fn processing_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        Some((completed - started).num_milliseconds().max(0) as u64)
    }

    /// Time from submission to processing start (or to terminal state when
    /// the task never started)
    #[must_use]
    pub fn queue_wait_ms(&self) -> Option<u64> {
        let until = self.started_at.or(self.completed_at)?;
        Some((until - self.submitted_at).num_milliseconds().max(0) as u64)
    }
}

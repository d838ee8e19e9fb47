//! Error types for the gateway.
//!
//! `GatewayError` is the caller-facing taxonomy: everything a submission,
//! query or workflow call can reject with. Failures that happen *after* a task
//! was accepted are never returned as errors; they are recorded on the task as
//! a [`TaskError`](crate::task::TaskError).

use crate::task::ErrorKind;
use serde::{Deserialize, Serialize};

/// Result alias used across the gateway crates.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway error taxonomy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Malformed submission, rejected before any task is created
    #[error("Validation error: {message}")]
    Validation {
        /// Human readable message
        message: String,
        /// Offending field, if known
        field: Option<String>,
        /// Machine readable code
        code: String,
    },

    /// Agent type is not present in the backend registry
    #[error("Unknown agent type: {agent_type}")]
    UnknownAgent {
        /// The requested agent type
        agent_type: String,
    },

    /// A task with this id already exists (live or retained within TTL)
    #[error("Duplicate task id: {id}")]
    DuplicateId {
        /// The conflicting id
        id: String,
    },

    /// The scheduler queue is at capacity
    #[error("Queue full: {depth} tasks queued (capacity {capacity})")]
    QueueFull {
        /// Current queue depth
        depth: usize,
        /// Configured cap
        capacity: usize,
    },

    /// Task or workflow id is unknown (or expired)
    #[error("Not found: {id}")]
    NotFound {
        /// The requested id
        id: String,
    },

    /// The task exists but has not reached a terminal state
    #[error("Result not ready for {id}")]
    NotReady {
        /// The requested id
        id: String,
    },

    /// Cyclic or otherwise malformed workflow DAG
    #[error("Invalid workflow: {message}")]
    InvalidWorkflow {
        /// Reason the workflow was rejected
        message: String,
    },

    /// Workflow did not finish within its deadline
    #[error("Workflow {id} timed out after {timeout_ms}ms")]
    WorkflowTimeout {
        /// Workflow id
        id: String,
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Component is shutting down and no longer accepts work
    #[error("Service unavailable: {message}")]
    Unavailable {
        /// Error message
        message: String,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl GatewayError {
    /// Create a validation error
    #[must_use]
    pub fn validation(
        message: impl Into<String>,
        field: Option<String>,
        code: impl Into<String>,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            field,
            code: code.into(),
        }
    }

    /// Create an unknown agent error
    #[must_use]
    pub fn unknown_agent(agent_type: impl Into<String>) -> Self {
        Self::UnknownAgent {
            agent_type: agent_type.into(),
        }
    }

    /// Create a not-found error
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create an invalid workflow error
    #[must_use]
    pub fn invalid_workflow(message: impl Into<String>) -> Self {
        Self::InvalidWorkflow {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code for this error
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::UnknownAgent { .. } | Self::InvalidWorkflow { .. } => {
                400
            }
            Self::NotFound { .. } => 404,
            Self::DuplicateId { .. } => 409,
            Self::NotReady { .. } => 425,
            Self::QueueFull { .. } => 429,
            Self::WorkflowTimeout { .. } => 504,
            Self::Unavailable { .. } => 503,
            Self::Configuration { .. } | Self::Internal { .. } => 500,
        }
    }

    /// Stable machine readable error code
    #[must_use]
    pub fn error_code(&self) -> &str {
        match self {
            Self::Validation { code, .. } => code,
            Self::UnknownAgent { .. } => "unknown_agent",
            Self::DuplicateId { .. } => "duplicate_id",
            Self::QueueFull { .. } => "queue_full",
            Self::NotFound { .. } => "not_found",
            Self::NotReady { .. } => "not_ready",
            Self::InvalidWorkflow { .. } => "invalid_workflow",
            Self::WorkflowTimeout { .. } => "workflow_timeout",
            Self::Configuration { .. } => "configuration_error",
            Self::Unavailable { .. } => "unavailable",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Whether the caller may retry the same submission later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull { .. } | Self::NotReady { .. } | Self::Unavailable { .. })
    }

    /// Task-level kind recorded when this error prevents a task from running
    #[must_use]
    pub fn task_error_kind(&self) -> ErrorKind {
        match self {
            Self::QueueFull { .. } => ErrorKind::QueueFull,
            Self::WorkflowTimeout { .. } => ErrorKind::WorkflowTimeout,
            _ => ErrorKind::Validation,
        }
    }
}

/// Serializable error body returned to API callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine readable code
    pub code: String,
    /// Human readable message
    pub message: String,
    /// Offending field, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl From<&GatewayError> for ErrorBody {
    fn from(error: &GatewayError) -> Self {
        let field = match error {
            GatewayError::Validation { field, .. } => field.clone(),
            _ => None,
        };
        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
            field,
        }
    }
}

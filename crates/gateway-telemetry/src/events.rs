//! Structured audit events.
//!
//! The scheduler emits one [`AuditEvent::TaskFinished`] per terminal task and
//! the orchestrator one [`AuditEvent::WorkflowFinished`] per workflow. Where
//! they end up (logs, a history store, nowhere) is the sink's business.

use chrono::{DateTime, Utc};
use gateway_core::{ErrorKind, TaskStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Audit event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A task reached a terminal status
    TaskFinished {
        /// Task id
        task_id: String,
        /// Agent type
        agent_type: String,
        /// Terminal status
        status: TaskStatus,
        /// Backend that served the task, if it completed
        #[serde(skip_serializing_if = "Option::is_none")]
        backend_id: Option<String>,
        /// Failure kind, if it did not complete
        #[serde(skip_serializing_if = "Option::is_none")]
        error_kind: Option<ErrorKind>,
        /// Backend attempts made
        attempt_count: u32,
        /// Backend latency, if it completed
        #[serde(skip_serializing_if = "Option::is_none")]
        latency_ms: Option<u64>,
        /// Timestamp
        timestamp: DateTime<Utc>,
    },
    /// A workflow finished
    WorkflowFinished {
        /// Workflow id
        workflow_id: String,
        /// Caller supplied workflow type
        workflow_type: String,
        /// Final status
        status: String,
        /// Number of tasks in the DAG
        task_count: usize,
        /// Wall clock time
        total_latency_ms: u64,
        /// Sequential estimate over wall clock
        speedup_factor: f64,
        /// Timestamp
        timestamp: DateTime<Utc>,
    },
}

impl AuditEvent {
    /// Get the event type as a string
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TaskFinished { .. } => "task_finished",
            Self::WorkflowFinished { .. } => "workflow_finished",
        }
    }

    /// Get the timestamp
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::TaskFinished { timestamp, .. } | Self::WorkflowFinished { timestamp, .. } => {
                *timestamp
            }
        }
    }
}

/// Destination for audit events
#[async_trait::async_trait]
pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Emit an event
    async fn emit(&self, event: AuditEvent);

    /// Flush any buffered events
    async fn flush(&self) {}
}

/// Logs events via tracing
#[derive(Debug, Clone, Default)]
pub struct TracingEventSink;

#[async_trait::async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: AuditEvent) {
        match &event {
            AuditEvent::TaskFinished {
                task_id,
                agent_type,
                status,
                backend_id,
                error_kind,
                attempt_count,
                latency_ms,
                ..
            } => {
                if *status == TaskStatus::Completed {
                    info!(
                        task_id = %task_id,
                        agent_type = %agent_type,
                        status = %status,
                        backend = backend_id.as_deref().unwrap_or_default(),
                        attempt_count,
                        latency_ms = latency_ms.unwrap_or_default(),
                        "Task finished"
                    );
                } else {
                    warn!(
                        task_id = %task_id,
                        agent_type = %agent_type,
                        status = %status,
                        error_kind = error_kind.map(ErrorKind::as_str).unwrap_or_default(),
                        attempt_count,
                        "Task finished"
                    );
                }
            }
            AuditEvent::WorkflowFinished {
                workflow_id,
                workflow_type,
                status,
                task_count,
                total_latency_ms,
                speedup_factor,
                ..
            } => {
                info!(
                    workflow_id = %workflow_id,
                    workflow_type = %workflow_type,
                    status = %status,
                    task_count,
                    total_latency_ms,
                    speedup_factor,
                    "Workflow finished"
                );
            }
        }
    }
}

/// Discards events
#[derive(Debug, Clone, Default)]
pub struct NoopEventSink;

#[async_trait::async_trait]
impl EventSink for NoopEventSink {
    async fn emit(&self, _event: AuditEvent) {}
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryEventSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events emitted so far
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Number of events emitted so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no events were emitted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait::async_trait]
impl EventSink for MemoryEventSink {
    async fn emit(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

/// Fans events out to several sinks
#[derive(Debug)]
pub struct CompositeEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CompositeEventSink {
    /// Create a new composite sink
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait::async_trait]
impl EventSink for CompositeEventSink {
    async fn emit(&self, event: AuditEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone()).await;
        }
    }

    async fn flush(&self) {
        for sink in &self.sinks {
            sink.flush().await;
        }
    }
}

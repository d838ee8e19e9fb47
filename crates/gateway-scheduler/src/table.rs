//! Task table.
//!
//! The one hot shared-write structure: id -> task record, with a status
//! channel per task for waiters. Transitions go through
//! [`TaskStatus::can_transition_to`], so a terminal record never changes
//! again. Terminal records are kept for the result TTL, during which their id
//! cannot be reused.

use crate::queue::QueuedTask;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gateway_core::{GatewayError, Task, TaskId, TaskOutcome, TaskStatus};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Table record
#[derive(Debug)]
pub struct TaskRecord {
    /// The task
    pub task: Task,
    /// Batch group the task belongs to
    pub group_key: String,
    /// Local model serving the group, if any
    pub model: Option<String>,
    /// Fired to abort an in-flight call
    pub cancel: CancellationToken,
    /// Monotonic deadline for leaving the queue
    pub deadline: Instant,
    status_tx: watch::Sender<TaskStatus>,
    expires_at: Option<Instant>,
}

impl TaskRecord {
    /// Create a record for a freshly submitted task
    #[must_use]
    pub fn new(task: Task, group_key: String, model: Option<String>, deadline: Instant) -> Self {
        let (status_tx, _) = watch::channel(task.status);
        Self {
            task,
            group_key,
            model,
            cancel: CancellationToken::new(),
            deadline,
            status_tx,
            expires_at: None,
        }
    }

    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// What a worker needs to run a task
#[derive(Debug, Clone)]
pub struct ProcessingTicket {
    /// The task as it entered PROCESSING
    pub task: Task,
    /// Cancellation for the in-flight call
    pub cancel: CancellationToken,
}

/// Concurrent task table
#[derive(Debug)]
pub struct TaskTable {
    records: DashMap<TaskId, TaskRecord>,
    ttl: Duration,
}

impl TaskTable {
    /// Create a table retaining terminal tasks for `ttl`
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            ttl,
        }
    }

    /// Insert a new record
    ///
    /// # Errors
    /// Returns [`GatewayError::DuplicateId`] if the id is live or retained
    pub fn insert(&self, record: TaskRecord) -> Result<(), GatewayError> {
        let now = Instant::now();
        match self.records.entry(record.task.id.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().expired(now) {
                    existing.insert(record);
                    Ok(())
                } else {
                    Err(GatewayError::DuplicateId {
                        id: existing.key().to_string(),
                    })
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    /// Snapshot of a live task
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<Task> {
        let now = Instant::now();
        self.records
            .get(id)
            .filter(|r| !r.expired(now))
            .map(|r| r.task.clone())
    }

    /// Current status of a live task
    #[must_use]
    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        let now = Instant::now();
        self.records
            .get(id)
            .filter(|r| !r.expired(now))
            .map(|r| r.task.status)
    }

    /// Whether the id refers to a live task
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.status(id).is_some()
    }

    /// Subscribe to status changes
    #[must_use]
    pub fn subscribe(&self, id: &TaskId) -> Option<watch::Receiver<TaskStatus>> {
        let now = Instant::now();
        self.records
            .get(id)
            .filter(|r| !r.expired(now))
            .map(|r| r.status_tx.subscribe())
    }

    /// Queue entry for a task that is still QUEUED
    #[must_use]
    pub fn queue_entry(&self, id: &TaskId) -> Option<QueuedTask> {
        let record = self.records.get(id)?;
        (record.task.status == TaskStatus::Queued).then(|| {
            QueuedTask::new(
                record.task.id.clone(),
                record.group_key.clone(),
                record.model.clone(),
                record.task.priority,
                record.deadline,
            )
        })
    }

    /// Agent type of a live task
    #[must_use]
    pub fn agent_type(&self, id: &TaskId) -> Option<String> {
        self.records.get(id).map(|r| r.task.agent_type.clone())
    }

    /// Cancellation token of a task
    #[must_use]
    pub fn cancel_token(&self, id: &TaskId) -> Option<CancellationToken> {
        self.records.get(id).map(|r| r.cancel.clone())
    }

    /// QUEUED -> DISPATCHED
    pub fn mark_dispatched(&self, id: &TaskId) -> bool {
        let Some(mut record) = self.records.get_mut(id) else {
            return false;
        };
        if !record.task.status.can_transition_to(TaskStatus::Dispatched) {
            return false;
        }
        record.task.status = TaskStatus::Dispatched;
        record.status_tx.send_replace(TaskStatus::Dispatched);
        true
    }

    /// DISPATCHED -> PROCESSING; returns what the worker needs.
    ///
    /// Refused once the cancellation token has fired, so a task whose cancel
    /// is still being settled never starts.
    pub fn begin_processing(&self, id: &TaskId) -> Option<ProcessingTicket> {
        let mut record = self.records.get_mut(id)?;
        if record.task.status != TaskStatus::Dispatched || record.cancel.is_cancelled() {
            return None;
        }
        record.task.status = TaskStatus::Processing;
        record.task.started_at = Some(Utc::now());
        record.status_tx.send_replace(TaskStatus::Processing);
        Some(ProcessingTicket {
            task: record.task.clone(),
            cancel: record.cancel.clone(),
        })
    }

    /// Apply a terminal outcome.
    ///
    /// Returns the status the task left and the finished task, or `None` if
    /// the transition is not allowed (already terminal, or not yet running).
    pub fn finish(&self, id: &TaskId, outcome: TaskOutcome) -> Option<(TaskStatus, Task)> {
        let mut record = self.records.get_mut(id)?;
        let previous = record.task.status;
        if !record.task.finish(outcome) {
            return None;
        }
        record.expires_at = Some(Instant::now() + self.ttl);
        let status = record.task.status;
        record.status_tx.send_replace(status);
        Some((previous, record.task.clone()))
    }

    /// Drop records whose TTL elapsed; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, r| !r.expired(now));
        before - self.records.len()
    }

    /// Live tasks by status
    #[must_use]
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let now = Instant::now();
        let mut counts = BTreeMap::new();
        for record in self.records.iter().filter(|r| !r.expired(now)) {
            *counts.entry(record.task.status.as_str()).or_insert(0) += 1;
        }
        counts
    }

}

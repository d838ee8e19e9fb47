//! Per-group batch accumulation.
//!
//! Tasks popped from the queue collect into one open group per group key. A
//! group is flushed as soon as it holds `batch_size` tasks, or once
//! `batch_timeout` has passed since its first member arrived.

use crate::queue::QueuedTask;
use gateway_core::TaskId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tasks of one group accumulated for dispatch
#[derive(Debug)]
pub struct BatchGroup {
    /// Group key
    pub key: String,
    /// Members, in the order they were popped
    pub tasks: Vec<QueuedTask>,
    /// When the first member was added
    pub opened_at: Instant,
}

/// Open batch groups
#[derive(Debug)]
pub struct Batcher {
    batch_size: usize,
    batch_timeout: Duration,
    groups: HashMap<String, BatchGroup>,
}

impl Batcher {
    /// Create a batcher
    #[must_use]
    pub fn new(batch_size: usize, batch_timeout: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            batch_timeout,
            groups: HashMap::new(),
        }
    }

    /// Add a task; returns the group if it just became full
    pub fn add(&mut self, task: QueuedTask, now: Instant) -> Option<BatchGroup> {
        let key = task.group_key.clone();
        let group = self.groups.entry(key.clone()).or_insert_with(|| BatchGroup {
            key: key.clone(),
            tasks: Vec::with_capacity(self.batch_size),
            opened_at: now,
        });
        group.tasks.push(task);

        if group.tasks.len() >= self.batch_size {
            self.groups.remove(&key)
        } else {
            None
        }
    }

    /// Remove and return every group whose window elapsed
    pub fn take_due(&mut self, now: Instant) -> Vec<BatchGroup> {
        let due: Vec<String> = self
            .groups
            .values()
            .filter(|g| now.saturating_duration_since(g.opened_at) >= self.batch_timeout)
            .map(|g| g.key.clone())
            .collect();

        let mut groups: Vec<BatchGroup> = due
            .iter()
            .filter_map(|key| self.groups.remove(key))
            .collect();
        groups.sort_by_key(|g| g.opened_at);
        groups
    }

    /// Remove a task from whichever group holds it
    pub fn remove(&mut self, id: &TaskId) -> bool {
        let mut removed = false;
        self.groups.retain(|_, group| {
            let before = group.tasks.len();
            group.tasks.retain(|t| &t.id != id);
            removed |= group.tasks.len() != before;
            !group.tasks.is_empty()
        });
        removed
    }

    /// Remove and return every task whose deadline passed
    pub fn drain_expired(&mut self, now: Instant) -> Vec<QueuedTask> {
        let mut expired = Vec::new();
        self.groups.retain(|_, group| {
            let (gone, live): (Vec<_>, Vec<_>) =
                group.tasks.drain(..).partition(|t| t.deadline <= now);
            expired.extend(gone);
            group.tasks = live;
            !group.tasks.is_empty()
        });
        expired
    }

    /// Tasks held in open groups
    #[must_use]
    pub fn pending(&self) -> usize {
        self.groups.values().map(|g| g.tasks.len()).sum()
    }
}

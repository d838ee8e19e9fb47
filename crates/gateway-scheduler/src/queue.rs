//! Priority queue with aging.
//!
//! Entries are ordered by effective priority (highest first), then by
//! submission sequence (oldest first). An entry that has waited `max_wait`
//! since it was enqueued or last promoted moves up one level. When several
//! entries are promoted in the same pass they keep their submission order.

use gateway_core::{Priority, TaskId};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// A task waiting for dispatch
#[derive(Debug, Clone)]
pub struct QueuedTask {
    /// Task id
    pub id: TaskId,
    /// Batch group the task belongs to
    pub group_key: String,
    /// Local model serving the group, if any
    pub model: Option<String>,
    /// Effective priority, including promotions
    pub priority: Priority,
    /// Submission sequence; assigned on first push and kept on requeue
    pub seq: u64,
    /// Start of the current aging window
    pub waiting_since: Instant,
    /// The task times out if still queued at this instant
    pub deadline: Instant,
}

impl QueuedTask {
    /// Create an entry; `seq` is assigned by the queue
    #[must_use]
    pub fn new(
        id: TaskId,
        group_key: impl Into<String>,
        model: Option<String>,
        priority: Priority,
        deadline: Instant,
    ) -> Self {
        Self {
            id,
            group_key: group_key.into(),
            model,
            priority,
            seq: 0,
            waiting_since: Instant::now(),
            deadline,
        }
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Max-heap of queued tasks
#[derive(Debug, Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<QueuedTask>,
    next_seq: u64,
}

impl PriorityQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a new task, assigning its sequence number
    pub fn push(&mut self, mut entry: QueuedTask) {
        self.next_seq += 1;
        entry.seq = self.next_seq;
        self.heap.push(entry);
    }

    /// Put back a task that was popped but could not be dispatched
    pub fn requeue(&mut self, entry: QueuedTask) {
        self.heap.push(entry);
    }

    /// Remove the highest priority task
    pub fn pop(&mut self) -> Option<QueuedTask> {
        self.heap.pop()
    }

    /// Remove a task by id
    pub fn remove(&mut self, id: &TaskId) -> bool {
        let before = self.heap.len();
        self.heap.retain(|entry| &entry.id != id);
        self.heap.len() != before
    }

    /// Promote every task whose aging window elapsed; returns the count
    pub fn age(&mut self, max_wait: Duration, now: Instant) -> usize {
        let mut promoted = 0;
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        for entry in &mut entries {
            if entry.priority < Priority::Critical
                && now.saturating_duration_since(entry.waiting_since) >= max_wait
            {
                entry.priority = entry.priority.promoted();
                entry.waiting_since = now;
                promoted += 1;
            }
        }
        self.heap = BinaryHeap::from(entries);
        promoted
    }

    /// Remove and return every task whose deadline passed
    pub fn drain_expired(&mut self, now: Instant) -> Vec<QueuedTask> {
        if !self.heap.iter().any(|e| e.deadline <= now) {
            return Vec::new();
        }
        let (expired, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.heap)
            .into_vec()
            .into_iter()
            .partition(|e| e.deadline <= now);
        self.heap = BinaryHeap::from(live);
        expired
    }

    /// Number of queued tasks
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

//! Workflow result store.
//!
//! Running workflows are kept with their cancellation token; finished ones
//! stay readable until the TTL elapses, matching task result retention.

use crate::workflow::WorkflowResult;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gateway_core::{GatewayError, GatewayResult, WorkflowId};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct StoredWorkflow {
    result: WorkflowResult,
    cancel: CancellationToken,
    expires_at: Option<Instant>,
}

impl StoredWorkflow {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Workflow results by id
#[derive(Debug)]
pub struct WorkflowStore {
    entries: DashMap<WorkflowId, StoredWorkflow>,
    ttl: Duration,
}

impl WorkflowStore {
    /// Create a store retaining finished workflows for `ttl`
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Register a starting workflow; returns its cancellation token
    ///
    /// # Errors
    /// Returns [`GatewayError::DuplicateId`] if the id is running or retained
    pub fn register(&self, result: WorkflowResult) -> GatewayResult<CancellationToken> {
        let now = Instant::now();
        let cancel = CancellationToken::new();
        let stored = StoredWorkflow {
            result,
            cancel: cancel.clone(),
            expires_at: None,
        };
        match self.entries.entry(stored.result.id.clone()) {
            Entry::Occupied(mut existing) if existing.get().expired(now) => {
                existing.insert(stored);
            }
            Entry::Occupied(existing) => {
                return Err(GatewayError::DuplicateId {
                    id: existing.key().to_string(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(stored);
            }
        }
        Ok(cancel)
    }

    /// Replace the progress snapshot of a running workflow
    pub fn update(&self, result: WorkflowResult) {
        if let Some(mut stored) = self.entries.get_mut(&result.id) {
            if stored.expires_at.is_none() {
                stored.result = result;
            }
        }
    }

    /// Record the final result and start its TTL
    pub fn finish(&self, result: WorkflowResult) {
        if let Some(mut stored) = self.entries.get_mut(&result.id) {
            stored.result = result;
            stored.expires_at = Some(Instant::now() + self.ttl);
        }
    }

    /// Latest snapshot of a workflow
    #[must_use]
    pub fn get(&self, id: &WorkflowId) -> Option<WorkflowResult> {
        let now = Instant::now();
        self.entries
            .get(id)
            .filter(|s| !s.expired(now))
            .map(|s| s.result.clone())
    }

    /// Cancel a running workflow.
    ///
    /// Returns `None` for unknown ids, `Some(false)` when the workflow
    /// already finished.
    pub fn cancel(&self, id: &WorkflowId) -> Option<bool> {
        let now = Instant::now();
        let stored = self.entries.get(id).filter(|s| !s.expired(now))?;
        if stored.expires_at.is_some() || stored.cancel.is_cancelled() {
            return Some(false);
        }
        stored.cancel.cancel();
        Some(true)
    }

    /// Drop finished workflows whose TTL elapsed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, s| !s.expired(now));
        before - self.entries.len()
    }

    /// Workflows not yet finished
    #[must_use]
    pub fn running(&self) -> usize {
        self.entries
            .iter()
            .filter(|s| s.expires_at.is_none())
            .count()
    }
}

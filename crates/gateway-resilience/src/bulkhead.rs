//! Bulkhead for per-backend concurrency isolation.
//!
//! External APIs have no GPU telemetry for the load balancer to reason about,
//! so their concurrency is capped here instead. A full bulkhead surfaces as a
//! retryable [`BackendErrorKind::Capacity`] failure for that backend.

use gateway_core::{BackendError, BackendErrorKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Bulkhead configuration
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Maximum concurrent requests
    pub max_concurrent: u32,
    /// How long `acquire` waits for a free slot
    pub acquire_timeout: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 16,
            acquire_timeout: Duration::from_millis(50),
        }
    }
}

/// Concurrency limiter for one backend
#[derive(Debug)]
pub struct Bulkhead {
    id: String,
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
}

impl Bulkhead {
    /// Create a new bulkhead
    #[must_use]
    pub fn new(id: impl Into<String>, config: BulkheadConfig) -> Self {
        Self {
            id: id.into(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent as usize)),
            config,
        }
    }

    /// Bulkhead sized to `max_concurrent` with the default wait
    #[must_use]
    pub fn with_capacity(id: impl Into<String>, max_concurrent: u32) -> Self {
        Self::new(
            id,
            BulkheadConfig {
                max_concurrent,
                ..Default::default()
            },
        )
    }

    /// Get the bulkhead ID
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Acquire a permit, waiting up to `acquire_timeout`
    ///
    /// # Errors
    /// Returns a capacity error if no slot frees up in time
    pub async fn acquire(&self) -> Result<BulkheadPermit, BackendError> {
        match tokio::time::timeout(
            self.config.acquire_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => {
                debug!(bulkhead = %self.id, active = self.active_requests(), "Bulkhead permit acquired");
                Ok(BulkheadPermit { _permit: permit })
            }
            Ok(Err(_)) => Err(self.full_error("bulkhead closed")),
            Err(_) => {
                warn!(
                    bulkhead = %self.id,
                    max_concurrent = self.config.max_concurrent,
                    "Bulkhead full"
                );
                Err(self.full_error("too many concurrent requests"))
            }
        }
    }

    fn full_error(&self, detail: &str) -> BackendError {
        BackendError::new(
            BackendErrorKind::Capacity,
            format!("bulkhead {} full: {detail}", self.id),
        )
    }

    /// Get the number of active requests
    #[must_use]
    pub fn active_requests(&self) -> u32 {
        let available = self.semaphore.available_permits() as u32;
        self.config.max_concurrent.saturating_sub(available)
    }

    /// Get current statistics
    #[must_use]
    pub fn stats(&self) -> BulkheadStats {
        BulkheadStats {
            active_requests: self.active_requests(),
            max_concurrent: self.config.max_concurrent,
        }
    }
}

/// A permit from a bulkhead, released on drop
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

/// Bulkhead statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadStats {
    /// Number of active requests
    pub active_requests: u32,
    /// Maximum concurrent requests
    pub max_concurrent: u32,
}

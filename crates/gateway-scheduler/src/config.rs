//! Scheduler configuration.

use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of QUEUED tasks
    pub queue_max_depth: usize,
    /// Maximum tasks per batch group
    pub batch_size: usize,
    /// Maximum time a batch group stays open
    pub batch_timeout: Duration,
    /// Waiting time after which a task is promoted one priority level
    pub max_wait: Duration,
    /// How long terminal tasks stay queryable
    pub result_ttl: Duration,
    /// Timeout applied when a submission carries none
    pub default_timeout_seconds: u64,
    /// Dispatcher wake-up interval when nothing else wakes it
    pub dispatch_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_max_depth: 1024,
            batch_size: 4,
            batch_timeout: Duration::from_millis(20),
            max_wait: Duration::from_secs(5),
            result_ttl: Duration::from_secs(300),
            default_timeout_seconds: 60,
            dispatch_interval: Duration::from_millis(5),
        }
    }
}

impl SchedulerConfig {
    /// Set the queue cap
    #[must_use]
    pub fn with_queue_max_depth(mut self, depth: usize) -> Self {
        self.queue_max_depth = depth;
        self
    }

    /// Set the batch bounds
    #[must_use]
    pub fn with_batching(mut self, batch_size: usize, batch_timeout: Duration) -> Self {
        self.batch_size = batch_size.max(1);
        self.batch_timeout = batch_timeout;
        self
    }

    /// Set the aging threshold
    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Set the result retention
    #[must_use]
    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    /// Set the default task timeout
    #[must_use]
    pub fn with_default_timeout_seconds(mut self, seconds: u64) -> Self {
        self.default_timeout_seconds = seconds;
        self
    }
}

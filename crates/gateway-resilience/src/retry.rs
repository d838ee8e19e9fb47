//! Retry policy with capped exponential backoff.
//!
//! The delay before retry `n` (0-indexed) is `base_delay * multiplier^n`,
//! capped at `max_delay`, with optional symmetric jitter. Retries stop early
//! when the error is not retryable or the caller's cancellation token fires.

use gateway_core::BackendError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
    /// Jitter factor (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

/// Retry policy implementation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Calculate delay for a given attempt (0-indexed)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_millis() as f64;
        let max = self.config.max_delay.as_millis() as f64;
        let delay = (base * self.config.multiplier.powi(attempt as i32)).min(max);

        if self.config.jitter <= 0.0 {
            return Duration::from_millis(delay as u64);
        }

        let jitter_range = delay * self.config.jitter;
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        Duration::from_millis((delay + jitter).clamp(0.0, max) as u64)
    }

    /// Total attempts this policy allows for one candidate
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries + 1
    }

    /// Execute `operation` until it succeeds, fails permanently, runs out of
    /// retries, or `cancel` fires.
    ///
    /// The operation receives the 1-based attempt number.
    pub async fn execute<F, Fut, T>(&self, cancel: &CancellationToken, mut operation: F) -> RetryResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut last_error: Option<BackendError> = None;

        for retry in 0..=self.config.max_retries {
            let attempt = retry + 1;
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return RetryResult::Cancelled { attempts: attempt, last_error };
                }
                outcome = operation(attempt) => outcome,
            };

            match outcome {
                Ok(value) => {
                    if retry > 0 {
                        debug!(attempt, "Retry succeeded");
                    }
                    return RetryResult::Success { value, attempts: attempt };
                }
                Err(error) if !error.is_retryable() => {
                    return RetryResult::NonRetryable { error, attempts: attempt };
                }
                Err(error) if retry == self.config.max_retries => {
                    return RetryResult::Exhausted { error, attempts: attempt };
                }
                Err(error) => {
                    let delay = self.delay_for_attempt(retry);
                    warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after error"
                    );
                    last_error = Some(error);

                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            return RetryResult::Cancelled { attempts: attempt, last_error };
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        // The loop always returns on its final iteration.
        RetryResult::Exhausted {
            error: last_error.unwrap_or_else(|| {
                BackendError::new(gateway_core::BackendErrorKind::Transport, "retries exhausted")
            }),
            attempts: self.max_attempts(),
        }
    }

}

/// Result of a retried operation
#[derive(Debug)]
pub enum RetryResult<T> {
    /// Operation succeeded
    Success {
        /// The value
        value: T,
        /// Attempts made, including the successful one
        attempts: u32,
    },
    /// Operation failed after all retries
    Exhausted {
        /// The final error
        error: BackendError,
        /// Number of attempts made
        attempts: u32,
    },
    /// Operation failed with a non-retryable error
    NonRetryable {
        /// The error
        error: BackendError,
        /// Number of attempts made
        attempts: u32,
    },
    /// Cancellation fired before the operation settled
    Cancelled {
        /// Attempts started
        attempts: u32,
        /// Most recent failure, if any attempt failed before cancellation
        last_error: Option<BackendError>,
    },
}

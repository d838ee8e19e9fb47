//! # Gateway Resilience
//!
//! Resilience patterns for the agent inference gateway:
//! - Retry policy with capped exponential backoff and cancellation
//! - Bulkhead for per-backend concurrency isolation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bulkhead;
pub mod retry;

// Re-export main types
pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadPermit, BulkheadStats};
pub use retry::{RetryConfig, RetryPolicy, RetryResult};

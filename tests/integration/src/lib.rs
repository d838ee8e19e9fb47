//! Integration tests for the agent inference gateway
//!
//! Every test boots the full stack (config, registry, fleet monitor, load
//! balancer, router, scheduler, orchestrator and HTTP server) against
//! wiremock model servers:
//! - HTTP API behavior and result retention
//! - Retry, fallback and GPU admission
//! - Queue backpressure, dependency gating and cancellation
//! - Workflow waves, aggregation and speedup

pub mod fixtures;
pub mod helpers;
pub mod mock_backends;

// Re-export commonly used items
pub use fixtures::*;
pub use helpers::*;
pub use mock_backends::*;

#[cfg(test)]
mod api_tests;
#[cfg(test)]
mod routing_tests;
#[cfg(test)]
mod scheduler_tests;
#[cfg(test)]
mod workflow_tests;

//! # Gateway Routing
//!
//! GPU-aware load balancing and backend routing for the agent inference gateway.
//!
//! This crate provides:
//! - Instance selection by in-flight load and GPU headroom
//! - Per-backend retry with exponential backoff
//! - Fallback across external backends and local instances
//! - Per-backend dispatch statistics

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod load_balancer;
pub mod router;

// Re-export main types
pub use load_balancer::{
    Backpressure, BackpressureReason, InflightSnapshot, InstanceLease, LoadBalancer,
    LoadBalancerConfig,
};
pub use router::{
    AttemptContext, BackendStatsSnapshot, CandidateFailure, RouteOutcome, Router, RouterConfig,
    RoutingError,
};

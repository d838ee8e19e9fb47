//! # Gateway Server
//!
//! HTTP server for the agent inference gateway.
//!
//! This crate provides:
//! - Axum routes for task submission, status, cancellation and workflows
//! - GPU and queue telemetry, health, readiness and Prometheus endpoints
//! - Request id propagation and request tracing
//! - Graceful shutdown coordination

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod state;

// Re-export main types
pub use error::ApiError;
pub use health::{ComponentHealth, FleetView, HealthResponse, HealthStatus, ReadinessResponse};
pub use routes::create_router;
pub use server::{Server, ServerConfig, ServerError};
pub use shutdown::{shutdown_signal, RequestGuard, ShutdownConfig, ShutdownCoordinator, ShutdownPhase};
pub use state::{AppState, AppStateBuilder};

//! # Gateway Telemetry
//!
//! Observability and fleet telemetry for the agent inference gateway.
//!
//! This crate provides:
//! - Structured logging and OpenTelemetry tracing setup
//! - Prometheus metrics
//! - GPU metric sources and the fleet monitor (GPU readings + instance health)
//! - Audit events for terminal tasks and workflows

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod events;
pub mod gpu;
pub mod metrics;
pub mod monitor;
pub mod tracing_setup;

// Re-export main types
pub use events::{
    AuditEvent, CompositeEventSink, EventSink, MemoryEventSink, NoopEventSink, TracingEventSink,
};
pub use gpu::{GpuMetrics, GpuMetricsSource, GpuSourceError, NvidiaSmiSource, StaticGpuSource};
pub use metrics::Metrics;
pub use monitor::{FleetMonitor, FleetSnapshot, HealthReporter, HealthSignal, MonitorConfig};
pub use tracing_setup::{init_tracing, shutdown_tracing, LogFormat, TracingConfig, TracingError};

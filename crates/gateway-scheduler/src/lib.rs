//! # Gateway Scheduler
//!
//! Task scheduler for the agent inference gateway.
//!
//! Submitted tasks wait in a priority queue (with aging), are grouped per
//! backend group into bounded batches, admitted through the GPU-aware load
//! balancer and executed by a fixed worker pool per group. The scheduler owns
//! every task from submission until its result expires.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod config;
pub mod queue;
pub mod scheduler;
pub mod table;

pub use config::SchedulerConfig;
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerTelemetry};

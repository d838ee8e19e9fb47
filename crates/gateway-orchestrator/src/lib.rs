//! # Gateway Orchestrator
//!
//! Executes workflows: sets of agent tasks with dependencies between them.
//!
//! - [`WorkflowDag`] validates the graph and materialises execution waves
//! - [`Orchestrator`] submits each wave to the scheduler and waits at a barrier
//! - [`aggregate`] merges every task's outcome into one composite result
//! - [`WorkflowStore`] keeps results readable by id until their TTL expires

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregate;
pub mod dag;
pub mod orchestrator;
pub mod store;
pub mod workflow;

pub use aggregate::{aggregate, workflow_metrics};
pub use dag::WorkflowDag;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use store::WorkflowStore;
pub use workflow::{
    AggregatedResult, AggregatedSection, TaskTiming, WorkflowMetrics, WorkflowRequest,
    WorkflowResult, WorkflowStatus, WorkflowTaskOutcome,
};

//! # Gateway Core
//!
//! Core types, traits, and error handling for the agent inference gateway.
//!
//! This crate provides the foundational types used throughout the gateway:
//! - Task submission requests and the task lifecycle
//! - Backend descriptors and the [`InferenceBackend`] trait
//! - The versioned backend registry
//! - Error types and handling

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod registry;
pub mod request;
pub mod task;
pub mod types;

// Re-export commonly used types
pub use backend::{
    BackendError, BackendErrorKind, BackendHealth, BackendInstance, BackendTarget, Completion,
    CompletionRequest, Credential, ExternalBackend, InferenceBackend, LatencyTier,
};
pub use error::{ErrorBody, GatewayError, GatewayResult};
pub use registry::{
    AgentRoute, BackendRegistry, RegistrySnapshot, RegistrySnapshotBuilder, ResolvedRoute,
};
pub use request::{ChatMessage, GenerationParams, MessageRole, TaskPayload, TaskRequest};
pub use task::{ErrorKind, Task, TaskError, TaskOutcome, TaskResult, TaskStatus};
pub use types::{Priority, TaskId, WorkflowId};

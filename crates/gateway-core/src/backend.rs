//! Backend descriptors and the inference collaborator trait.
//!
//! Two kinds of backend exist: local [`BackendInstance`]s (a model-serving
//! process bound to one GPU, load balanced by the gateway) and
//! [`ExternalBackend`]s (hosted APIs tried before local instances when
//! enabled). Both are reached through an [`InferenceBackend`] implementation.

use crate::request::{ChatMessage, GenerationParams, TaskPayload};
use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Latency tier advertised by a backend instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyTier {
    /// Sub-second responses
    Realtime,
    /// Interactive latency
    #[default]
    Interactive,
    /// Throughput oriented
    Batch,
}

/// Health of a backend instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendHealth {
    /// Eligible for new work
    #[default]
    Healthy,
    /// Repeated dispatch failures; excluded until a probe succeeds
    Degraded,
    /// Hard connection failure; excluded until a probe succeeds
    Unavailable,
}

impl fmt::Display for BackendHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
        }
    }
}

/// Credential attached to backend calls
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// Unauthenticated backend
    #[default]
    None,
    /// `Authorization: Bearer <token>`
    Bearer {
        /// Bearer token
        token: SecretString,
    },
    /// Custom header carrying the key (e.g. `x-api-key`)
    Header {
        /// Header name
        name: String,
        /// Header value
        value: SecretString,
    },
}

/// A model-serving process bound to one GPU
#[derive(Debug, Clone)]
pub struct BackendInstance {
    /// Instance id
    pub id: String,
    /// Model served by this instance
    pub model_name: String,
    /// Base URL (or handle) of the serving process
    pub base_url: String,
    /// Owning GPU
    pub gpu_id: u32,
    /// Maximum concurrent in-flight requests
    pub max_concurrency: u32,
    /// Advertised latency tier
    pub latency_tier: LatencyTier,
    /// Credential attached to calls
    pub credential: Credential,
}

impl BackendInstance {
    /// Call target for this instance
    #[must_use]
    pub fn target(&self) -> BackendTarget {
        BackendTarget {
            id: self.id.clone(),
            model_name: self.model_name.clone(),
            base_url: self.base_url.clone(),
            credential: self.credential.clone(),
        }
    }
}

/// Hosted API backend tried ahead of local instances
#[derive(Debug, Clone)]
pub struct ExternalBackend {
    /// Backend id
    pub id: String,
    /// Model requested from the API
    pub model_name: String,
    /// API base URL
    pub base_url: String,
    /// Whether the backend participates in routing
    pub enabled: bool,
    /// Maximum concurrent in-flight requests
    pub max_concurrency: u32,
    /// Credential attached to calls
    pub credential: Credential,
}

impl ExternalBackend {
    /// Call target for this backend
    #[must_use]
    pub fn target(&self) -> BackendTarget {
        BackendTarget {
            id: self.id.clone(),
            model_name: self.model_name.clone(),
            base_url: self.base_url.clone(),
            credential: self.credential.clone(),
        }
    }
}

/// Everything an [`InferenceBackend`] needs to address one backend
#[derive(Debug, Clone)]
pub struct BackendTarget {
    /// Backend id
    pub id: String,
    /// Model name sent to the backend
    pub model_name: String,
    /// Base URL
    pub base_url: String,
    /// Credential
    pub credential: Credential,
}

/// One agent invocation sent to a backend
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Agent type the request was submitted under
    pub agent_type: String,
    /// Conversation
    pub messages: Vec<ChatMessage>,
    /// Generation parameters
    pub params: GenerationParams,
    /// Per-call timeout
    pub timeout: Duration,
}

impl CompletionRequest {
    /// Build a request from a task payload
    #[must_use]
    pub fn from_payload(agent_type: &str, payload: &TaskPayload, timeout: Duration) -> Self {
        Self {
            agent_type: agent_type.to_string(),
            messages: payload.messages.clone(),
            params: payload.params,
            timeout,
        }
    }
}

/// Backend output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Generated text
    pub text: String,
    /// Tokens generated
    pub token_count: u32,
}

/// Kind of backend call failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "status")]
pub enum BackendErrorKind {
    /// Network-level failure after a connection was made
    Transport,
    /// Call exceeded its timeout
    Timeout,
    /// Non-success HTTP status
    Status(u16),
    /// Credential rejected
    Auth,
    /// Connection refused or host unreachable
    Connection,
    /// Response body could not be interpreted
    InvalidResponse,
    /// Local concurrency limit for the backend reached
    Capacity,
}

/// Backend call failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct BackendError {
    /// Failure kind
    pub kind: BackendErrorKind,
    /// Detail message
    pub message: String,
}

impl BackendError {
    /// Create a backend error
    #[must_use]
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            BackendErrorKind::Timeout,
            format!("call timed out after {}ms", after.as_millis()),
        )
    }

    /// Whether the same backend may be retried
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            BackendErrorKind::Transport
            | BackendErrorKind::Timeout
            | BackendErrorKind::Auth
            | BackendErrorKind::Connection
            | BackendErrorKind::Capacity => true,
            BackendErrorKind::Status(code) => code >= 500 || code == 429,
            BackendErrorKind::InvalidResponse => false,
        }
    }

    /// Whether the failure indicates the backend process is unreachable
    #[must_use]
    pub fn is_hard_failure(&self) -> bool {
        matches!(self.kind, BackendErrorKind::Connection)
    }

    /// Whether the failure was a timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, BackendErrorKind::Timeout)
    }
}

/// The collaborator that performs actual LLM calls
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run one agent invocation against `target`
    async fn run_agent(
        &self,
        target: &BackendTarget,
        request: &CompletionRequest,
    ) -> Result<Completion, BackendError>;

    /// Lightweight liveness check used to restore unhealthy instances
    async fn probe(&self, target: &BackendTarget) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(BackendError::new(BackendErrorKind::Status(503), "x").is_retryable());
        assert!(BackendError::new(BackendErrorKind::Status(429), "x").is_retryable());
        assert!(BackendError::new(BackendErrorKind::Auth, "x").is_retryable());
        assert!(!BackendError::new(BackendErrorKind::Status(400), "x").is_retryable());
        assert!(!BackendError::new(BackendErrorKind::InvalidResponse, "x").is_retryable());
    }

    #[test]
    fn test_hard_failure() {
        assert!(BackendError::new(BackendErrorKind::Connection, "refused").is_hard_failure());
        assert!(!BackendError::timeout(Duration::from_secs(1)).is_hard_failure());
    }

    #[test]
    fn test_credential_deserialization() {
        let json = r#"{"type":"bearer","token":"sk-test"}"#;
        let credential: Credential = serde_json::from_str(json).expect("deserialize");
        assert!(matches!(credential, Credential::Bearer { .. }));
        // Secrets never show up in debug output
        assert!(!format!("{credential:?}").contains("sk-test"));
    }
}

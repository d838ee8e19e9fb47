//! Request types for task submission.
//!
//! A [`TaskRequest`] is the submission shape accepted by the scheduler; the
//! [`TaskPayload`] it carries (messages plus generation parameters) is what
//! eventually reaches a backend.

use crate::error::GatewayError;
use crate::types::{Priority, TaskId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default generation budget when the caller does not set one
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Chat message with role and content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message author
    pub role: MessageRole,
    /// Text content of the message
    pub content: String,
}

impl ChatMessage {
    /// Create a system message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message
    System,
    /// User message
    User,
    /// Assistant message
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// Generation parameters forwarded to the backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Ordered messages plus generation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Conversation sent to the backend
    pub messages: Vec<ChatMessage>,
    /// Generation parameters
    #[serde(default)]
    pub params: GenerationParams,
}

impl TaskPayload {
    /// Create a payload with default generation parameters
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            params: GenerationParams::default(),
        }
    }

    /// Total content size in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }

    /// Short SHA-256 digest of the message content.
    ///
    /// Logs carry this instead of the content itself.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for message in &self.messages {
            hasher.update(message.role.to_string().as_bytes());
            hasher.update([0u8]);
            hasher.update(message.content.as_bytes());
            hasher.update([0u8]);
        }
        let full = format!("{:x}", hasher.finalize());
        full[..16].to_string()
    }
}

/// Task submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Caller supplied id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TaskId>,

    /// Key into the backend registry (e.g. "Clinical", "Billing")
    pub agent_type: String,

    /// Chat messages for the backend
    pub messages: Vec<ChatMessage>,

    /// Priority (defaults to normal)
    #[serde(default)]
    pub priority: Priority,

    /// Timeout in seconds; scheduler default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    /// Ids of tasks that must complete first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<TaskId>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl TaskRequest {
    /// Create a new builder for `TaskRequest`
    #[must_use]
    pub fn builder() -> TaskRequestBuilder {
        TaskRequestBuilder::default()
    }

    /// Payload carried to the backend
    #[must_use]
    pub fn payload(&self) -> TaskPayload {
        let defaults = GenerationParams::default();
        TaskPayload {
            messages: self.messages.clone(),
            params: GenerationParams {
                max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
                temperature: self.temperature.unwrap_or(defaults.temperature),
            },
        }
    }

    /// Validate the request shape.
    ///
    /// Registry membership of `agent_type` and existence of dependencies are
    /// checked by the scheduler, which owns that state.
    ///
    /// # Errors
    /// Returns error if any field is invalid
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.agent_type.trim().is_empty() {
            return Err(GatewayError::validation(
                "agent_type cannot be empty",
                Some("agent_type".to_string()),
                "empty_agent_type",
            ));
        }

        if self.messages.is_empty() {
            return Err(GatewayError::validation(
                "messages cannot be empty",
                Some("messages".to_string()),
                "empty_messages",
            ));
        }

        if let Some(id) = &self.id {
            if id.as_str().trim().is_empty() {
                return Err(GatewayError::validation(
                    "id cannot be blank",
                    Some("id".to_string()),
                    "invalid_id",
                ));
            }
            if self.dependencies.contains(id) {
                return Err(GatewayError::validation(
                    format!("task {id} cannot depend on itself"),
                    Some("dependencies".to_string()),
                    "self_dependency",
                ));
            }
        }

        if self.timeout_seconds == Some(0) {
            return Err(GatewayError::validation(
                "timeout_seconds must be greater than zero",
                Some("timeout_seconds".to_string()),
                "invalid_timeout",
            ));
        }

        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(GatewayError::validation(
                    format!("temperature must be between 0.0 and 2.0, got {t}"),
                    Some("temperature".to_string()),
                    "invalid_temperature",
                ));
            }
        }

        if self.max_tokens == Some(0) {
            return Err(GatewayError::validation(
                "max_tokens must be greater than zero",
                Some("max_tokens".to_string()),
                "invalid_max_tokens",
            ));
        }

        Ok(())
    }
}

/// Builder for `TaskRequest`
#[derive(Debug, Default)]
pub struct TaskRequestBuilder {
    id: Option<TaskId>,
    agent_type: Option<String>,
    messages: Vec<ChatMessage>,
    priority: Priority,
    timeout_seconds: Option<u64>,
    dependencies: Vec<TaskId>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl TaskRequestBuilder {
    /// Set the task id
    #[must_use]
    pub fn id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the agent type
    #[must_use]
    pub fn agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = Some(agent_type.into());
        self
    }

    /// Add a message
    #[must_use]
    pub fn message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Set the messages
    #[must_use]
    pub fn messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Set the priority
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the timeout in seconds
    #[must_use]
    pub fn timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    /// Add a dependency
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Set max_tokens
    #[must_use]
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature
    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Build the request
    ///
    /// # Errors
    /// Returns error if required fields are missing or invalid
    pub fn build(self) -> Result<TaskRequest, GatewayError> {
        let agent_type = self.agent_type.ok_or_else(|| {
            GatewayError::validation(
                "agent_type is required",
                Some("agent_type".to_string()),
                "missing_agent_type",
            )
        })?;

        let request = TaskRequest {
            id: self.id,
            agent_type,
            messages: self.messages,
            priority: self.priority,
            timeout_seconds: self.timeout_seconds,
            dependencies: self.dependencies,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        request.validate()?;

        Ok(request)
    }
}

//! OpenAI-compatible chat completions backend.
//!
//! Local model servers (vLLM, TGI, llama.cpp server) and most hosted APIs
//! speak the same `POST /v1/chat/completions` dialect, so one implementation
//! of [`InferenceBackend`] covers both local instances and external backends.
//! The [`BackendTarget`] carries the base URL, model name and credential for
//! each call.

use async_trait::async_trait;
use gateway_core::{
    BackendError, BackendErrorKind, BackendTarget, ChatMessage, Completion, CompletionRequest,
    Credential, InferenceBackend,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Idle connections kept per host
    pub pool_max_idle_per_host: usize,
    /// Path of the chat completions endpoint
    pub completions_path: String,
    /// Path used for liveness probes
    pub probe_path: String,
    /// Timeout for probe requests
    pub probe_timeout: Duration,
}

impl Default for OpenAiCompatConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            pool_max_idle_per_host: 32,
            completions_path: "/v1/chat/completions".to_string(),
            probe_path: "/v1/models".to_string(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl OpenAiCompatConfig {
    /// Set the connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the probe path
    #[must_use]
    pub fn with_probe_path(mut self, path: impl Into<String>) -> Self {
        self.probe_path = path.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// [`InferenceBackend`] speaking the OpenAI chat completions API
#[derive(Debug, Clone)]
pub struct OpenAiCompatBackend {
    client: Client,
    config: OpenAiCompatConfig,
}

impl OpenAiCompatBackend {
    /// Create a backend
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| {
                BackendError::new(
                    BackendErrorKind::Transport,
                    format!("Failed to create HTTP client: {e}"),
                )
            })?;
        Ok(Self { client, config })
    }

    /// Create with default configuration
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn with_defaults() -> Result<Self, BackendError> {
        Self::new(OpenAiCompatConfig::default())
    }

    fn url(base_url: &str, path: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), path)
    }

    fn authorize(builder: RequestBuilder, credential: &Credential) -> RequestBuilder {
        match credential {
            Credential::None => builder,
            Credential::Bearer { token } => builder.bearer_auth(token.expose_secret()),
            Credential::Header { name, value } => {
                builder.header(name.as_str(), value.expose_secret().as_str())
            }
        }
    }

    fn map_send_error(error: &reqwest::Error, timeout: Duration) -> BackendError {
        if error.is_timeout() {
            BackendError::timeout(timeout)
        } else if error.is_connect() {
            BackendError::new(BackendErrorKind::Connection, error.to_string())
        } else {
            BackendError::new(BackendErrorKind::Transport, error.to_string())
        }
    }

    fn map_status(status: StatusCode, body: &str) -> BackendError {
        let message = serde_json::from_str::<ErrorResponse>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.chars().take(256).collect());
        let kind = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendErrorKind::Auth,
            _ => BackendErrorKind::Status(status.as_u16()),
        };
        BackendError::new(kind, format!("{status}: {message}"))
    }
}

#[async_trait]
impl InferenceBackend for OpenAiCompatBackend {
    async fn run_agent(
        &self,
        target: &BackendTarget,
        request: &CompletionRequest,
    ) -> Result<Completion, BackendError> {
        let url = Self::url(&target.base_url, &self.config.completions_path);
        let body = ChatCompletionBody {
            model: &target.model_name,
            messages: &request.messages,
            max_tokens: request.params.max_tokens,
            temperature: request.params.temperature,
            stream: false,
        };

        debug!(backend = %target.id, model = %target.model_name, "Sending chat completion");

        let builder = self.client.post(&url).timeout(request.timeout).json(&body);
        let response = Self::authorize(builder, &target.credential)
            .send()
            .await
            .map_err(|e| Self::map_send_error(&e, request.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::timeout(request.timeout)
            } else {
                BackendError::new(
                    BackendErrorKind::InvalidResponse,
                    format!("Failed to parse response: {e}"),
                )
            }
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                BackendError::new(BackendErrorKind::InvalidResponse, "response has no choices")
            })?;
        let token_count = parsed
            .usage
            .map_or_else(|| text.split_whitespace().count() as u32, |u| u.completion_tokens);

        trace!(backend = %target.id, token_count, "Chat completion received");

        Ok(Completion { text, token_count })
    }

    async fn probe(&self, target: &BackendTarget) -> Result<(), BackendError> {
        let url = Self::url(&target.base_url, &self.config.probe_path);
        let builder = self.client.get(&url).timeout(self.config.probe_timeout);
        let response = Self::authorize(builder, &target.credential)
            .send()
            .await
            .map_err(|e| Self::map_send_error(&e, self.config.probe_timeout))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(Self::map_status(status, &body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::{GenerationParams, TaskPayload};
    use secrecy::SecretString;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target(base_url: &str, credential: Credential) -> BackendTarget {
        BackendTarget {
            id: "llama-0".to_string(),
            model_name: "llama-3-8b".to_string(),
            base_url: base_url.to_string(),
            credential,
        }
    }

    fn request(timeout: Duration) -> CompletionRequest {
        let payload = TaskPayload {
            messages: vec![ChatMessage::user("Summarise the discharge note")],
            params: GenerationParams {
                max_tokens: 64,
                temperature: 0.2,
            },
        };
        CompletionRequest::from_payload("Clinical", &payload, timeout)
    }

    fn completion_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": text}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 7, "total_tokens": 19}
        })
    }

    #[tokio::test]
    async fn test_run_agent_success_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"model": "llama-3-8b", "max_tokens": 64})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Stable patient")))
            .expect(1)
            .mount(&server)
            .await;

        let backend = OpenAiCompatBackend::with_defaults().expect("client");
        let credential = Credential::Bearer {
            token: SecretString::new("sk-test".to_string()),
        };
        let completion = backend
            .run_agent(&target(&server.uri(), credential), &request(Duration::from_secs(5)))
            .await
            .expect("completion");

        assert_eq!(completion.text, "Stable patient");
        assert_eq!(completion.token_count, 7);
    }

    #[tokio::test]
    async fn test_custom_header_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-api-key", "key-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let backend = OpenAiCompatBackend::with_defaults().expect("client");
        let credential = Credential::Header {
            name: "x-api-key".to_string(),
            value: SecretString::new("key-123".to_string()),
        };
        let result = backend
            .run_agent(&target(&server.uri(), credential), &request(Duration::from_secs(5)))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "Invalid API key", "type": "invalid_request_error"}
            })))
            .mount(&server)
            .await;

        let backend = OpenAiCompatBackend::with_defaults().expect("client");
        let error = backend
            .run_agent(&target(&server.uri(), Credential::None), &request(Duration::from_secs(5)))
            .await
            .expect_err("401 should fail");
        assert_eq!(error.kind, BackendErrorKind::Auth);
        assert!(error.message.contains("Invalid API key"));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let backend = OpenAiCompatBackend::with_defaults().expect("client");
        let error = backend
            .run_agent(&target(&server.uri(), Credential::None), &request(Duration::from_secs(5)))
            .await
            .expect_err("503 should fail");
        assert_eq!(error.kind, BackendErrorKind::Status(503));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body("late"))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let backend = OpenAiCompatBackend::with_defaults().expect("client");
        let error = backend
            .run_agent(&target(&server.uri(), Credential::None), &request(Duration::from_millis(50)))
            .await
            .expect_err("should time out");
        assert!(error.is_timeout());
    }

    #[tokio::test]
    async fn test_refused_connection_is_hard_failure() {
        let backend = OpenAiCompatBackend::with_defaults().expect("client");
        let error = backend
            .run_agent(&target("http://127.0.0.1:1", Credential::None), &request(Duration::from_secs(2)))
            .await
            .expect_err("nothing listens on port 1");
        assert!(error.is_hard_failure());
    }

    #[tokio::test]
    async fn test_empty_choices_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let backend = OpenAiCompatBackend::with_defaults().expect("client");
        let error = backend
            .run_agent(&target(&server.uri(), Credential::None), &request(Duration::from_secs(5)))
            .await
            .expect_err("no choices");
        assert_eq!(error.kind, BackendErrorKind::InvalidResponse);
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn test_probe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        let backend = OpenAiCompatBackend::with_defaults().expect("client");
        assert!(backend.probe(&target(&server.uri(), Credential::None)).await.is_ok());

        let unhealthy = OpenAiCompatBackend::new(OpenAiCompatConfig::default().with_probe_path("/health"))
            .expect("client");
        assert!(unhealthy.probe(&target(&server.uri(), Credential::None)).await.is_err());
    }
}

//! Mock model servers for integration testing
//!
//! Wiremock servers speaking the OpenAI chat completions dialect that local
//! instances and external backends both use.

use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const COMPLETIONS_PATH: &str = "/v1/chat/completions";
const MODELS_PATH: &str = "/v1/models";

/// Mock model server
pub struct MockBackend {
    /// Underlying wiremock server
    pub server: MockServer,
}

impl MockBackend {
    /// Start a server that answers liveness probes
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MODELS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;
        Self { server }
    }

    /// Base URL for the registry
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Answer every completion with `content`
    pub async fn complete_with(&self, content: &str) {
        self.complete_after(content, Duration::ZERO).await;
    }

    /// Answer every completion with `content` after `delay`
    pub async fn complete_after(&self, content: &str, delay: Duration) {
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_response(content))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    /// Fail every completion with `status`
    pub async fn fail_with(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_json(error_response("server_error", "backend unavailable")),
            )
            .mount(&self.server)
            .await;
    }

    /// Fail the next `times` completions with `status`, then fall through to
    /// whatever is mounted after
    pub async fn fail_times(&self, status: u16, times: u64) {
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_json(error_response("overloaded", "try again")),
            )
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Completion requests received so far
    pub async fn completion_calls(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == COMPLETIONS_PATH)
            .count()
    }
}

/// OpenAI style chat completion body
pub fn chat_response(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "mock",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": 12,
            "completion_tokens": content.split_whitespace().count(),
            "total_tokens": 12 + content.split_whitespace().count()
        }
    })
}

/// OpenAI style error body
pub fn error_response(code: &str, message: &str) -> Value {
    json!({
        "error": {
            "message": message,
            "type": code,
            "code": code
        }
    })
}

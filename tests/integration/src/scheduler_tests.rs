//! Scheduler tests
//!
//! Queue backpressure, dependency gating, priority order, cancellation and
//! queue timeouts, driven through the HTTP API.

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_backends::MockBackend;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::time::Duration;

fn timestamp(task: &Value, field: &str) -> DateTime<Utc> {
    task[field]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| panic!("{field} missing on {task}"))
}

async fn held_gateway(backend: &MockBackend, fixture: ConfigFixture) -> TestGateway {
    let fixture = fixture
        .instance("llama-0", "llama-3-8b", &backend.url(), 0, 1)
        .agent("triage", "llama-3-8b");
    let gateway = TestGateway::start(&fixture).await;
    gateway.set_gpu(hot_gpu(0)).await;
    gateway
}

#[tokio::test]
async fn test_queue_full_rejects_only_the_excess() {
    let backend = MockBackend::start().await;
    backend.complete_with("ok").await;
    let gateway = held_gateway(&backend, ConfigFixture::new().queue_max_depth(2)).await;

    let first = gateway.submit(&task_body("triage", "one")).await;
    let second = gateway.submit(&task_body("triage", "two")).await;

    for prompt in ["three", "four"] {
        let response = gateway.post_json("/v1/tasks", &task_body("triage", prompt)).await;
        assert_status(&response, 429);
        let body = TestGateway::json_body(response).await;
        assert_eq!(body["error"]["code"], "queue_full");
    }

    let telemetry = TestGateway::json_body(gateway.get("/v1/telemetry").await).await;
    assert_eq!(telemetry["queue_depth"], 2);

    gateway.set_gpu(cool_gpu(0)).await;
    for id in [&first, &second] {
        let task = gateway.wait_terminal(id).await;
        assert_eq!(task["status"], "COMPLETED");
    }
    assert_eq!(backend.completion_calls().await, 2);
}

#[tokio::test]
async fn test_cancelled_queued_task_never_runs() {
    let backend = MockBackend::start().await;
    backend.complete_with("should not happen").await;
    let gateway = held_gateway(&backend, ConfigFixture::new()).await;

    let task_id = gateway.submit(&task_body("triage", "never mind")).await;
    let response = gateway.delete(&format!("/v1/tasks/{task_id}")).await;
    assert_status(&response, 200);
    let body = TestGateway::json_body(response).await;
    assert_eq!(body["cancelled"], true);

    gateway.set_gpu(cool_gpu(0)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let task = TestGateway::json_body(gateway.get(&format!("/v1/tasks/{task_id}")).await).await;
    assert_eq!(task["status"], "CANCELLED");
    assert_eq!(task["error"]["kind"], "cancelled");
    assert!(task.get("started_at").is_none());
    assert_eq!(backend.completion_calls().await, 0);

    let again = TestGateway::json_body(gateway.delete(&format!("/v1/tasks/{task_id}")).await).await;
    assert_eq!(again["cancelled"], false);
}

#[tokio::test]
async fn test_cancel_unknown_task_is_404() {
    let backend = MockBackend::start().await;
    let gateway = held_gateway(&backend, ConfigFixture::new()).await;

    let response = gateway.delete("/v1/tasks/ghost").await;
    assert_status(&response, 404);
}

#[tokio::test]
async fn test_dependent_waits_for_dependency() {
    let backend = MockBackend::start().await;
    backend.complete_after("step", Duration::from_millis(200)).await;
    let fixture = ConfigFixture::new()
        .instance("llama-0", "llama-3-8b", &backend.url(), 0, 4)
        .agent("triage", "llama-3-8b");
    let gateway = TestGateway::start(&fixture).await;

    gateway
        .submit(&task_body_with_id("extract", "triage", "extract", &[]))
        .await;
    gateway
        .submit(&task_body_with_id("review", "triage", "review", &["extract"]))
        .await;

    let review = TestGateway::json_body(gateway.get("/v1/tasks/review").await).await;
    assert_eq!(review["status"], "QUEUED");

    let extract = gateway.wait_terminal("extract").await;
    let review = gateway.wait_terminal("review").await;
    assert_eq!(extract["status"], "COMPLETED");
    assert_eq!(review["status"], "COMPLETED");
    assert!(timestamp(&review, "started_at") >= timestamp(&extract, "completed_at"));
}

#[tokio::test]
async fn test_failed_dependency_propagates() {
    let broken = MockBackend::start().await;
    broken.fail_with(500).await;
    let healthy = MockBackend::start().await;
    healthy.complete_with("unused").await;

    let fixture = ConfigFixture::new()
        .max_retries(0)
        .instance("broken-0", "broken-model", &broken.url(), 0, 1)
        .instance("llama-0", "llama-3-8b", &healthy.url(), 0, 1)
        .agent("ocr", "broken-model")
        .agent("triage", "llama-3-8b");
    let gateway = TestGateway::start(&fixture).await;

    gateway
        .submit(&task_body_with_id("scan", "ocr", "scan", &[]))
        .await;
    gateway
        .submit(&task_body_with_id("classify", "triage", "classify", &["scan"]))
        .await;

    let scan = gateway.wait_terminal("scan").await;
    let classify = gateway.wait_terminal("classify").await;

    assert_eq!(scan["status"], "FAILED");
    assert_eq!(classify["status"], "FAILED");
    assert_eq!(classify["error"]["kind"], "dependency_failed");
    assert!(classify.get("started_at").is_none());
    assert_eq!(healthy.completion_calls().await, 0);
}

#[tokio::test]
async fn test_unknown_dependency_is_rejected() {
    let backend = MockBackend::start().await;
    backend.complete_with("ok").await;
    let fixture = ConfigFixture::new()
        .instance("llama-0", "llama-3-8b", &backend.url(), 0, 1)
        .agent("triage", "llama-3-8b");
    let gateway = TestGateway::start(&fixture).await;

    let response = gateway
        .post_json(
            "/v1/tasks",
            &task_body_with_id("orphan", "triage", "hi", &["missing"]),
        )
        .await;
    assert_status(&response, 400);
    let body = TestGateway::json_body(response).await;
    assert_eq!(body["error"]["code"], "unknown_dependency");
}

#[tokio::test]
async fn test_higher_priority_dispatches_first() {
    let backend = MockBackend::start().await;
    backend.complete_after("ok", Duration::from_millis(50)).await;
    let gateway = held_gateway(&backend, ConfigFixture::new().batch_size(1)).await;

    let mut low = task_body_with_id("low", "triage", "later", &[]);
    low["priority"] = json!("low");
    let mut critical = task_body_with_id("critical", "triage", "now", &[]);
    critical["priority"] = json!("critical");

    gateway.submit(&low).await;
    gateway.submit(&critical).await;
    gateway.set_gpu(cool_gpu(0)).await;

    let low = gateway.wait_terminal("low").await;
    let critical = gateway.wait_terminal("critical").await;
    assert_eq!(critical["priority"], "critical");
    assert!(timestamp(&critical, "started_at") <= timestamp(&low, "started_at"));
}

#[tokio::test]
async fn test_queued_task_times_out_without_capacity() {
    let backend = MockBackend::start().await;
    backend.complete_with("too late").await;
    let gateway = held_gateway(&backend, ConfigFixture::new()).await;

    let mut body = task_body("triage", "no room");
    body["timeout_seconds"] = json!(1);
    let task_id = gateway.submit(&body).await;

    let task = gateway.wait_terminal(&task_id).await;
    assert_eq!(task["status"], "TIMEOUT");
    assert_eq!(task["error"]["kind"], "queue_timeout");
    assert_eq!(backend.completion_calls().await, 0);
}

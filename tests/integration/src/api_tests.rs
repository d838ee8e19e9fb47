//! HTTP API tests
//!
//! Submission, status, result retention and the operational endpoints,
//! exercised through the real server.

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_backends::MockBackend;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

async fn single_instance_gateway(backend: &MockBackend) -> TestGateway {
    let fixture = ConfigFixture::new()
        .instance("llama-0", "llama-3-8b", &backend.url(), 0, 4)
        .agent("triage", "llama-3-8b");
    TestGateway::start(&fixture).await
}

#[tokio::test]
async fn test_health_and_readiness() {
    let backend = MockBackend::start().await;
    backend.complete_with("ok").await;
    let gateway = single_instance_gateway(&backend).await;

    let response = gateway.get("/health").await;
    assert_status(&response, 200);
    let health = TestGateway::json_body(response).await;
    assert_eq!(health["status"], "healthy");

    let response = gateway.get("/ready").await;
    assert_status(&response, 200);
    let ready = TestGateway::json_body(response).await;
    assert_eq!(ready["ready"], true);
    assert_eq!(ready["agents"], 1);
    assert_eq!(ready["healthy_instances"], 1);
}

#[tokio::test]
async fn test_not_ready_without_agents() {
    let gateway = TestGateway::start(&ConfigFixture::new()).await;

    let response = gateway.get("/ready").await;
    assert_status(&response, 503);
    let ready = TestGateway::json_body(response).await;
    assert_eq!(ready["ready"], false);
    assert!(ready["reason"].is_string());
}

#[tokio::test]
async fn test_submit_and_fetch_result() {
    let backend = MockBackend::start().await;
    backend.complete_with("patient is stable").await;
    let gateway = single_instance_gateway(&backend).await;

    let task_id = gateway.submit(&task_body("triage", "assess vitals")).await;
    let task = gateway.wait_terminal(&task_id).await;

    assert_eq!(task["status"], "COMPLETED");
    assert_eq!(task["result"]["content"], "patient is stable");
    assert_eq!(task["result"]["backend_id"], "llama-0");
    assert_eq!(task["result"]["model_name"], "llama-3-8b");
    assert_eq!(task["result"]["attempt_count"], 1);
    assert_eq!(task["result"]["token_count"], 3);
    assert!(task["started_at"].is_string());
    assert!(task["completed_at"].is_string());
    assert!(task.get("error").is_none());

    let response = gateway.get(&format!("/v1/tasks/{task_id}/result")).await;
    assert_status(&response, 200);
}

#[tokio::test]
async fn test_result_not_ready_while_running() {
    let backend = MockBackend::start().await;
    backend.complete_after("slow", Duration::from_millis(500)).await;
    let gateway = single_instance_gateway(&backend).await;

    let task_id = gateway.submit(&task_body("triage", "take your time")).await;
    let response = gateway.get(&format!("/v1/tasks/{task_id}/result")).await;
    assert_status(&response, 425);
    let body = TestGateway::json_body(response).await;
    assert_eq!(body["error"]["code"], "not_ready");

    let task = gateway.wait_terminal(&task_id).await;
    assert_eq!(task["status"], "COMPLETED");
}

#[tokio::test]
async fn test_result_is_stable_until_ttl() {
    let backend = MockBackend::start().await;
    backend.complete_with("same every time").await;
    let fixture = ConfigFixture::new()
        .result_ttl_ms(600)
        .instance("llama-0", "llama-3-8b", &backend.url(), 0, 4)
        .agent("triage", "llama-3-8b");
    let gateway = TestGateway::start(&fixture).await;

    let task_id = gateway.submit(&task_body("triage", "repeat")).await;
    gateway.wait_terminal(&task_id).await;

    let path = format!("/v1/tasks/{task_id}/result");
    let first = gateway.get(&path).await.bytes().await.expect("body");
    let second = gateway.get(&path).await.bytes().await.expect("body");
    assert_eq!(first, second);

    let gateway_ref = &gateway;
    let path_ref = path.as_str();
    let expired = wait_for(
        || async move { gateway_ref.get(path_ref).await.status().as_u16() == 404 },
        Duration::from_secs(5),
    )
    .await;
    assert!(expired, "result was never evicted");

    let response = gateway.get(&format!("/v1/tasks/{task_id}")).await;
    assert_status(&response, 404);
}

#[tokio::test]
async fn test_submission_errors() {
    let backend = MockBackend::start().await;
    backend.complete_with("ok").await;
    let gateway = single_instance_gateway(&backend).await;

    let response = gateway
        .post_json("/v1/tasks", &task_body("billing", "unknown agent"))
        .await;
    assert_status(&response, 400);
    let body = TestGateway::json_body(response).await;
    assert_eq!(body["error"]["code"], "unknown_agent");

    let response = gateway
        .post_json("/v1/tasks", &json!({"agent_type": "triage", "messages": []}))
        .await;
    assert_status(&response, 400);
    let body = TestGateway::json_body(response).await;
    assert_eq!(body["error"]["field"], "messages");

    let response = gateway
        .post_json("/v1/tasks", &task_body_with_id("dup", "triage", "one", &[]))
        .await;
    assert_status(&response, 202);
    let response = gateway
        .post_json("/v1/tasks", &task_body_with_id("dup", "triage", "two", &[]))
        .await;
    assert_status(&response, 409);

    let response = gateway.get("/v1/tasks/does-not-exist").await;
    assert_status(&response, 404);
}

#[tokio::test]
async fn test_batch_submission_reports_each_item() {
    let backend = MockBackend::start().await;
    backend.complete_with("ok").await;
    let gateway = single_instance_gateway(&backend).await;

    let response = gateway
        .post_json(
            "/v1/tasks/batch",
            &json!([
                task_body("triage", "first"),
                task_body("nobody", "second"),
                task_body("triage", "third"),
            ]),
        )
        .await;
    assert_status(&response, 200);
    let items = TestGateway::json_body(response).await;
    let items = items.as_array().expect("array");

    assert_eq!(items.len(), 3);
    assert!(items[0]["task_id"].is_string());
    assert_eq!(items[1]["error"]["code"], "unknown_agent");
    assert!(items[2]["task_id"].is_string());

    for item in [&items[0], &items[2]] {
        let task = gateway
            .wait_terminal(item["task_id"].as_str().expect("id"))
            .await;
        assert_eq!(task["status"], "COMPLETED");
    }
}

#[tokio::test]
async fn test_telemetry_and_metrics() {
    let backend = MockBackend::start().await;
    backend.complete_with("ok").await;
    let gateway = single_instance_gateway(&backend).await;

    let task_id = gateway.submit(&task_body("triage", "count me")).await;
    gateway.wait_terminal(&task_id).await;

    let response = gateway.get("/v1/telemetry").await;
    assert_status(&response, 200);
    let telemetry = TestGateway::json_body(response).await;
    assert_eq!(telemetry["gpu_telemetry_ok"], true);
    assert_eq!(telemetry["gpus"][0]["gpu_id"], 0);
    assert_eq!(telemetry["queue_depth"], 0);
    assert_eq!(telemetry["backends"][0]["backend_id"], "llama-0");

    let response = gateway.get("/metrics").await;
    assert_status(&response, 200);
    let text = response.text().await.expect("text");
    assert!(text.contains("gateway_tasks_total"));
    assert!(text.contains("gateway_backend_requests_total"));
    assert!(text.contains("gateway_gpu_memory_percent"));

    let events = gateway.events.events();
    assert!(events.iter().any(|e| e.event_type() == "task_finished"));
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let gateway = TestGateway::start(&ConfigFixture::new()).await;

    let response = gateway.get("/v2/nothing").await;
    assert_status(&response, 404);
    let body = TestGateway::json_body(response).await;
    assert_eq!(body["error"]["code"], "not_found");
}

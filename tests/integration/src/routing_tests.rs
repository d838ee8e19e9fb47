//! Routing tests
//!
//! Retry, fallback across external and local backends, and GPU-aware
//! instance selection.

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_backends::MockBackend;
use std::time::Duration;

#[tokio::test]
async fn test_fallback_chain_reaches_local_instance() {
    let external = MockBackend::start().await;
    external.fail_with(500).await;
    let local = MockBackend::start().await;
    local.complete_with("served locally").await;

    let fixture = ConfigFixture::new()
        .external("hosted", "gpt-4o-mini", &external.url())
        .instance("llama-0", "llama-3-8b", &local.url(), 0, 2)
        .agent_with_fallback("summarizer", &["hosted"], Some("llama-3-8b"));
    let gateway = TestGateway::start(&fixture).await;

    let task_id = gateway.submit(&task_body("summarizer", "summarize")).await;
    let task = gateway.wait_terminal(&task_id).await;

    assert_eq!(task["status"], "COMPLETED");
    assert_eq!(task["result"]["backend_id"], "llama-0");
    assert_eq!(task["result"]["content"], "served locally");

    let external_calls = external.completion_calls().await;
    assert_eq!(external_calls, 3, "one call plus two retries");
    assert_eq!(
        task["result"]["attempt_count"].as_u64(),
        Some(external_calls as u64 + 1)
    );
}

#[tokio::test]
async fn test_healthy_external_backend_is_preferred() {
    let external = MockBackend::start().await;
    external.complete_with("from the api").await;
    let local = MockBackend::start().await;
    local.complete_with("from the gpu").await;

    let fixture = ConfigFixture::new()
        .external("hosted", "gpt-4o-mini", &external.url())
        .instance("llama-0", "llama-3-8b", &local.url(), 0, 2)
        .agent_with_fallback("summarizer", &["hosted"], Some("llama-3-8b"));
    let gateway = TestGateway::start(&fixture).await;

    let task_id = gateway.submit(&task_body("summarizer", "summarize")).await;
    let task = gateway.wait_terminal(&task_id).await;

    assert_eq!(task["result"]["backend_id"], "hosted");
    assert_eq!(task["result"]["model_name"], "gpt-4o-mini");
    assert_eq!(local.completion_calls().await, 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried_in_place() {
    let local = MockBackend::start().await;
    local.fail_times(503, 2).await;
    local.complete_with("third time lucky").await;

    let fixture = ConfigFixture::new()
        .max_retries(3)
        .instance("llama-0", "llama-3-8b", &local.url(), 0, 2)
        .agent("triage", "llama-3-8b");
    let gateway = TestGateway::start(&fixture).await;

    let task_id = gateway.submit(&task_body("triage", "flaky")).await;
    let task = gateway.wait_terminal(&task_id).await;

    assert_eq!(task["status"], "COMPLETED");
    assert_eq!(task["result"]["attempt_count"], 3);
    assert_eq!(local.completion_calls().await, 3);
}

#[tokio::test]
async fn test_exhausted_chain_fails_with_every_candidate() {
    let external = MockBackend::start().await;
    external.fail_with(502).await;
    let local = MockBackend::start().await;
    local.fail_with(500).await;

    let fixture = ConfigFixture::new()
        .max_retries(1)
        .external("hosted", "gpt-4o-mini", &external.url())
        .instance("llama-0", "llama-3-8b", &local.url(), 0, 2)
        .agent_with_fallback("summarizer", &["hosted"], Some("llama-3-8b"));
    let gateway = TestGateway::start(&fixture).await;

    let task_id = gateway.submit(&task_body("summarizer", "doomed")).await;
    let task = gateway.wait_terminal(&task_id).await;

    assert_eq!(task["status"], "FAILED");
    assert_eq!(task["error"]["kind"], "backend_error");
    assert!(task.get("result").is_none());

    let chain = task["error"]["chain"].as_array().expect("chain");
    assert_eq!(chain.len(), 2);
    assert!(chain[0].as_str().unwrap_or_default().starts_with("hosted"));
    assert!(chain[1].as_str().unwrap_or_default().starts_with("llama-0"));

    let calls = external.completion_calls().await + local.completion_calls().await;
    assert_eq!(task["error"]["attempt_count"].as_u64(), Some(calls as u64));
}

#[tokio::test]
async fn test_hot_gpu_instance_is_skipped() {
    let hot = MockBackend::start().await;
    hot.complete_with("hot").await;
    let cool = MockBackend::start().await;
    cool.complete_with("cool").await;

    let fixture = ConfigFixture::new()
        .gpus(&[0, 1])
        .instance("llama-0", "llama-3-8b", &hot.url(), 0, 4)
        .instance("llama-1", "llama-3-8b", &cool.url(), 1, 4)
        .agent("triage", "llama-3-8b");
    let gateway = TestGateway::start(&fixture).await;
    gateway.set_gpu(hot_gpu(0)).await;

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(gateway.submit(&task_body("triage", &format!("case {i}"))).await);
    }
    for id in &ids {
        let task = gateway.wait_terminal(id).await;
        assert_eq!(task["status"], "COMPLETED");
        assert_eq!(task["result"]["backend_id"], "llama-1");
    }
    assert_eq!(hot.completion_calls().await, 0);
}

#[tokio::test]
async fn test_tasks_wait_for_gpu_headroom() {
    let local = MockBackend::start().await;
    local.complete_with("done").await;

    let fixture = ConfigFixture::new()
        .instance("llama-0", "llama-3-8b", &local.url(), 0, 2)
        .agent("triage", "llama-3-8b");
    let gateway = TestGateway::start(&fixture).await;
    gateway.set_gpu(hot_gpu(0)).await;

    let task_id = gateway.submit(&task_body("triage", "patience")).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let task = TestGateway::json_body(gateway.get(&format!("/v1/tasks/{task_id}")).await).await;
    assert_eq!(task["status"], "QUEUED");
    assert_eq!(local.completion_calls().await, 0);

    gateway.set_gpu(cool_gpu(0)).await;
    let task = gateway.wait_terminal(&task_id).await;
    assert_eq!(task["status"], "COMPLETED");
    assert_eq!(task["result"]["backend_id"], "llama-0");
}

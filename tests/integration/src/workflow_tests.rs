//! Workflow tests
//!
//! DAG validation, wave execution, partial failure and the speedup metrics
//! of parallel waves.

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_backends::MockBackend;
use serde_json::{json, Value};
use std::time::Duration;

fn outcome<'a>(workflow: &'a Value, task_id: &str) -> &'a Value {
    workflow["tasks"]
        .as_array()
        .and_then(|tasks| tasks.iter().find(|t| t["task_id"] == task_id))
        .unwrap_or_else(|| panic!("task {task_id} missing from {workflow}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_wave_speedup() {
    let extractor = MockBackend::start().await;
    extractor
        .complete_after("entities found", Duration::from_millis(800))
        .await;
    let coder = MockBackend::start().await;
    coder
        .complete_after("codes assigned", Duration::from_millis(1000))
        .await;

    let fixture = ConfigFixture::new()
        .gpus(&[0, 1])
        .instance("extract-0", "extract-model", &extractor.url(), 0, 1)
        .instance("coder-0", "coder-model", &coder.url(), 1, 1)
        .agent("extraction", "extract-model")
        .agent("coding", "coder-model");
    let gateway = TestGateway::start(&fixture).await;

    let body = workflow_body(
        "wf-parallel",
        vec![
            task_body_with_id("a", "extraction", "find entities", &[]),
            task_body_with_id("b", "coding", "assign codes", &[]),
        ],
    );
    let response = gateway.post_json("/v1/workflows", &body).await;
    assert_status(&response, 200);
    let workflow = TestGateway::json_body(response).await;

    assert_eq!(workflow["status"], "COMPLETE");
    assert_eq!(workflow["waves"], json!([["a", "b"]]));
    assert_eq!(workflow["context"]["case"], "wf-parallel");

    let metrics = &workflow["metrics"];
    let total = metrics["total_latency_ms"].as_u64().expect("total");
    let sequential = metrics["sequential_latency_estimate_ms"]
        .as_u64()
        .expect("sequential");
    let speedup = metrics["speedup_factor"].as_f64().expect("speedup");

    assert_eq!(metrics["wave_count"], 1);
    assert!((1000..1600).contains(&total), "total {total}ms");
    assert!(sequential >= 1800, "sequential {sequential}ms");
    assert!(speedup > 1.3 && speedup < 2.0, "speedup {speedup}");

    let composite = workflow["aggregated_result"]["composite"]
        .as_str()
        .expect("composite");
    assert!(composite.contains("entities found"));
    assert!(composite.contains("codes assigned"));
}

#[tokio::test]
async fn test_dependency_chain_with_failure_is_partial() {
    let broken = MockBackend::start().await;
    broken.fail_with(500).await;
    let healthy = MockBackend::start().await;
    healthy.complete_with("claim summary").await;

    let fixture = ConfigFixture::new()
        .max_retries(0)
        .instance("ocr-0", "ocr-model", &broken.url(), 0, 1)
        .instance("llama-0", "llama-3-8b", &healthy.url(), 0, 2)
        .agent("ocr", "ocr-model")
        .agent("summary", "llama-3-8b");
    let gateway = TestGateway::start(&fixture).await;

    let body = workflow_body(
        "wf-chain",
        vec![
            task_body_with_id("scan", "ocr", "read the form", &[]),
            task_body_with_id("summarize", "summary", "summarize the claim", &[]),
            task_body_with_id("adjudicate", "summary", "decide", &["scan"]),
        ],
    );
    let workflow = TestGateway::json_body(gateway.post_json("/v1/workflows", &body).await).await;

    assert_eq!(workflow["status"], "PARTIAL");
    assert_eq!(workflow["waves"], json!([["scan", "summarize"], ["adjudicate"]]));

    let scan = outcome(&workflow, "scan");
    assert_eq!(scan["status"], "FAILED");
    assert_eq!(scan["error"]["kind"], "backend_error");

    let adjudicate = outcome(&workflow, "adjudicate");
    assert_eq!(adjudicate["status"], "FAILED");
    assert_eq!(adjudicate["error"]["kind"], "dependency_failed");
    assert_eq!(adjudicate["wave"], 1);
    assert!(adjudicate.get("started_at").is_none());

    let summarize = outcome(&workflow, "summarize");
    assert_eq!(summarize["status"], "COMPLETED");
    assert_eq!(summarize["result"]["content"], "claim summary");

    let sections = workflow["aggregated_result"]["sections"]
        .as_array()
        .expect("sections");
    assert_eq!(sections.len(), 3);
    assert_eq!(healthy.completion_calls().await, 1);
}

#[tokio::test]
async fn test_dependent_wave_sees_completed_dependency() {
    let backend = MockBackend::start().await;
    backend.complete_with("done").await;
    let fixture = ConfigFixture::new()
        .instance("llama-0", "llama-3-8b", &backend.url(), 0, 2)
        .agent("triage", "llama-3-8b");
    let gateway = TestGateway::start(&fixture).await;

    let body = workflow_body(
        "wf-sequence",
        vec![
            task_body_with_id("first", "triage", "one", &[]),
            task_body_with_id("second", "triage", "two", &["first"]),
            task_body_with_id("third", "triage", "three", &["second"]),
        ],
    );
    let workflow = TestGateway::json_body(gateway.post_json("/v1/workflows", &body).await).await;

    assert_eq!(workflow["status"], "COMPLETE");
    assert_eq!(workflow["metrics"]["wave_count"], 3);
    for (task_id, wave) in [("first", 0), ("second", 1), ("third", 2)] {
        let task = outcome(&workflow, task_id);
        assert_eq!(task["status"], "COMPLETED");
        assert_eq!(task["wave"], wave);
    }

    let response = gateway.get("/v1/workflows/wf-sequence").await;
    assert_status(&response, 200);
    let stored = TestGateway::json_body(response).await;
    assert_eq!(stored["status"], "COMPLETE");
    assert_eq!(stored["tasks"], workflow["tasks"]);

    let response = gateway.delete("/v1/workflows/wf-sequence").await;
    let cancel = TestGateway::json_body(response).await;
    assert_eq!(cancel["cancelled"], false);

    let events = gateway.events.events();
    assert!(events.iter().any(|e| e.event_type() == "workflow_finished"));
}

#[tokio::test]
async fn test_invalid_workflows_are_rejected_up_front() {
    let backend = MockBackend::start().await;
    backend.complete_with("unused").await;
    let fixture = ConfigFixture::new()
        .instance("llama-0", "llama-3-8b", &backend.url(), 0, 2)
        .agent("triage", "llama-3-8b");
    let gateway = TestGateway::start(&fixture).await;

    let cyclic = workflow_body(
        "wf-cycle",
        vec![
            task_body_with_id("a", "triage", "a", &["b"]),
            task_body_with_id("b", "triage", "b", &["a"]),
        ],
    );
    let response = gateway.post_json("/v1/workflows", &cyclic).await;
    assert_status(&response, 400);
    let body = TestGateway::json_body(response).await;
    assert_eq!(body["error"]["code"], "invalid_workflow");

    let dangling = workflow_body(
        "wf-dangling",
        vec![task_body_with_id("a", "triage", "a", &["nowhere"])],
    );
    let response = gateway.post_json("/v1/workflows", &dangling).await;
    assert_status(&response, 400);

    let unknown_agent = workflow_body(
        "wf-agent",
        vec![task_body_with_id("a", "radiology", "a", &[])],
    );
    let response = gateway.post_json("/v1/workflows", &unknown_agent).await;
    assert_status(&response, 400);
    let body = TestGateway::json_body(response).await;
    assert_eq!(body["error"]["code"], "unknown_agent");

    let response = gateway.get("/v1/workflows/wf-cycle").await;
    assert_status(&response, 404);
    assert_eq!(backend.completion_calls().await, 0);
}

#[tokio::test]
async fn test_full_queue_waits_until_workflow_deadline() {
    let backend = MockBackend::start().await;
    backend.complete_with("too late").await;
    let fixture = ConfigFixture::new()
        .queue_max_depth(1)
        .instance("llama-0", "llama-3-8b", &backend.url(), 0, 1)
        .agent("triage", "llama-3-8b");
    let gateway = TestGateway::start(&fixture).await;
    gateway.set_gpu(hot_gpu(0)).await;

    let mut body = workflow_body(
        "wf-backpressure",
        vec![
            task_body_with_id("first", "triage", "one", &[]),
            task_body_with_id("second", "triage", "two", &[]),
        ],
    );
    body["timeout_seconds"] = json!(1);
    let response = gateway.post_json("/v1/workflows", &body).await;
    assert_status(&response, 200);
    let workflow = TestGateway::json_body(response).await;

    assert_eq!(workflow["status"], "TIMED_OUT");
    let first = outcome(&workflow, "first");
    assert_eq!(first["status"], "CANCELLED");
    let second = outcome(&workflow, "second");
    assert_eq!(second["status"], "CANCELLED");
    assert_eq!(second["error"]["kind"], "workflow_timeout");
    assert!(second.get("scheduler_task_id").is_none());
    assert!(workflow["metrics"]["total_latency_ms"].as_u64().expect("total") >= 1000);
    assert_eq!(backend.completion_calls().await, 0);
}

#[tokio::test]
async fn test_workflow_id_with_separator_is_rejected() {
    let backend = MockBackend::start().await;
    backend.complete_with("unused").await;
    let fixture = ConfigFixture::new()
        .instance("llama-0", "llama-3-8b", &backend.url(), 0, 1)
        .agent("triage", "llama-3-8b");
    let gateway = TestGateway::start(&fixture).await;

    let body = workflow_body("wf:scoped", vec![task_body_with_id("a", "triage", "a", &[])]);
    let response = gateway.post_json("/v1/workflows", &body).await;
    assert_status(&response, 400);
    let body = TestGateway::json_body(response).await;
    assert_eq!(body["error"]["code"], "invalid_workflow_id");
    assert_eq!(body["error"]["field"], "id");
    assert_eq!(backend.completion_calls().await, 0);
}

//! Test helper utilities for integration tests

use crate::fixtures::ConfigFixture;
use gateway_config::{parse_config, ConfigFormat};
use gateway_core::{BackendRegistry, InferenceBackend};
use gateway_orchestrator::Orchestrator;
use gateway_providers::OpenAiCompatBackend;
use gateway_routing::{LoadBalancer, Router};
use gateway_scheduler::Scheduler;
use gateway_server::{AppState, Server, ServerConfig, ShutdownConfig, ShutdownCoordinator};
use gateway_telemetry::{
    CompositeEventSink, EventSink, FleetMonitor, GpuMetrics, GpuMetricsSource, MemoryEventSink,
    Metrics, StaticGpuSource, TracingEventSink,
};
use once_cell::sync::Lazy;
use reqwest::{Client, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for tests (only once)
static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
});

/// Initialize tracing for tests
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// Full gateway stack listening on an ephemeral port
pub struct TestGateway {
    /// HTTP client for making requests
    pub client: Client,
    /// Base URL for the server
    pub base_url: String,
    /// GPU readings the fleet monitor polls
    pub gpus: Arc<StaticGpuSource>,
    /// Fleet monitor
    pub monitor: Arc<FleetMonitor>,
    /// Backend registry
    pub registry: Arc<BackendRegistry>,
    /// Scheduler handle
    pub scheduler: Scheduler,
    /// Audit events emitted so far
    pub events: Arc<MemoryEventSink>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl TestGateway {
    /// Build and start every component from `fixture`
    pub async fn start(fixture: &ConfigFixture) -> Self {
        init_tracing();
        let config =
            parse_config(&fixture.to_yaml(), ConfigFormat::Yaml).expect("fixture config is valid");

        let metrics = Metrics::new().expect("metrics register");
        let events = Arc::new(MemoryEventSink::new());
        let sink: Arc<dyn EventSink> = Arc::new(CompositeEventSink::new(vec![
            Arc::clone(&events) as Arc<dyn EventSink>,
            Arc::new(TracingEventSink),
        ]));

        let registry = Arc::new(BackendRegistry::new(
            config.to_registry_snapshot().expect("registry builds"),
        ));
        let backend: Arc<dyn InferenceBackend> =
            Arc::new(OpenAiCompatBackend::with_defaults().expect("client builds"));

        let gpus = Arc::new(StaticGpuSource::new(
            config
                .telemetry
                .static_gpus
                .iter()
                .map(|gpu| GpuMetrics {
                    gpu_id: gpu.gpu_id,
                    memory_used_mb: gpu.memory_used_mb,
                    memory_total_mb: gpu.memory_total_mb,
                    utilization_percent: gpu.utilization_percent,
                    temperature_celsius: gpu.temperature_celsius,
                })
                .collect(),
        ));

        let shutdown = Arc::new(ShutdownCoordinator::new(
            ShutdownConfig::default().with_graceful_timeout(config.server.shutdown_timeout),
        ));

        let monitor = Arc::new(
            FleetMonitor::new(
                config.monitor_config(),
                Arc::clone(&registry),
                Arc::clone(&gpus) as Arc<dyn GpuMetricsSource>,
                Arc::clone(&backend),
            )
            .with_metrics(metrics.clone()),
        );
        let _ = monitor.spawn(shutdown.token().child_token());

        let balancer = Arc::new(
            LoadBalancer::new(
                config.load_balancer_config(),
                Arc::clone(&registry),
                Arc::clone(&monitor),
            )
            .with_metrics(metrics.clone()),
        );
        let router = Arc::new(
            Router::new(
                config.router_config(),
                Arc::clone(&registry),
                Arc::clone(&balancer),
                backend,
            )
            .with_reporter(monitor.reporter())
            .with_metrics(metrics.clone()),
        );
        let scheduler = Scheduler::builder(Arc::clone(&registry), Arc::clone(&balancer), router)
            .config(config.scheduler_config())
            .event_sink(Arc::clone(&sink))
            .metrics(metrics.clone())
            .build();
        let _ = scheduler.start();

        let orchestrator = Arc::new(
            Orchestrator::new(config.orchestrator_config(), scheduler.clone())
                .with_event_sink(sink)
                .with_metrics(metrics.clone()),
        );

        let state = AppState::builder()
            .scheduler(scheduler.clone())
            .orchestrator(orchestrator)
            .registry(Arc::clone(&registry))
            .balancer(balancer)
            .metrics(metrics)
            .shutdown(Arc::clone(&shutdown))
            .build()
            .expect("state builds");

        let server = Server::bind(ServerConfig {
            port: 0,
            ..ServerConfig::from(&config.server)
        })
        .await
        .expect("Failed to bind");
        let addr = server.local_addr().expect("Failed to get local addr");
        tokio::spawn(async move {
            let _ = server.serve(state).await;
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create client");

        let gateway = Self {
            client,
            base_url: format!("http://{addr}"),
            gpus,
            monitor,
            registry,
            scheduler,
            events,
            shutdown,
        };
        let monitor = Arc::clone(&gateway.monitor);
        assert!(
            wait_for(
                || {
                    let monitor = Arc::clone(&monitor);
                    async move { monitor.snapshot().gpu_telemetry_ok() }
                },
                Duration::from_secs(5),
            )
            .await,
            "GPU telemetry never came up"
        );
        gateway
    }

    /// Get the full URL for a path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Request failed")
    }

    /// Make a POST request with JSON body
    pub async fn post_json(&self, path: &str, body: &Value) -> Response {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Request failed")
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Response {
        self.client
            .delete(self.url(path))
            .send()
            .await
            .expect("Request failed")
    }

    /// Parse response body as JSON
    pub async fn json_body(response: Response) -> Value {
        response.json().await.expect("Failed to parse JSON")
    }

    /// Submit a task and return its id
    pub async fn submit(&self, body: &Value) -> String {
        let response = self.post_json("/v1/tasks", body).await;
        assert_status(&response, 202);
        let json = Self::json_body(response).await;
        json["task_id"].as_str().expect("task_id").to_string()
    }

    /// Poll a task until it reaches a terminal status
    pub async fn wait_terminal(&self, task_id: &str) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
        loop {
            let json = Self::json_body(self.get(&format!("/v1/tasks/{task_id}")).await).await;
            let status = json["status"].as_str().unwrap_or_default();
            if matches!(status, "COMPLETED" | "FAILED" | "TIMEOUT" | "CANCELLED") {
                return json;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {task_id} stuck in {status}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Replace one GPU reading and wait until the monitor has published it
    pub async fn set_gpu(&self, reading: GpuMetrics) {
        self.gpus.set(reading);
        let monitor = Arc::clone(&self.monitor);
        assert!(
            wait_for(
                || {
                    let monitor = Arc::clone(&monitor);
                    async move { monitor.snapshot().gpu(reading.gpu_id).copied() == Some(reading) }
                },
                Duration::from_secs(5),
            )
            .await,
            "GPU {} reading never published",
            reading.gpu_id
        );
    }

    /// Stop the server and background loops
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.shutdown.trigger("test finished");
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reading above the default memory threshold
pub fn hot_gpu(gpu_id: u32) -> GpuMetrics {
    GpuMetrics {
        gpu_id,
        memory_used_mb: 78_000,
        memory_total_mb: 80_000,
        utilization_percent: 99.0,
        temperature_celsius: 70.0,
    }
}

/// Reading well inside every threshold
pub fn cool_gpu(gpu_id: u32) -> GpuMetrics {
    GpuMetrics {
        gpu_id,
        memory_used_mb: 2_000,
        memory_total_mb: 80_000,
        utilization_percent: 5.0,
        temperature_celsius: 45.0,
    }
}

/// Assert that a response has the expected status code
pub fn assert_status(response: &Response, expected: u16) {
    assert_eq!(
        response.status().as_u16(),
        expected,
        "Expected status {}, got {}",
        expected,
        response.status()
    );
}

/// Wait for a condition to be true with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

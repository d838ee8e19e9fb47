//! Prometheus metrics.
//!
//! One [`Metrics`] instance owns a private registry; it is created at process
//! start and shared by handle with every component that records into it.

use crate::gpu::GpuMetrics;
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Gateway metrics
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    queue_depth: IntGauge,
    tasks_total: IntCounterVec,
    backend_requests_total: IntCounterVec,
    backend_latency_seconds: HistogramVec,
    backend_inflight: IntGaugeVec,
    gpu_memory_percent: GaugeVec,
    gpu_utilization_percent: GaugeVec,
    gpu_temperature_celsius: GaugeVec,
    workflows_total: IntCounterVec,
    workflow_speedup: Histogram,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create and register every gateway metric
    ///
    /// # Errors
    /// Returns error if a metric cannot be registered
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let queue_depth = IntGauge::new("gateway_queue_depth", "Tasks waiting in the priority queue")?;
        let tasks_total = IntCounterVec::new(
            Opts::new("gateway_tasks_total", "Tasks reaching a terminal status"),
            &["status"],
        )?;
        let backend_requests_total = IntCounterVec::new(
            Opts::new("gateway_backend_requests_total", "Backend call attempts by outcome"),
            &["backend", "outcome"],
        )?;
        let backend_latency_seconds = HistogramVec::new(
            HistogramOpts::new("gateway_backend_latency_seconds", "Backend call latency")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["backend"],
        )?;
        let backend_inflight = IntGaugeVec::new(
            Opts::new("gateway_backend_inflight", "In-flight requests per backend instance"),
            &["backend"],
        )?;
        let gpu_memory_percent = GaugeVec::new(
            Opts::new("gateway_gpu_memory_percent", "GPU memory in use"),
            &["gpu"],
        )?;
        let gpu_utilization_percent = GaugeVec::new(
            Opts::new("gateway_gpu_utilization_percent", "GPU compute utilization"),
            &["gpu"],
        )?;
        let gpu_temperature_celsius = GaugeVec::new(
            Opts::new("gateway_gpu_temperature_celsius", "GPU temperature"),
            &["gpu"],
        )?;
        let workflows_total = IntCounterVec::new(
            Opts::new("gateway_workflows_total", "Workflows by final status"),
            &["status"],
        )?;
        let workflow_speedup = Histogram::with_opts(
            HistogramOpts::new("gateway_workflow_speedup", "Sequential estimate over wall clock")
                .buckets(vec![0.5, 1.0, 1.25, 1.5, 2.0, 3.0, 4.0, 6.0, 8.0]),
        )?;

        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(tasks_total.clone()))?;
        registry.register(Box::new(backend_requests_total.clone()))?;
        registry.register(Box::new(backend_latency_seconds.clone()))?;
        registry.register(Box::new(backend_inflight.clone()))?;
        registry.register(Box::new(gpu_memory_percent.clone()))?;
        registry.register(Box::new(gpu_utilization_percent.clone()))?;
        registry.register(Box::new(gpu_temperature_celsius.clone()))?;
        registry.register(Box::new(workflows_total.clone()))?;
        registry.register(Box::new(workflow_speedup.clone()))?;

        Ok(Self {
            registry,
            queue_depth,
            tasks_total,
            backend_requests_total,
            backend_latency_seconds,
            backend_inflight,
            gpu_memory_percent,
            gpu_utilization_percent,
            gpu_temperature_celsius,
            workflows_total,
            workflow_speedup,
        })
    }

    /// Set the current queue depth
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }

    /// Count a task reaching `status`
    pub fn record_task(&self, status: &str) {
        self.tasks_total.with_label_values(&[status]).inc();
    }

    /// Record one backend call attempt
    pub fn record_backend_call(&self, backend: &str, outcome: &str, latency: Duration) {
        self.backend_requests_total
            .with_label_values(&[backend, outcome])
            .inc();
        self.backend_latency_seconds
            .with_label_values(&[backend])
            .observe(latency.as_secs_f64());
    }

    /// Set the in-flight count for a backend instance
    pub fn set_backend_inflight(&self, backend: &str, inflight: u32) {
        self.backend_inflight
            .with_label_values(&[backend])
            .set(i64::from(inflight));
    }

    /// Publish the latest readings for one GPU
    pub fn record_gpu(&self, gpu: &GpuMetrics) {
        let label = gpu.gpu_id.to_string();
        self.gpu_memory_percent
            .with_label_values(&[label.as_str()])
            .set(gpu.memory_percent());
        self.gpu_utilization_percent
            .with_label_values(&[label.as_str()])
            .set(gpu.utilization_percent);
        self.gpu_temperature_celsius
            .with_label_values(&[label.as_str()])
            .set(gpu.temperature_celsius);
    }

    /// Count a finished workflow and its speedup
    pub fn record_workflow(&self, status: &str, speedup: Option<f64>) {
        self.workflows_total.with_label_values(&[status]).inc();
        if let Some(speedup) = speedup.filter(|s| s.is_finite()) {
            self.workflow_speedup.observe(speedup);
        }
    }

    /// Render in the Prometheus text exposition format
    ///
    /// # Errors
    /// Returns error if encoding fails
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

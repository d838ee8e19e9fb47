//! GPU telemetry and backend health monitor.
//!
//! The monitor is the only writer of GPU readings and instance health. It
//! publishes an immutable [`FleetSnapshot`] through `arc-swap`; the load
//! balancer reads whole snapshots and never sees a half-applied update.
//!
//! Dispatch outcomes reach the monitor as [`HealthSignal`]s over a channel:
//!
//! - `degraded_after_failures` consecutive failures mark an instance DEGRADED
//! - a hard connection failure marks it UNAVAILABLE immediately
//! - any success resets the failure count
//! - a successful probe restores a DEGRADED/UNAVAILABLE instance to HEALTHY

use crate::gpu::{GpuMetrics, GpuMetricsSource};
use crate::metrics::Metrics;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use gateway_core::{BackendError, BackendHealth, BackendRegistry, InferenceBackend};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often GPU metrics are polled
    pub poll_interval: Duration,
    /// How often unhealthy instances are probed
    pub probe_interval: Duration,
    /// Consecutive failures before an instance is DEGRADED
    pub degraded_after_failures: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            probe_interval: Duration::from_secs(10),
            degraded_after_failures: 3,
        }
    }
}

/// Immutable view of GPU readings and instance health
#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetSnapshot {
    version: u64,
    gpus: HashMap<u32, GpuMetrics>,
    health: HashMap<String, BackendHealth>,
    gpu_telemetry_ok: bool,
    updated_at: Option<DateTime<Utc>>,
}

impl FleetSnapshot {
    /// Build a snapshot directly from readings and health
    #[must_use]
    pub fn from_parts(gpus: Vec<GpuMetrics>, health: HashMap<String, BackendHealth>) -> Self {
        Self {
            version: 0,
            gpus: gpus.into_iter().map(|g| (g.gpu_id, g)).collect(),
            health,
            gpu_telemetry_ok: true,
            updated_at: Some(Utc::now()),
        }
    }

    /// Monotonic version
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Latest readings for one GPU
    #[must_use]
    pub fn gpu(&self, gpu_id: u32) -> Option<&GpuMetrics> {
        self.gpus.get(&gpu_id)
    }

    /// All GPU readings, ordered by GPU id
    #[must_use]
    pub fn gpus(&self) -> Vec<GpuMetrics> {
        let mut gpus: Vec<_> = self.gpus.values().copied().collect();
        gpus.sort_by_key(|g| g.gpu_id);
        gpus
    }

    /// Health of an instance; unknown instances are HEALTHY
    #[must_use]
    pub fn health(&self, instance_id: &str) -> BackendHealth {
        self.health.get(instance_id).copied().unwrap_or_default()
    }

    /// Whether the last GPU poll succeeded
    #[must_use]
    pub fn gpu_telemetry_ok(&self) -> bool {
        self.gpu_telemetry_ok
    }
}

/// Outcome of a dispatch, reported to the monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthSignal {
    /// Call succeeded
    Success(String),
    /// Call failed
    Failure(String),
    /// Backend could not be reached at all
    HardFailure(String),
}

/// Sending half of the health signal channel
#[derive(Debug, Clone)]
pub struct HealthReporter {
    tx: mpsc::UnboundedSender<HealthSignal>,
}

impl HealthReporter {
    /// Reporter whose signals go nowhere
    #[must_use]
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// Report a successful call
    pub fn report_success(&self, instance_id: &str) {
        let _ = self.tx.send(HealthSignal::Success(instance_id.to_string()));
    }

    /// Report a failed call
    pub fn report_failure(&self, instance_id: &str, error: &BackendError) {
        let signal = if error.is_hard_failure() {
            HealthSignal::HardFailure(instance_id.to_string())
        } else {
            HealthSignal::Failure(instance_id.to_string())
        };
        let _ = self.tx.send(signal);
    }
}

#[derive(Debug, Default)]
struct HealthTracker {
    health: HashMap<String, BackendHealth>,
    failures: HashMap<String, u32>,
}

impl HealthTracker {
    /// Apply a signal; returns whether health changed
    fn apply(&mut self, signal: &HealthSignal, threshold: u32) -> bool {
        match signal {
            HealthSignal::Success(id) => {
                self.failures.remove(id);
                false
            }
            HealthSignal::Failure(id) => {
                let count = self.failures.entry(id.clone()).or_insert(0);
                *count += 1;
                let current = self.health.get(id).copied().unwrap_or_default();
                if *count >= threshold.max(1) && current == BackendHealth::Healthy {
                    self.health.insert(id.clone(), BackendHealth::Degraded);
                    return true;
                }
                false
            }
            HealthSignal::HardFailure(id) => {
                *self.failures.entry(id.clone()).or_insert(0) += 1;
                self.health.insert(id.clone(), BackendHealth::Unavailable) != Some(BackendHealth::Unavailable)
            }
        }
    }

    fn restore(&mut self, id: &str) -> bool {
        self.failures.remove(id);
        matches!(
            self.health.remove(id),
            Some(BackendHealth::Degraded | BackendHealth::Unavailable)
        )
    }

    fn unhealthy(&self) -> Vec<String> {
        self.health
            .iter()
            .filter(|(_, h)| **h != BackendHealth::Healthy)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
struct WriterState {
    version: u64,
    gpus: HashMap<u32, GpuMetrics>,
    gpu_telemetry_ok: bool,
    tracker: HealthTracker,
}

/// Single writer of the fleet snapshot
pub struct FleetMonitor {
    config: MonitorConfig,
    registry: Arc<BackendRegistry>,
    source: Arc<dyn GpuMetricsSource>,
    prober: Arc<dyn InferenceBackend>,
    metrics: Option<Metrics>,
    snapshot: ArcSwap<FleetSnapshot>,
    state: Mutex<WriterState>,
    reporter: HealthReporter,
    signals: Mutex<Option<mpsc::UnboundedReceiver<HealthSignal>>>,
}

impl std::fmt::Debug for FleetMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetMonitor")
            .field("config", &self.config)
            .field("source", &self.source.name())
            .finish_non_exhaustive()
    }
}

impl FleetMonitor {
    /// Create a monitor
    #[must_use]
    pub fn new(
        config: MonitorConfig,
        registry: Arc<BackendRegistry>,
        source: Arc<dyn GpuMetricsSource>,
        prober: Arc<dyn InferenceBackend>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            registry,
            source,
            prober,
            metrics: None,
            snapshot: ArcSwap::from_pointee(FleetSnapshot::default()),
            state: Mutex::new(WriterState::default()),
            reporter: HealthReporter { tx },
            signals: Mutex::new(Some(rx)),
        }
    }

    /// Mirror GPU readings into Prometheus
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Handle used by the router to report dispatch outcomes
    #[must_use]
    pub fn reporter(&self) -> HealthReporter {
        self.reporter.clone()
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<FleetSnapshot> {
        self.snapshot.load_full()
    }

    fn publish(&self, state: &mut WriterState) {
        state.version += 1;
        self.snapshot.store(Arc::new(FleetSnapshot {
            version: state.version,
            gpus: state.gpus.clone(),
            health: state.tracker.health.clone(),
            gpu_telemetry_ok: state.gpu_telemetry_ok,
            updated_at: Some(Utc::now()),
        }));
    }

    /// Poll the GPU source and publish the readings.
    ///
    /// On failure the previous readings stay in place and the snapshot is
    /// flagged as stale.
    pub async fn refresh_gpus(&self) {
        let readings = self.source.get_gpu_metrics().await;
        let mut state = self.state.lock();
        match readings {
            Ok(gpus) => {
                if let Some(metrics) = &self.metrics {
                    gpus.iter().for_each(|g| metrics.record_gpu(g));
                }
                state.gpus = gpus.into_iter().map(|g| (g.gpu_id, g)).collect();
                state.gpu_telemetry_ok = true;
            }
            Err(error) => {
                if state.gpu_telemetry_ok {
                    warn!(source = self.source.name(), error = %error, "GPU metrics poll failed");
                }
                state.gpu_telemetry_ok = false;
            }
        }
        self.publish(&mut state);
    }

    /// Apply one dispatch outcome
    pub fn apply_signal(&self, signal: &HealthSignal) {
        let mut state = self.state.lock();
        if state.tracker.apply(signal, self.config.degraded_after_failures) {
            let (HealthSignal::Success(id) | HealthSignal::Failure(id) | HealthSignal::HardFailure(id)) =
                signal;
            let health = state.tracker.health.get(id).copied().unwrap_or_default();
            warn!(backend = %id, health = %health, "Backend health changed");
            self.publish(&mut state);
        }
    }

    /// Probe every non-HEALTHY instance and restore the ones that answer
    pub async fn probe_unhealthy(&self) {
        let unhealthy = self.state.lock().tracker.unhealthy();
        if unhealthy.is_empty() {
            return;
        }

        let registry = self.registry.snapshot();
        for id in unhealthy {
            let Some(instance) = registry.instance(&id) else {
                // Instance left the registry; forget it
                let mut state = self.state.lock();
                state.tracker.restore(&id);
                self.publish(&mut state);
                continue;
            };

            match self.prober.probe(&instance.target()).await {
                Ok(()) => {
                    let mut state = self.state.lock();
                    if state.tracker.restore(&id) {
                        info!(backend = %id, "Backend restored to HEALTHY");
                        self.publish(&mut state);
                    }
                }
                Err(error) => debug!(backend = %id, error = %error, "Health probe failed"),
            }
        }
    }

    /// Run the writer loop until `shutdown` fires
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let Some(mut signals) = self.signals.lock().take() else {
            warn!("Fleet monitor already running");
            return;
        };

        let mut poll = tokio::time::interval(self.config.poll_interval);
        let mut probe = tokio::time::interval(self.config.probe_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            probe_interval_ms = self.config.probe_interval.as_millis() as u64,
            source = self.source.name(),
            "Fleet monitor started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = poll.tick() => self.refresh_gpus().await,
                _ = probe.tick() => self.probe_unhealthy().await,
                Some(signal) = signals.recv() => self.apply_signal(&signal),
            }
        }

        info!("Fleet monitor stopped");
    }

    /// Spawn the writer loop
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(shutdown))
    }
}

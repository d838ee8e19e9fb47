//! GPU-aware load balancer.
//!
//! Picks the least-loaded HEALTHY instance of a model whose GPU is inside
//! the configured safety thresholds and which still has a free concurrency
//! slot. Selection and the in-flight increment happen under one lock, and the
//! returned [`InstanceLease`] gives the slot back when dropped, so two callers
//! can never both take the last slot of an instance.

use gateway_core::{BackendHealth, BackendInstance, BackendRegistry};
use gateway_telemetry::{FleetMonitor, FleetSnapshot, Metrics};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Admission thresholds
#[derive(Debug, Clone)]
pub struct LoadBalancerConfig {
    /// GPUs above this memory usage are not assigned new work
    pub max_memory_percent: f64,
    /// GPUs above this temperature are not assigned new work
    pub critical_temperature_celsius: f64,
    /// Optional utilization cap
    pub max_utilization_percent: Option<f64>,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            max_memory_percent: 95.0,
            critical_temperature_celsius: 85.0,
            max_utilization_percent: None,
        }
    }
}

/// Why no instance could be assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureReason {
    /// No instance serves the model
    NoInstances,
    /// Every instance is DEGRADED or UNAVAILABLE
    NoHealthyInstances,
    /// Every healthy instance sits on a GPU over its thresholds
    GpuThreshold,
    /// Every compliant instance is at `max_concurrency`
    AtCapacity,
}

/// No capacity right now. Not an error: the caller keeps the work queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backpressure {
    /// Requested model
    pub model: String,
    /// Reason
    pub reason: BackpressureReason,
}

impl fmt::Display for Backpressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no capacity for model {} ({:?})", self.model, self.reason)
    }
}

#[derive(Debug, Default)]
struct Ledger {
    instances: HashMap<String, u32>,
    gpus: HashMap<u32, u32>,
}

#[derive(Debug)]
struct SharedLedger {
    ledger: Mutex<Ledger>,
    metrics: Option<Metrics>,
}

impl SharedLedger {
    fn release(&self, instance: &BackendInstance) {
        let mut ledger = self.ledger.lock();
        let remaining = match ledger.instances.get_mut(&instance.id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if let Some(count) = ledger.gpus.get_mut(&instance.gpu_id) {
            *count = count.saturating_sub(1);
        }
        drop(ledger);
        if let Some(metrics) = &self.metrics {
            metrics.set_backend_inflight(&instance.id, remaining);
        }
    }
}

/// One reserved concurrency slot on an instance
pub struct InstanceLease {
    instance: Arc<BackendInstance>,
    ledger: Arc<SharedLedger>,
}

impl InstanceLease {
    /// The leased instance
    #[must_use]
    pub fn instance(&self) -> &Arc<BackendInstance> {
        &self.instance
    }

    /// Id of the leased instance
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance.id
    }
}

impl fmt::Debug for InstanceLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceLease")
            .field("instance", &self.instance.id)
            .field("gpu", &self.instance.gpu_id)
            .finish()
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        self.ledger.release(&self.instance);
        trace!(backend = %self.instance.id, "Instance lease released");
    }
}

/// In-flight counts
#[derive(Debug, Clone, Default, Serialize)]
pub struct InflightSnapshot {
    /// Per instance
    pub instances: HashMap<String, u32>,
    /// Aggregate across co-resident instances, per GPU
    pub gpus: HashMap<u32, u32>,
}

/// GPU-aware load balancer
#[derive(Debug)]
pub struct LoadBalancer {
    config: LoadBalancerConfig,
    registry: Arc<BackendRegistry>,
    monitor: Arc<FleetMonitor>,
    ledger: Arc<SharedLedger>,
}

impl LoadBalancer {
    /// Create a load balancer
    #[must_use]
    pub fn new(
        config: LoadBalancerConfig,
        registry: Arc<BackendRegistry>,
        monitor: Arc<FleetMonitor>,
    ) -> Self {
        Self {
            config,
            registry,
            monitor,
            ledger: Arc::new(SharedLedger {
                ledger: Mutex::new(Ledger::default()),
                metrics: None,
            }),
        }
    }

    /// Mirror in-flight counts into Prometheus
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.ledger = Arc::new(SharedLedger {
            ledger: Mutex::new(Ledger::default()),
            metrics: Some(metrics),
        });
        self
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &LoadBalancerConfig {
        &self.config
    }

    /// Whether a GPU reading is inside the safety thresholds.
    /// A GPU without a reading is treated as compliant.
    fn gpu_compliant(&self, fleet: &FleetSnapshot, gpu_id: u32) -> bool {
        let Some(gpu) = fleet.gpu(gpu_id) else {
            return true;
        };
        if gpu.memory_percent() > self.config.max_memory_percent {
            return false;
        }
        if gpu.temperature_celsius > self.config.critical_temperature_celsius {
            return false;
        }
        self.config
            .max_utilization_percent
            .map_or(true, |cap| gpu.utilization_percent <= cap)
    }

    fn choose(
        &self,
        model: &str,
        exclude: &[String],
        ledger: &Ledger,
    ) -> Result<Arc<BackendInstance>, Backpressure> {
        let backpressure = |reason| Backpressure {
            model: model.to_string(),
            reason,
        };

        let registry = self.registry.snapshot();
        let fleet = self.monitor.snapshot();

        let instances: Vec<_> = registry
            .instances_for_model(model)
            .into_iter()
            .filter(|i| !exclude.contains(&i.id))
            .collect();
        if instances.is_empty() {
            return Err(backpressure(BackpressureReason::NoInstances));
        }

        let healthy: Vec<_> = instances
            .into_iter()
            .filter(|i| fleet.health(&i.id) == BackendHealth::Healthy)
            .collect();
        if healthy.is_empty() {
            return Err(backpressure(BackpressureReason::NoHealthyInstances));
        }

        let compliant: Vec<_> = healthy
            .into_iter()
            .filter(|i| self.gpu_compliant(&fleet, i.gpu_id))
            .collect();
        if compliant.is_empty() {
            return Err(backpressure(BackpressureReason::GpuThreshold));
        }

        let inflight = |id: &str| ledger.instances.get(id).copied().unwrap_or(0);
        let utilization = |gpu_id: u32| fleet.gpu(gpu_id).map_or(0.0, |g| g.utilization_percent);

        compliant
            .into_iter()
            .filter(|i| inflight(&i.id) < i.max_concurrency)
            .min_by(|a, b| {
                inflight(&a.id)
                    .cmp(&inflight(&b.id))
                    .then_with(|| utilization(a.gpu_id).total_cmp(&utilization(b.gpu_id)))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .ok_or_else(|| backpressure(BackpressureReason::AtCapacity))
    }

    /// Reserve a slot on the best instance serving `model`
    ///
    /// # Errors
    /// Returns [`Backpressure`] when no instance can take more work
    pub fn select_instance(&self, model: &str) -> Result<InstanceLease, Backpressure> {
        self.select_excluding(model, &[])
    }

    /// Like [`select_instance`](Self::select_instance), skipping `exclude`
    ///
    /// # Errors
    /// Returns [`Backpressure`] when no instance can take more work
    pub fn select_excluding(
        &self,
        model: &str,
        exclude: &[String],
    ) -> Result<InstanceLease, Backpressure> {
        let mut ledger = self.ledger.ledger.lock();
        let instance = self.choose(model, exclude, &ledger).map_err(|bp| {
            debug!(model = %model, reason = ?bp.reason, "Load balancer backpressure");
            bp
        })?;

        let count = ledger.instances.entry(instance.id.clone()).or_insert(0);
        *count += 1;
        let inflight = *count;
        *ledger.gpus.entry(instance.gpu_id).or_insert(0) += 1;
        drop(ledger);

        if let Some(metrics) = &self.ledger.metrics {
            metrics.set_backend_inflight(&instance.id, inflight);
        }
        debug!(model = %model, backend = %instance.id, gpu = instance.gpu_id, inflight, "Instance selected");

        Ok(InstanceLease {
            instance,
            ledger: Arc::clone(&self.ledger),
        })
    }

    /// Whether `select_instance(model)` would currently succeed
    #[must_use]
    pub fn has_capacity(&self, model: &str) -> bool {
        let ledger = self.ledger.ledger.lock();
        self.choose(model, &[], &ledger).is_ok()
    }

    /// Current in-flight counts
    #[must_use]
    pub fn inflight(&self) -> InflightSnapshot {
        let ledger = self.ledger.ledger.lock();
        InflightSnapshot {
            instances: ledger.instances.clone(),
            gpus: ledger.gpus.clone(),
        }
    }

    /// Fleet snapshot the balancer is reading
    #[must_use]
    pub fn fleet(&self) -> Arc<FleetSnapshot> {
        self.monitor.snapshot()
    }
}

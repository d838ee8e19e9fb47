//! Shared handler state.

use crate::health::FleetView;
use crate::shutdown::{ShutdownConfig, ShutdownCoordinator};
use gateway_core::{BackendRegistry, GatewayError, GatewayResult};
use gateway_orchestrator::Orchestrator;
use gateway_routing::LoadBalancer;
use gateway_scheduler::Scheduler;
use gateway_telemetry::Metrics;
use std::sync::Arc;
use std::time::Instant;

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    /// Task scheduler
    pub scheduler: Scheduler,
    /// Workflow orchestrator
    pub orchestrator: Arc<Orchestrator>,
    /// Routing tables
    pub registry: Arc<BackendRegistry>,
    /// Load balancer, for fleet health
    pub balancer: Arc<LoadBalancer>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Shutdown coordination
    pub shutdown: Arc<ShutdownCoordinator>,
    started_at: Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("scheduler", &self.scheduler)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Create a new builder
    #[must_use]
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::default()
    }

    /// Time since the state was built
    #[must_use]
    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Capture the inputs for health and readiness
    #[must_use]
    pub fn fleet_view(&self) -> FleetView {
        let registry = self.registry.snapshot();
        let fleet = self.balancer.fleet();
        let instances = registry
            .instances()
            .iter()
            .map(|i| (i.id.clone(), fleet.health(&i.id)))
            .collect();
        FleetView {
            shutting_down: self.shutdown.is_shutting_down(),
            agents: registry.agent_types().len(),
            instances,
            external_backends: registry
                .external_backends()
                .iter()
                .filter(|b| b.enabled)
                .count(),
            gpu_telemetry_ok: fleet.gpu_telemetry_ok(),
            gpus: fleet.gpus().len(),
            queue_depth: self.scheduler.queue_depth(),
            queue_capacity: self.scheduler.config().queue_max_depth,
            running_workflows: self.orchestrator.running(),
        }
    }
}

/// Builder for [`AppState`]
#[derive(Default)]
pub struct AppStateBuilder {
    scheduler: Option<Scheduler>,
    orchestrator: Option<Arc<Orchestrator>>,
    registry: Option<Arc<BackendRegistry>>,
    balancer: Option<Arc<LoadBalancer>>,
    metrics: Option<Metrics>,
    shutdown: Option<Arc<ShutdownCoordinator>>,
}

impl AppStateBuilder {
    /// Set the scheduler
    #[must_use]
    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Set the orchestrator
    #[must_use]
    pub fn orchestrator(mut self, orchestrator: Arc<Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Set the registry
    #[must_use]
    pub fn registry(mut self, registry: Arc<BackendRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the load balancer
    #[must_use]
    pub fn balancer(mut self, balancer: Arc<LoadBalancer>) -> Self {
        self.balancer = Some(balancer);
        self
    }

    /// Set the metrics handle
    #[must_use]
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the shutdown coordinator
    #[must_use]
    pub fn shutdown(mut self, shutdown: Arc<ShutdownCoordinator>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Build the state.
    ///
    /// # Errors
    /// Returns [`GatewayError::Configuration`] naming the first missing
    /// component, or if a default metrics registry cannot be created
    pub fn build(self) -> GatewayResult<AppState> {
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Metrics::new().map_err(|e| GatewayError::configuration(e.to_string()))?,
        };
        Ok(AppState {
            scheduler: self.scheduler.ok_or_else(|| missing("scheduler"))?,
            orchestrator: self.orchestrator.ok_or_else(|| missing("orchestrator"))?,
            registry: self.registry.ok_or_else(|| missing("registry"))?,
            balancer: self.balancer.ok_or_else(|| missing("balancer"))?,
            metrics,
            shutdown: self
                .shutdown
                .unwrap_or_else(|| Arc::new(ShutdownCoordinator::new(ShutdownConfig::default()))),
            started_at: Instant::now(),
        })
    }
}

fn missing(component: &str) -> GatewayError {
    GatewayError::configuration(format!("AppState requires a {component}"))
}

//! Health and readiness reporting.
//!
//! `/health` aggregates per-component checks into an overall status and a
//! score; `/ready` answers whether the gateway can accept work right now.
//! Both are computed from a [`FleetView`] captured from the live components,
//! so the rules here stay independent of how that state is gathered.

use gateway_core::BackendHealth;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Queue fill ratio above which the scheduler reports degraded
const QUEUE_PRESSURE_RATIO: f64 = 0.9;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully healthy
    Healthy,
    /// Degraded but operational
    Degraded,
    /// Unhealthy
    Unhealthy,
}

impl HealthStatus {
    /// Check if status represents an operational state
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    /// Get HTTP status code for this health status
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Healthy | Self::Degraded => 200,
            Self::Unhealthy => 503,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Error message if not healthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Additional details
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
}

impl ComponentHealth {
    fn new(name: &str, status: HealthStatus, error: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            error,
            details: HashMap::new(),
        }
    }

    /// Create a healthy component
    #[must_use]
    pub fn healthy(name: &str) -> Self {
        Self::new(name, HealthStatus::Healthy, None)
    }

    /// Create a degraded component
    #[must_use]
    pub fn degraded(name: &str, error: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Degraded, Some(error.into()))
    }

    /// Create an unhealthy component
    #[must_use]
    pub fn unhealthy(name: &str, error: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Unhealthy, Some(error.into()))
    }

    /// Add detail
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(json_value) = serde_json::to_value(value) {
            self.details.insert(key.into(), json_value);
        }
        self
    }
}

/// Aggregated health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status
    pub status: HealthStatus,
    /// Service version
    pub version: String,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Per-component results
    pub components: Vec<ComponentHealth>,
    /// Share of healthy components (0-100)
    pub health_score: u8,
    /// Timestamp
    pub timestamp: String,
}

impl HealthResponse {
    /// Aggregate component results
    #[must_use]
    pub fn from_components(components: Vec<ComponentHealth>, uptime: Duration) -> Self {
        let total = components.len().max(1);
        let healthy = components
            .iter()
            .filter(|c| c.status == HealthStatus::Healthy)
            .count();
        let status = if components.iter().any(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if healthy == components.len() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        Self {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
            health_score: u8::try_from(healthy * 100 / total).unwrap_or(100),
            components,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Ready status
    pub ready: bool,
    /// Reason if not ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Routed agent types
    pub agents: usize,
    /// Local instances
    pub instances: usize,
    /// Local instances currently HEALTHY
    pub healthy_instances: usize,
    /// Enabled external backends
    pub external_backends: usize,
}

/// Point-in-time view of the components health is computed from
#[derive(Debug, Clone, Default)]
pub struct FleetView {
    /// Shutdown in progress
    pub shutting_down: bool,
    /// Routed agent types
    pub agents: usize,
    /// Health of each local instance
    pub instances: Vec<(String, BackendHealth)>,
    /// Enabled external backends
    pub external_backends: usize,
    /// Whether the last GPU poll succeeded
    pub gpu_telemetry_ok: bool,
    /// GPUs reported by the last poll
    pub gpus: usize,
    /// QUEUED tasks
    pub queue_depth: usize,
    /// Queue cap
    pub queue_capacity: usize,
    /// Running workflows
    pub running_workflows: usize,
}

impl FleetView {
    fn healthy_instances(&self) -> usize {
        self.instances
            .iter()
            .filter(|(_, h)| *h == BackendHealth::Healthy)
            .count()
    }

    /// Readiness: accepting requests with at least one usable backend
    #[must_use]
    pub fn readiness(&self) -> ReadinessResponse {
        let healthy = self.healthy_instances();
        let reason = if self.shutting_down {
            Some("shutting down".to_string())
        } else if self.agents == 0 {
            Some("no agent types configured".to_string())
        } else if healthy == 0 && self.external_backends == 0 {
            Some("no healthy backend instances".to_string())
        } else {
            None
        };
        ReadinessResponse {
            ready: reason.is_none(),
            reason,
            agents: self.agents,
            instances: self.instances.len(),
            healthy_instances: healthy,
            external_backends: self.external_backends,
        }
    }

    /// Per-component health
    #[must_use]
    pub fn components(&self) -> Vec<ComponentHealth> {
        vec![
            self.scheduler_health(),
            self.backend_health(),
            self.gpu_health(),
            ComponentHealth::healthy("orchestrator")
                .with_detail("running_workflows", self.running_workflows),
        ]
    }

    fn scheduler_health(&self) -> ComponentHealth {
        #[allow(clippy::cast_precision_loss)]
        let fill = if self.queue_capacity == 0 {
            0.0
        } else {
            self.queue_depth as f64 / self.queue_capacity as f64
        };
        let component = if self.shutting_down {
            ComponentHealth::unhealthy("scheduler", "dispatcher stopping")
        } else if fill >= QUEUE_PRESSURE_RATIO {
            ComponentHealth::degraded("scheduler", "queue near capacity")
        } else {
            ComponentHealth::healthy("scheduler")
        };
        component
            .with_detail("queue_depth", self.queue_depth)
            .with_detail("queue_capacity", self.queue_capacity)
    }

    fn backend_health(&self) -> ComponentHealth {
        let healthy = self.healthy_instances();
        let total = self.instances.len();
        let unhealthy: HashMap<&str, BackendHealth> = self
            .instances
            .iter()
            .filter(|(_, h)| *h != BackendHealth::Healthy)
            .map(|(id, h)| (id.as_str(), *h))
            .collect();
        let component = if total > 0 && healthy == 0 && self.external_backends == 0 {
            ComponentHealth::unhealthy("backends", "no healthy backend instances")
        } else if healthy < total {
            ComponentHealth::degraded("backends", format!("{} of {total} instances excluded", total - healthy))
        } else {
            ComponentHealth::healthy("backends")
        };
        component
            .with_detail("instances", total)
            .with_detail("healthy_instances", healthy)
            .with_detail("external_backends", self.external_backends)
            .with_detail("excluded", unhealthy)
    }

    fn gpu_health(&self) -> ComponentHealth {
        let component = if self.instances.is_empty() || self.gpu_telemetry_ok {
            ComponentHealth::healthy("gpu_telemetry")
        } else {
            ComponentHealth::degraded("gpu_telemetry", "last GPU poll failed")
        };
        component.with_detail("gpus", self.gpus)
    }
}

//! Configuration schema.
//!
//! Every section has defaults, so an empty file (or no file) yields a gateway
//! with no backends that still starts and serves health endpoints. Durations
//! use humantime notation (`250ms`, `5s`, `2m`).

use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// HTTP listener
    #[validate(nested)]
    pub server: ServerSection,

    /// Log output
    #[validate(nested)]
    pub logging: LoggingSection,

    /// Task scheduler
    #[validate(nested)]
    pub scheduler: SchedulerSection,

    /// Backend router
    #[validate(nested)]
    pub router: RouterSection,

    /// GPU admission thresholds
    #[validate(nested)]
    pub load_balancer: LoadBalancerSection,

    /// GPU polling and health probing
    #[validate(nested)]
    pub telemetry: TelemetrySection,

    /// Workflow orchestrator
    pub orchestrator: OrchestratorSection,

    /// Local model-serving instances
    #[validate(nested)]
    pub backends: Vec<BackendConfig>,

    /// Hosted API backends
    #[validate(nested)]
    pub external_backends: Vec<ExternalBackendConfig>,

    /// Agent type routing table
    #[validate(nested)]
    pub agents: Vec<AgentConfig>,
}

/// HTTP listener
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    /// Bind address
    #[validate(length(min = 1))]
    pub host: String,

    /// Bind port
    #[validate(range(min = 1))]
    pub port: u16,

    /// Upper bound on any request, including synchronous workflow execution
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Time allowed for in-flight requests after a shutdown signal
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(360),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatConfig {
    /// Human readable
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

/// Log output
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    /// Default filter directive when `RUST_LOG` is unset
    #[validate(length(min = 1))]
    pub level: String,

    /// Output format
    pub format: LogFormatConfig,

    /// Deployment environment label
    pub environment: String,

    /// Attach an OpenTelemetry layer
    pub otel_enabled: bool,

    /// Trace sampling ratio
    #[validate(range(min = 0.0, max = 1.0))]
    pub sampling_rate: f64,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormatConfig::Pretty,
            environment: "development".to_string(),
            otel_enabled: false,
            sampling_rate: 1.0,
        }
    }
}

/// Task scheduler
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSection {
    /// Maximum QUEUED tasks
    #[validate(range(min = 1))]
    pub queue_max_depth: usize,

    /// Maximum tasks per batch group
    #[validate(range(min = 1, max = 1024))]
    pub batch_size: usize,

    /// Maximum time a batch group stays open
    #[serde(with = "humantime_serde")]
    pub batch_timeout: Duration,

    /// Waiting time before a task is promoted one priority level
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,

    /// How long terminal tasks stay queryable
    #[serde(with = "humantime_serde")]
    pub result_ttl: Duration,

    /// Timeout for submissions that carry none
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Dispatcher tick
    #[serde(with = "humantime_serde")]
    pub dispatch_interval: Duration,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            queue_max_depth: 1024,
            batch_size: 4,
            batch_timeout: Duration::from_millis(20),
            max_wait: Duration::from_secs(5),
            result_ttl: Duration::from_secs(300),
            default_timeout: Duration::from_secs(60),
            dispatch_interval: Duration::from_millis(5),
        }
    }
}

/// Backend router
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct RouterSection {
    /// Retries per candidate after the first attempt
    #[validate(range(max = 10))]
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Cap on any single retry delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Backoff multiplier
    #[validate(range(min = 1.0, max = 10.0))]
    pub multiplier: f64,

    /// Jitter factor
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter: f64,

    /// Bound on one backend call
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
            jitter: 0.0,
            call_timeout: Duration::from_secs(120),
        }
    }
}

/// GPU admission thresholds
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct LoadBalancerSection {
    /// GPUs above this memory usage get no new work
    #[validate(range(min = 1.0, max = 100.0))]
    pub max_memory_percent: f64,

    /// GPUs above this temperature get no new work
    #[validate(range(min = 1.0, max = 150.0))]
    pub critical_temperature_celsius: f64,

    /// Optional utilization cap
    #[validate(range(min = 1.0, max = 100.0))]
    pub max_utilization_percent: Option<f64>,
}

impl Default for LoadBalancerSection {
    fn default() -> Self {
        Self {
            max_memory_percent: 95.0,
            critical_temperature_celsius: 85.0,
            max_utilization_percent: None,
        }
    }
}

/// Where GPU readings come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuSourceKind {
    /// Query `nvidia-smi`
    #[default]
    NvidiaSmi,
    /// Serve `static_gpus`
    Static,
}

/// Fixed GPU reading
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct StaticGpuConfig {
    /// GPU index
    pub gpu_id: u32,
    /// Memory in use (MiB)
    pub memory_used_mb: u64,
    /// Total memory (MiB)
    #[validate(range(min = 1))]
    pub memory_total_mb: u64,
    /// Utilization (0-100)
    #[serde(default)]
    #[validate(range(min = 0.0, max = 100.0))]
    pub utilization_percent: f64,
    /// Temperature
    #[serde(default)]
    pub temperature_celsius: f64,
}

/// GPU polling and health probing
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetrySection {
    /// Reading source
    pub gpu_source: GpuSourceKind,

    /// `nvidia-smi` binary
    pub nvidia_smi_path: String,

    /// GPU poll interval
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Probe interval for non-HEALTHY instances
    #[serde(with = "humantime_serde")]
    pub probe_interval: Duration,

    /// Consecutive call failures before an instance is DEGRADED
    #[validate(range(min = 1))]
    pub degraded_after_failures: u32,

    /// Readings served by the static source
    #[validate(nested)]
    pub static_gpus: Vec<StaticGpuConfig>,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            gpu_source: GpuSourceKind::NvidiaSmi,
            nvidia_smi_path: "nvidia-smi".to_string(),
            poll_interval: Duration::from_secs(2),
            probe_interval: Duration::from_secs(10),
            degraded_after_failures: 3,
            static_gpus: Vec::new(),
        }
    }
}

/// Workflow orchestrator
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorSection {
    /// Deadline for workflows that set none
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// How long finished workflows stay readable
    #[serde(with = "humantime_serde")]
    pub result_ttl: Duration,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(300),
            result_ttl: Duration::from_secs(300),
        }
    }
}

/// How a backend authenticates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// No credential
    #[default]
    None,
    /// `Authorization: Bearer`
    Bearer,
    /// Custom header
    Header,
}

/// Backend credential.
///
/// The secret is either inline (`value`) or read from `credential_env` at
/// load time.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialConfig {
    /// Credential kind
    #[serde(rename = "type")]
    pub kind: CredentialKind,
    /// Header name for `header` credentials
    pub header: Option<String>,
    /// Inline secret
    pub value: Option<SecretString>,
    /// Environment variable holding the secret
    pub credential_env: Option<String>,
}

/// Local model-serving instance
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Instance id
    #[validate(length(min = 1))]
    pub id: String,

    /// Model served
    #[validate(length(min = 1))]
    pub model: String,

    /// OpenAI-compatible base URL
    #[validate(custom(function = "validate_base_url"))]
    pub base_url: String,

    /// Owning GPU
    pub gpu_id: u32,

    /// Concurrent request limit
    #[validate(range(min = 1, max = 4096))]
    pub max_concurrency: u32,

    /// Latency tier
    #[serde(default)]
    pub latency_tier: gateway_core::LatencyTier,

    /// Credential
    #[serde(default)]
    pub credential: CredentialConfig,
}

/// Hosted API backend
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ExternalBackendConfig {
    /// Backend id
    #[validate(length(min = 1))]
    pub id: String,

    /// Model requested from the API
    #[validate(length(min = 1))]
    pub model: String,

    /// API base URL
    #[validate(custom(function = "validate_base_url"))]
    pub base_url: String,

    /// Whether routing may use it
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Concurrent request limit
    #[serde(default = "default_external_concurrency")]
    #[validate(range(min = 1, max = 4096))]
    pub max_concurrency: u32,

    /// Credential
    #[serde(default)]
    pub credential: CredentialConfig,
}

/// Agent type routing entry
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Agent type key
    #[validate(length(min = 1))]
    pub agent_type: String,

    /// Preferred local model
    #[serde(default)]
    pub model: Option<String>,

    /// External backends tried before the local model, in order
    #[serde(default)]
    pub external: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_external_concurrency() -> u32 {
    8
}

fn validate_base_url(value: &str) -> Result<(), ValidationError> {
    match url::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ValidationError::new("base_url")
            .with_message(format!("{value} is not an http(s) URL").into())),
    }
}

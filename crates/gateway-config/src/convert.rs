//! Conversions from the file schema into component configuration.

use crate::error::{ConfigError, ConfigResult};
use crate::model::{
    CredentialConfig, CredentialKind, GatewayConfig, GpuSourceKind, LogFormatConfig,
};
use gateway_core::{AgentRoute, BackendInstance, Credential, ExternalBackend, RegistrySnapshot};
use gateway_orchestrator::OrchestratorConfig;
use gateway_resilience::RetryConfig;
use gateway_routing::{LoadBalancerConfig, RouterConfig};
use gateway_scheduler::SchedulerConfig;
use gateway_telemetry::{
    GpuMetrics, GpuMetricsSource, LogFormat, MonitorConfig, NvidiaSmiSource, StaticGpuSource,
    TracingConfig,
};
use secrecy::SecretString;
use std::sync::Arc;

impl CredentialConfig {
    /// Resolve the secret, reading `credential_env` through `lookup`.
    ///
    /// # Errors
    /// Fails when the secret is missing or a header credential has no name
    pub fn resolve(&self, lookup: &dyn Fn(&str) -> Option<String>) -> ConfigResult<Credential> {
        if self.kind == CredentialKind::None {
            return Ok(Credential::None);
        }
        let secret = match (&self.value, &self.credential_env) {
            (Some(value), _) => value.clone(),
            (None, Some(var)) => {
                SecretString::new(lookup(var).ok_or_else(|| ConfigError::Environment {
                    var: var.clone(),
                    message: "credential variable is not set".to_string(),
                })?)
            }
            (None, None) => {
                return Err(ConfigError::Validation(
                    "credential needs either value or credential_env".to_string(),
                ))
            }
        };
        match self.kind {
            CredentialKind::Bearer => Ok(Credential::Bearer { token: secret }),
            CredentialKind::Header => {
                let name = self
                    .header
                    .clone()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| {
                        ConfigError::Validation("header credential needs a header name".to_string())
                    })?;
                Ok(Credential::Header {
                    name,
                    value: secret,
                })
            }
            CredentialKind::None => Ok(Credential::None),
        }
    }
}

impl GatewayConfig {
    /// Build the routing registry, reading credentials from the process
    /// environment.
    ///
    /// # Errors
    /// Fails on unresolvable credentials or an inconsistent routing table
    pub fn to_registry_snapshot(&self) -> ConfigResult<RegistrySnapshot> {
        self.to_registry_snapshot_with(&|var: &str| std::env::var(var).ok())
    }

    /// Build the routing registry with an explicit variable lookup
    ///
    /// # Errors
    /// Same as [`GatewayConfig::to_registry_snapshot`]
    pub fn to_registry_snapshot_with(
        &self,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> ConfigResult<RegistrySnapshot> {
        let mut builder = RegistrySnapshot::builder();
        for backend in &self.backends {
            builder = builder.instance(BackendInstance {
                id: backend.id.clone(),
                model_name: backend.model.clone(),
                base_url: backend.base_url.clone(),
                gpu_id: backend.gpu_id,
                max_concurrency: backend.max_concurrency,
                latency_tier: backend.latency_tier,
                credential: backend.credential.resolve(lookup)?,
            });
        }
        for backend in &self.external_backends {
            builder = builder.external(ExternalBackend {
                id: backend.id.clone(),
                model_name: backend.model.clone(),
                base_url: backend.base_url.clone(),
                enabled: backend.enabled,
                max_concurrency: backend.max_concurrency,
                credential: backend.credential.resolve(lookup)?,
            });
        }
        for agent in &self.agents {
            builder = builder.agent(AgentRoute {
                agent_type: agent.agent_type.clone(),
                model: agent.model.clone(),
                external: agent.external.clone(),
            });
        }
        Ok(builder.build()?)
    }

    /// Scheduler settings
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let section = &self.scheduler;
        SchedulerConfig {
            queue_max_depth: section.queue_max_depth,
            batch_size: section.batch_size,
            batch_timeout: section.batch_timeout,
            max_wait: section.max_wait,
            result_ttl: section.result_ttl,
            default_timeout_seconds: section.default_timeout.as_secs().max(1),
            dispatch_interval: section.dispatch_interval,
        }
    }

    /// Router settings
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        let section = &self.router;
        RouterConfig {
            retry: RetryConfig {
                max_retries: section.max_retries,
                base_delay: section.base_delay,
                max_delay: section.max_delay,
                multiplier: section.multiplier,
                jitter: section.jitter,
            },
            call_timeout: section.call_timeout,
        }
    }

    /// Load balancer thresholds
    #[must_use]
    pub fn load_balancer_config(&self) -> LoadBalancerConfig {
        LoadBalancerConfig {
            max_memory_percent: self.load_balancer.max_memory_percent,
            critical_temperature_celsius: self.load_balancer.critical_temperature_celsius,
            max_utilization_percent: self.load_balancer.max_utilization_percent,
        }
    }

    /// Fleet monitor settings
    #[must_use]
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: self.telemetry.poll_interval,
            probe_interval: self.telemetry.probe_interval,
            degraded_after_failures: self.telemetry.degraded_after_failures,
        }
    }

    /// Orchestrator settings
    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            default_timeout: self.orchestrator.default_timeout,
            result_ttl: self.orchestrator.result_ttl,
        }
    }

    /// Tracing settings for `service_name`
    #[must_use]
    pub fn tracing_config(&self, service_name: &str) -> TracingConfig {
        let format = match self.logging.format {
            LogFormatConfig::Pretty => LogFormat::Pretty,
            LogFormatConfig::Json => LogFormat::Json,
        };
        TracingConfig::new(service_name)
            .with_environment(self.logging.environment.clone())
            .with_otel(self.logging.otel_enabled)
            .with_sampling_rate(self.logging.sampling_rate)
            .with_log_level(self.logging.level.clone())
            .with_format(format)
    }

    /// GPU reading source selected by `telemetry.gpu_source`
    #[must_use]
    pub fn gpu_source(&self) -> Arc<dyn GpuMetricsSource> {
        match self.telemetry.gpu_source {
            GpuSourceKind::NvidiaSmi => Arc::new(
                NvidiaSmiSource::default()
                    .with_binary(self.telemetry.nvidia_smi_path.clone())
                    .with_timeout(self.telemetry.poll_interval),
            ),
            GpuSourceKind::Static => Arc::new(StaticGpuSource::new(
                self.telemetry
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
            )),
        }
    }
}

//! # Gateway Config
//!
//! Configuration for the agent inference gateway.
//!
//! This crate provides:
//! - The YAML/TOML schema with defaults and validation
//! - Environment overrides and credential resolution
//! - Conversion into component configuration and the routing registry
//! - A file watcher that hot-reloads backends and agents

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod convert;
pub mod error;
pub mod loader;
pub mod model;
pub mod watcher;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::{
    config_path, load_config, load_from_path, parse_config, ConfigFormat, CONFIG_PATH_ENV,
};
pub use model::{
    AgentConfig, BackendConfig, CredentialConfig, CredentialKind, ExternalBackendConfig,
    GatewayConfig, GpuSourceKind, LoadBalancerSection, LogFormatConfig, LoggingSection,
    OrchestratorSection, RouterSection, SchedulerSection, ServerSection, StaticGpuConfig,
    TelemetrySection,
};
pub use watcher::{reload, ConfigWatcher};

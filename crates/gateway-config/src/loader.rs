//! Config file loading.
//!
//! Resolution order:
//! 1. `GATEWAY_CONFIG` names the file
//! 2. `config/gateway.yaml`, `config/gateway.yml`, then `config/gateway.toml`
//! 3. Built-in defaults
//!
//! `GATEWAY_HOST`, `GATEWAY_PORT` and `GATEWAY_LOG_LEVEL` override the file.

use crate::error::{ConfigError, ConfigResult};
use crate::model::GatewayConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use validator::Validate;

/// Variable naming the config file
pub const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG";

const DEFAULT_CANDIDATES: &[&str] = &[
    "config/gateway.yaml",
    "config/gateway.yml",
    "config/gateway.toml",
];

/// Config file syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML
    Yaml,
    /// TOML
    Toml,
}

impl ConfigFormat {
    /// Infer the format from a file extension
    ///
    /// # Errors
    /// Returns [`ConfigError::UnsupportedFormat`] for other extensions
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Load the gateway configuration from the environment.
///
/// # Errors
/// Fails when the selected file is unreadable or invalid, or an override
/// variable is malformed.
pub fn load_config() -> ConfigResult<GatewayConfig> {
    let lookup = |var: &str| std::env::var(var).ok();
    let mut config = match locate_config(&lookup) {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            read_config(&path)?
        }
        None => {
            info!("No config file found, using defaults");
            GatewayConfig::default()
        }
    };
    config.apply_overrides(&lookup)?;
    config.check()?;
    Ok(config)
}

/// Load and validate a specific file, applying environment overrides.
///
/// # Errors
/// Fails when the file is unreadable, unparsable or invalid.
pub fn load_from_path(path: &Path) -> ConfigResult<GatewayConfig> {
    let mut config = read_config(path)?;
    config.apply_overrides(&|var: &str| std::env::var(var).ok())?;
    config.check()?;
    info!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

/// Parse configuration text without touching the environment.
///
/// # Errors
/// Fails on syntax errors, unknown keys, or validation failures.
pub fn parse_config(contents: &str, format: ConfigFormat) -> ConfigResult<GatewayConfig> {
    let config = parse(contents, format, Path::new("<inline>"))?;
    config.check()?;
    Ok(config)
}

/// Config file `load_config` would read, if any
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    locate_config(&|var: &str| std::env::var(var).ok())
}

fn locate_config(lookup: &dyn Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(path) = lookup(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    DEFAULT_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.is_file())
}

pub(crate) fn read_config(path: &Path) -> ConfigResult<GatewayConfig> {
    let format = ConfigFormat::from_path(path)?;
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&contents, format, path)
}

fn parse(contents: &str, format: ConfigFormat, path: &Path) -> ConfigResult<GatewayConfig> {
    let parsed = match format {
        ConfigFormat::Yaml if contents.trim().is_empty() => Ok(GatewayConfig::default()),
        ConfigFormat::Yaml => serde_yaml::from_str(contents).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::from_str(contents).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

impl GatewayConfig {
    /// Apply `GATEWAY_HOST`, `GATEWAY_PORT` and `GATEWAY_LOG_LEVEL`.
    ///
    /// # Errors
    /// Returns [`ConfigError::Environment`] when the port is not a number
    pub fn apply_overrides(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(host) = lookup("GATEWAY_HOST") {
            debug!(host = %host, "Host overridden from environment");
            self.server.host = host;
        }
        if let Some(port) = lookup("GATEWAY_PORT") {
            self.server.port = port.parse().map_err(|e| ConfigError::Environment {
                var: "GATEWAY_PORT".to_string(),
                message: format!("{port:?} is not a port: {e}"),
            })?;
        }
        if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Run field validation and cross-section checks.
    ///
    /// # Errors
    /// Returns [`ConfigError::Validation`] or [`ConfigError::Registry`]
    pub fn check(&self) -> ConfigResult<()> {
        self.validate()?;

        if self.router.base_delay > self.router.max_delay {
            return Err(ConfigError::Validation(
                "router.base_delay must not exceed router.max_delay".to_string(),
            ));
        }
        if self.scheduler.default_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "scheduler.default_timeout must be positive".to_string(),
            ));
        }
        if self.orchestrator.default_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "orchestrator.default_timeout must be positive".to_string(),
            ));
        }
        if self.telemetry.gpu_source == crate::model::GpuSourceKind::Static
            && self.telemetry.static_gpus.is_empty()
            && !self.backends.is_empty()
        {
            return Err(ConfigError::Validation(
                "telemetry.static_gpus is empty but local backends are configured".to_string(),
            ));
        }

        // Builds the registry once so dangling references and duplicates
        // fail at load time rather than at first dispatch.
        self.to_registry_snapshot_with(&|_| Some(String::new()))?;
        Ok(())
    }
}

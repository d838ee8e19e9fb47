//! Configuration errors.

use gateway_core::GatewayError;
use std::path::PathBuf;

/// Result alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML/TOML for the schema
    #[error("Failed to parse {path}: {message}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// The file extension is neither YAML nor TOML
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(PathBuf),

    /// A value is out of range or inconsistent
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// An environment variable override or credential is malformed or unset
    #[error("Environment variable {var}: {message}")]
    Environment {
        /// Variable name
        var: String,
        /// What is wrong with it
        message: String,
    },

    /// The backend/agent tables do not form a valid registry
    #[error(transparent)]
    Registry(#[from] GatewayError),

    /// The file watcher could not be started
    #[error("Config watcher error: {0}")]
    Watch(#[from] notify::Error),
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

//! GPU metric sources.
//!
//! [`NvidiaSmiSource`] shells out to `nvidia-smi` and parses its CSV output;
//! [`StaticGpuSource`] serves fixed values for hosts without GPUs and tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::process::Command;

/// Point-in-time readings for one GPU
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpuMetrics {
    /// GPU index
    pub gpu_id: u32,
    /// Memory in use (MiB)
    pub memory_used_mb: u64,
    /// Total memory (MiB)
    pub memory_total_mb: u64,
    /// Compute utilization (0-100)
    pub utilization_percent: f64,
    /// Core temperature
    pub temperature_celsius: f64,
}

impl GpuMetrics {
    /// Memory in use as a percentage of total
    #[must_use]
    pub fn memory_percent(&self) -> f64 {
        if self.memory_total_mb == 0 {
            return 0.0;
        }
        self.memory_used_mb as f64 / self.memory_total_mb as f64 * 100.0
    }
}

/// GPU metric collection error
#[derive(Debug, thiserror::Error)]
pub enum GpuSourceError {
    /// The source could not be queried
    #[error("GPU metrics unavailable: {0}")]
    Unavailable(String),

    /// The source returned output we could not parse
    #[error("Failed to parse GPU metrics line {line:?}: {message}")]
    Parse {
        /// Offending line
        line: String,
        /// What was wrong with it
        message: String,
    },
}

/// Provider of per-GPU readings
#[async_trait]
pub trait GpuMetricsSource: Send + Sync {
    /// Read every GPU on the host
    async fn get_gpu_metrics(&self) -> Result<Vec<GpuMetrics>, GpuSourceError>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Reads metrics from `nvidia-smi`
#[derive(Debug, Clone)]
pub struct NvidiaSmiSource {
    binary: String,
    timeout: Duration,
}

impl Default for NvidiaSmiSource {
    fn default() -> Self {
        Self {
            binary: "nvidia-smi".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl NvidiaSmiSource {
    /// Use a specific binary path
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Set the command timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl GpuMetricsSource for NvidiaSmiSource {
    async fn get_gpu_metrics(&self) -> Result<Vec<GpuMetrics>, GpuSourceError> {
        let mut command = Command::new(&self.binary);
        command
            .arg("--query-gpu=index,memory.used,memory.total,utilization.gpu,temperature.gpu")
            .arg("--format=csv,noheader,nounits")
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| GpuSourceError::Unavailable(format!("{} timed out", self.binary)))?
            .map_err(|e| GpuSourceError::Unavailable(format!("{}: {e}", self.binary)))?;

        if !output.status.success() {
            return Err(GpuSourceError::Unavailable(format!(
                "{} exited with {}",
                self.binary, output.status
            )));
        }

        parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
    }

    fn name(&self) -> &'static str {
        "nvidia-smi"
    }
}

/// Parse `nvidia-smi --format=csv,noheader,nounits` output.
///
/// `[N/A]` readings for utilization or temperature are reported as zero.
///
/// # Errors
/// Returns error on a line with the wrong column count or unparsable memory
pub fn parse_nvidia_smi(output: &str) -> Result<Vec<GpuMetrics>, GpuSourceError> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Result<GpuMetrics, GpuSourceError> {
    let parse_error = |message: &str| GpuSourceError::Parse {
        line: line.to_string(),
        message: message.to_string(),
    };

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [index, used, total, util, temp] = fields.as_slice() else {
        return Err(parse_error("expected 5 columns"));
    };

    let optional = |value: &&str| -> Result<f64, GpuSourceError> {
        if value.contains("N/A") {
            return Ok(0.0);
        }
        value.parse().map_err(|_| parse_error("invalid number"))
    };

    Ok(GpuMetrics {
        gpu_id: index.parse().map_err(|_| parse_error("invalid index"))?,
        memory_used_mb: used.parse().map_err(|_| parse_error("invalid memory.used"))?,
        memory_total_mb: total.parse().map_err(|_| parse_error("invalid memory.total"))?,
        utilization_percent: optional(util)?,
        temperature_celsius: optional(temp)?,
    })
}

/// Fixed, updatable readings
#[derive(Debug, Default)]
pub struct StaticGpuSource {
    metrics: RwLock<Vec<GpuMetrics>>,
    failing: RwLock<bool>,
}

impl StaticGpuSource {
    /// Create a source serving `metrics`
    #[must_use]
    pub fn new(metrics: Vec<GpuMetrics>) -> Self {
        Self {
            metrics: RwLock::new(metrics),
            failing: RwLock::new(false),
        }
    }

    /// Replace (or add) the reading for one GPU
    pub fn set(&self, reading: GpuMetrics) {
        let mut metrics = self.metrics.write();
        match metrics.iter_mut().find(|m| m.gpu_id == reading.gpu_id) {
            Some(existing) => *existing = reading,
            None => metrics.push(reading),
        }
    }

    /// Make subsequent reads fail
    pub fn set_failing(&self, failing: bool) {
        *self.failing.write() = failing;
    }
}

#[async_trait]
impl GpuMetricsSource for StaticGpuSource {
    async fn get_gpu_metrics(&self) -> Result<Vec<GpuMetrics>, GpuSourceError> {
        if *self.failing.read() {
            return Err(GpuSourceError::Unavailable("static source set to fail".to_string()));
        }
        Ok(self.metrics.read().clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

//! Graceful shutdown handling for the gateway.
//!
//! One [`ShutdownCoordinator`] owns the process-wide cancellation token.
//! Triggering it moves the gateway to `Draining`: new API requests are
//! refused, the listener stops accepting connections, and in-flight requests
//! get up to `graceful_timeout` to finish. Background loops (dispatcher,
//! fleet monitor, config watcher) watch child tokens and stop on their own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Graceful shutdown configuration
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Maximum time to wait for in-flight requests to complete
    pub graceful_timeout: Duration,
    /// Interval to log drain progress
    pub progress_interval: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_secs(1),
        }
    }
}

impl ShutdownConfig {
    /// Set the graceful timeout
    #[must_use]
    pub fn with_graceful_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_timeout = timeout;
        self
    }
}

/// Shutdown phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// Refusing new requests, waiting for in-flight ones
    Draining,
    /// Drain deadline passed with requests still running
    ForceClose,
    /// Shutdown complete
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::ForceClose => write!(f, "force_close"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Shutdown coordinator
#[derive(Debug)]
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    phase: watch::Sender<ShutdownPhase>,
    token: CancellationToken,
    in_flight_requests: AtomicU64,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    #[must_use]
    pub fn new(config: ShutdownConfig) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Self {
            config,
            phase,
            token: CancellationToken::new(),
            in_flight_requests: AtomicU64::new(0),
        }
    }

    /// Token cancelled when shutdown starts; hand children to background loops
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Check if shutdown is in progress
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Get current shutdown phase
    #[must_use]
    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    /// Subscribe to phase changes
    #[must_use]
    pub fn subscribe_phase(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase.subscribe()
    }

    /// Get the number of in-flight requests
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight_requests.load(Ordering::SeqCst)
    }

    fn request_start(&self) {
        self.in_flight_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn request_complete(&self) {
        let prev = self.in_flight_requests.fetch_sub(1, Ordering::SeqCst);
        debug!(in_flight = prev.saturating_sub(1), "Request completed");
    }

    /// Start shutdown: refuse new requests and cancel background loops
    pub fn trigger(&self, reason: &str) {
        if self.token.is_cancelled() {
            debug!("Shutdown already triggered");
            return;
        }
        info!(reason = %reason, "Initiating graceful shutdown");
        self.token.cancel();
        self.set_phase(ShutdownPhase::Draining);
    }

    /// Wait for in-flight requests, bounded by the graceful timeout.
    ///
    /// Returns `true` if every request finished in time.
    pub async fn drain(&self) -> bool {
        let drained = timeout(self.config.graceful_timeout, self.wait_for_drain())
            .await
            .is_ok();
        if drained {
            info!("All in-flight requests completed");
        } else {
            warn!(
                remaining = self.in_flight_count(),
                "Graceful timeout exceeded, forcing shutdown"
            );
            self.set_phase(ShutdownPhase::ForceClose);
        }
        drained
    }

    /// Mark shutdown complete
    pub fn complete(&self) {
        self.set_phase(ShutdownPhase::Complete);
        info!("Graceful shutdown complete");
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        info!(phase = %phase, "Shutdown phase changed");
        self.phase.send_replace(phase);
    }

    async fn wait_for_drain(&self) {
        let mut last_logged = tokio::time::Instant::now();
        loop {
            let count = self.in_flight_count();
            if count == 0 {
                break;
            }
            if last_logged.elapsed() >= self.config.progress_interval {
                info!(remaining = count, "Waiting for in-flight requests");
                last_logged = tokio::time::Instant::now();
            }
            sleep(DRAIN_POLL).await;
        }
    }
}

/// Tracks one request for the lifetime of the guard
#[derive(Debug)]
pub struct RequestGuard {
    coordinator: Arc<ShutdownCoordinator>,
}

impl RequestGuard {
    /// Register a request; `None` once shutdown has started
    #[must_use]
    pub fn new(coordinator: Arc<ShutdownCoordinator>) -> Option<Self> {
        if coordinator.is_shutting_down() {
            return None;
        }
        coordinator.request_start();
        Some(Self { coordinator })
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.coordinator.request_complete();
    }
}

/// Resolve on SIGINT or SIGTERM (Ctrl+C elsewhere); returns the signal name
pub async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        "ctrl+c"
    };

    #[cfg(unix)]
    let sigterm = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
        "sigterm"
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<&'static str>();

    let name = tokio::select! {
        name = ctrl_c => name,
        name = sigterm => name,
    };
    info!(signal = name, "Received shutdown signal");
    name
}

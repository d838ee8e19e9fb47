//! Hot reload of the routing tables.
//!
//! The watcher observes the config file's directory, re-reads the file when
//! it changes, and publishes a fresh [`RegistrySnapshot`] to the shared
//! [`BackendRegistry`]. A reload that fails to parse or validate is logged
//! and ignored; the previous snapshot stays live. Sections other than
//! backends and agents take effect on restart.
//!
//! [`RegistrySnapshot`]: gateway_core::RegistrySnapshot

use crate::error::{ConfigError, ConfigResult};
use crate::loader::read_config;
use gateway_core::BackendRegistry;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEBOUNCE: Duration = Duration::from_millis(200);

/// Running config file watcher
pub struct ConfigWatcher {
    path: PathBuf,
    registry: Arc<BackendRegistry>,
    _watcher: RecommendedWatcher,
    handle: JoinHandle<()>,
}

impl std::fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ConfigWatcher {
    /// Start watching `path`, publishing reloads into `registry` until
    /// `shutdown` fires.
    ///
    /// # Errors
    /// Returns [`ConfigError::Watch`] if the OS watcher cannot be created
    pub fn spawn(
        path: impl Into<PathBuf>,
        registry: Arc<BackendRegistry>,
        shutdown: CancellationToken,
    ) -> ConfigResult<Self> {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = tx.send(event);
        })?;

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(path = %path.display(), "Watching configuration for changes");

        let handle = tokio::spawn(watch_loop(
            path.clone(),
            Arc::clone(&registry),
            rx,
            shutdown,
        ));
        Ok(Self {
            path,
            registry,
            _watcher: watcher,
            handle,
        })
    }

    /// Re-read the file now and publish it
    ///
    /// # Errors
    /// Fails, leaving the registry unchanged, when the file is invalid
    pub fn reload_now(&self) -> ConfigResult<u64> {
        reload(&self.path, &self.registry)
    }

    /// Wait for the watch loop to exit
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

/// Re-read `path` and publish its routing tables.
///
/// # Errors
/// Fails, leaving the registry unchanged, when the file is invalid
pub fn reload(path: &Path, registry: &BackendRegistry) -> ConfigResult<u64> {
    let mut config = read_config(path)?;
    config.apply_overrides(&|var: &str| std::env::var(var).ok())?;
    config.check()?;
    let snapshot = config.to_registry_snapshot()?;
    Ok(registry.publish(snapshot))
}

async fn watch_loop(
    path: PathBuf,
    registry: Arc<BackendRegistry>,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    shutdown: CancellationToken,
) {
    let file_name = path.file_name().map(ToOwned::to_owned);
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            Ok(event) if touches(&event, file_name.as_deref()) => {}
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "Config watch error");
                continue;
            }
        }

        // Editors emit bursts of events per save.
        tokio::time::sleep(DEBOUNCE).await;
        while events.try_recv().is_ok() {}

        match reload(&path, &registry) {
            Ok(version) => info!(
                path = %path.display(),
                registry_version = version,
                "Configuration reloaded"
            ),
            Err(ConfigError::Io { .. }) => {
                debug!(path = %path.display(), "Config file not readable yet, skipping reload");
            }
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "Rejected configuration reload, keeping previous routing tables"
            ),
        }
    }
    debug!("Config watcher stopped");
}

fn touches(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    ) && event
        .paths
        .iter()
        .any(|p| p.file_name() == file_name)
}

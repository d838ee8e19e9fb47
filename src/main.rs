//! # Agent Inference Gateway
//!
//! GPU-aware scheduling and workflow orchestration in front of local model
//! servers and external inference APIs.
//!
//! ## Features
//!
//! - Priority queue with aging, per-model batching and queue timeouts
//! - GPU memory/utilization admission and least-loaded instance selection
//! - Retry with exponential backoff, then fallback to external backends
//! - DAG workflows executed in dependency waves with result aggregation
//! - Prometheus metrics, structured logging and hot reload of backends
//!
//! ## Usage
//!
//! ```bash
//! # Start with config/gateway.yaml (or built-in defaults)
//! agent-inference-gateway
//!
//! # Start with a specific config file
//! GATEWAY_CONFIG=/etc/gateway/gateway.yaml agent-inference-gateway
//!
//! # Override the listener
//! GATEWAY_PORT=9000 agent-inference-gateway
//! ```

use anyhow::Context;
use gateway_config::{config_path, load_config, ConfigWatcher, GatewayConfig};
use gateway_core::{BackendRegistry, InferenceBackend};
use gateway_orchestrator::Orchestrator;
use gateway_providers::{OpenAiCompatBackend, OpenAiCompatConfig};
use gateway_routing::{LoadBalancer, Router};
use gateway_scheduler::Scheduler;
use gateway_server::{
    shutdown_signal, AppState, Server, ServerConfig, ShutdownConfig, ShutdownCoordinator,
};
use gateway_telemetry::{
    init_tracing, shutdown_tracing, EventSink, FleetMonitor, Metrics, TracingEventSink,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "agent-inference-gateway";

/// Application entry point
#[tokio::main]
async fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let provider = match init_tracing(&config.tracing_config(SERVICE_NAME)) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("Failed to initialize tracing: {e}");
            None
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "Starting agent inference gateway"
    );

    let outcome = run(config).await;
    if let Err(e) = &outcome {
        error!(error = %format!("{e:#}"), "Gateway failed");
    }
    shutdown_tracing(provider);
    if outcome.is_err() {
        std::process::exit(1);
    }
}

/// Wire the components, serve, then drain
async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let metrics = Metrics::new().context("registering metrics")?;
    let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);

    let registry = Arc::new(BackendRegistry::new(
        config
            .to_registry_snapshot()
            .context("building backend registry")?,
    ));
    let snapshot = registry.snapshot();
    info!(
        version = snapshot.version(),
        agents = snapshot.agent_types().len(),
        instances = snapshot.instances().len(),
        external_backends = snapshot.external_backends().len(),
        "Backend registry initialized"
    );
    if snapshot.agent_types().is_empty() {
        warn!("No agent types configured; the gateway will not be ready");
    }

    let backend: Arc<dyn InferenceBackend> = Arc::new(
        OpenAiCompatBackend::new(
            OpenAiCompatConfig::default().with_connect_timeout(Duration::from_secs(5)),
        )
        .context("creating HTTP backend client")?,
    );

    let shutdown = Arc::new(ShutdownCoordinator::new(
        ShutdownConfig::default().with_graceful_timeout(config.server.shutdown_timeout),
    ));
    let token = shutdown.token();

    let monitor = Arc::new(
        FleetMonitor::new(
            config.monitor_config(),
            Arc::clone(&registry),
            config.gpu_source(),
            Arc::clone(&backend),
        )
        .with_metrics(metrics.clone()),
    );
    let monitor_task = monitor.spawn(token.child_token());

    let balancer = Arc::new(
        LoadBalancer::new(
            config.load_balancer_config(),
            Arc::clone(&registry),
            Arc::clone(&monitor),
        )
        .with_metrics(metrics.clone()),
    );
    let router = Arc::new(
        Router::new(
            config.router_config(),
            Arc::clone(&registry),
            Arc::clone(&balancer),
            backend,
        )
        .with_reporter(monitor.reporter())
        .with_metrics(metrics.clone()),
    );

    let scheduler = Scheduler::builder(Arc::clone(&registry), Arc::clone(&balancer), router)
        .config(config.scheduler_config())
        .event_sink(Arc::clone(&events))
        .metrics(metrics.clone())
        .build();
    let dispatcher = scheduler.start();

    let orchestrator = Arc::new(
        Orchestrator::new(config.orchestrator_config(), scheduler.clone())
            .with_event_sink(events)
            .with_metrics(metrics.clone()),
    );

    let watcher = match config_path() {
        Some(path) if path.is_file() => {
            match ConfigWatcher::spawn(&path, Arc::clone(&registry), token.child_token()) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(error = %e, "Config hot reload disabled");
                    None
                }
            }
        }
        _ => None,
    };

    let state = AppState::builder()
        .scheduler(scheduler.clone())
        .orchestrator(orchestrator)
        .registry(registry)
        .balancer(balancer)
        .metrics(metrics)
        .shutdown(Arc::clone(&shutdown))
        .build()?;

    let server = Server::bind(ServerConfig::from(&config.server)).await?;

    let signal_coordinator = Arc::clone(&shutdown);
    tokio::spawn(async move {
        let signal = shutdown_signal().await;
        signal_coordinator.trigger(signal);
    });

    let served = server.serve(state).await;

    // Connections are closed; stop taking work and let in-flight tasks settle.
    shutdown.trigger("server stopped");
    scheduler.shutdown();
    if !shutdown.drain().await {
        warn!(
            in_flight = shutdown.in_flight_count(),
            "Drain timed out, forcing shutdown"
        );
    }
    let _ = dispatcher.await;
    let _ = monitor_task.await;
    if let Some(watcher) = watcher {
        watcher.join().await;
    }
    shutdown.complete();

    served?;
    info!("Gateway stopped");
    Ok(())
}

//! Backend router.
//!
//! Resolves an agent type to an ordered candidate list and walks it:
//! enabled external backends first, in configured order, then local
//! instances of the agent's model picked by the [`LoadBalancer`]. Each
//! candidate is retried with backoff before the router falls through to the
//! next one. Only when every candidate is exhausted does the caller see
//! [`RoutingError::AllBackendsExhausted`].

use crate::load_balancer::{InstanceLease, LoadBalancer};
use dashmap::DashMap;
use gateway_core::{
    BackendError, BackendRegistry, BackendTarget, Completion, CompletionRequest, ExternalBackend,
    InferenceBackend, TaskPayload,
};
use gateway_resilience::{Bulkhead, RetryConfig, RetryPolicy, RetryResult};
use gateway_telemetry::{HealthReporter, Metrics};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Per-candidate retry policy
    pub retry: RetryConfig,
    /// Bound on a single backend call
    pub call_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            call_timeout: Duration::from_secs(120),
        }
    }
}

/// Per-dispatch context handed to [`Router::route`]
#[derive(Debug)]
pub struct AttemptContext {
    /// Task being routed
    pub task_id: String,
    /// Slot already reserved by the scheduler, tried first among local instances
    pub lease: Option<InstanceLease>,
    /// Fires when the task is cancelled or times out
    pub cancel: CancellationToken,
}

impl AttemptContext {
    /// Context without a reserved slot
    #[must_use]
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            lease: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the reserved slot
    #[must_use]
    pub fn with_lease(mut self, lease: InstanceLease) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Set the cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Successful routing
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    /// Backend output
    pub completion: Completion,
    /// Backend that produced it
    pub backend_id: String,
    /// Model that produced it
    pub model_name: String,
    /// Latency of the successful call
    pub latency_ms: u64,
    /// Attempts across every candidate, including the successful one
    pub attempt_count: u32,
}

/// One candidate that was given up on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFailure {
    /// Backend id
    pub backend_id: String,
    /// Attempts made against it
    pub attempts: u32,
    /// Last error it returned
    pub error: BackendError,
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} attempt(s): {}",
            self.backend_id, self.attempts, self.error
        )
    }
}

/// Routing failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum RoutingError {
    /// Agent type not in the registry
    #[error("unknown agent type: {agent_type}")]
    UnknownAgent {
        /// Agent type
        agent_type: String,
    },

    /// Every candidate failed
    #[error("all backends exhausted ({} candidates)", .failures.len())]
    AllBackendsExhausted {
        /// Candidates in the order they were tried
        failures: Vec<CandidateFailure>,
    },

    /// Cancelled before any candidate succeeded
    #[error("routing cancelled after {attempts} attempts")]
    Cancelled {
        /// Attempts started before cancellation
        attempts: u32,
    },
}

impl RoutingError {
    /// Attempts made before giving up
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        match self {
            Self::UnknownAgent { .. } => 0,
            Self::AllBackendsExhausted { failures } => failures.iter().map(|f| f.attempts).sum(),
            Self::Cancelled { attempts } => *attempts,
        }
    }

    /// Whether the final candidate failed by timing out
    #[must_use]
    pub fn last_was_timeout(&self) -> bool {
        match self {
            Self::AllBackendsExhausted { failures } => {
                failures.last().is_some_and(|f| f.error.is_timeout())
            }
            _ => false,
        }
    }

    /// Human readable error chain, one entry per candidate
    #[must_use]
    pub fn chain(&self) -> Vec<String> {
        match self {
            Self::AllBackendsExhausted { failures } => {
                failures.iter().map(ToString::to_string).collect()
            }
            other => vec![other.to_string()],
        }
    }
}

#[derive(Debug, Default)]
struct BackendStats {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_latency_ms: AtomicU64,
}

/// Dispatch statistics for one backend
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatsSnapshot {
    /// Backend id
    pub backend_id: String,
    /// Calls issued
    pub requests: u64,
    /// Calls that succeeded
    pub successes: u64,
    /// Calls that failed
    pub failures: u64,
    /// Mean latency over all calls
    pub avg_latency_ms: f64,
}

enum CandidateOutcome {
    Success {
        completion: Completion,
        latency: Duration,
        attempts: u32,
    },
    Failed(CandidateFailure),
    Cancelled {
        attempts: u32,
    },
}

/// Backend router
pub struct Router {
    config: RouterConfig,
    retry: RetryPolicy,
    registry: Arc<BackendRegistry>,
    balancer: Arc<LoadBalancer>,
    backend: Arc<dyn InferenceBackend>,
    reporter: HealthReporter,
    metrics: Option<Metrics>,
    bulkheads: DashMap<String, Arc<Bulkhead>>,
    stats: DashMap<String, BackendStats>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("config", &self.config)
            .field("bulkheads", &self.bulkheads.len())
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Create a router
    #[must_use]
    pub fn new(
        config: RouterConfig,
        registry: Arc<BackendRegistry>,
        balancer: Arc<LoadBalancer>,
        backend: Arc<dyn InferenceBackend>,
    ) -> Self {
        Self {
            retry: RetryPolicy::new(config.retry.clone()),
            config,
            registry,
            balancer,
            backend,
            reporter: HealthReporter::detached(),
            metrics: None,
            bulkheads: DashMap::new(),
            stats: DashMap::new(),
        }
    }

    /// Report call outcomes to the fleet monitor
    #[must_use]
    pub fn with_reporter(mut self, reporter: HealthReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Record calls into Prometheus
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Route one task payload to a backend
    ///
    /// # Errors
    /// Returns [`RoutingError`] when the agent is unknown, every candidate
    /// failed, or `ctx.cancel` fired first
    #[instrument(
        skip(self, payload, ctx),
        fields(
            task_id = %ctx.task_id,
            payload_bytes = payload.size_bytes(),
            payload_digest = %payload.digest(),
        )
    )]
    pub async fn route(
        &self,
        agent_type: &str,
        payload: &TaskPayload,
        ctx: AttemptContext,
    ) -> Result<RouteOutcome, RoutingError> {
        let AttemptContext { lease, cancel, .. } = ctx;

        let registry = self.registry.snapshot();
        let route = registry
            .resolve(agent_type)
            .ok_or_else(|| RoutingError::UnknownAgent {
                agent_type: agent_type.to_string(),
            })?;

        let request = CompletionRequest::from_payload(agent_type, payload, self.config.call_timeout);
        let mut failures: Vec<CandidateFailure> = Vec::new();
        let mut attempts_so_far = 0u32;

        for external in &route.external {
            let bulkhead = self.bulkhead_for(external);
            let target = external.target();
            let outcome = self
                .try_candidate(&target, &request, Some(&bulkhead), false, &cancel)
                .await;
            match self.settle(outcome, &target, &mut failures, &mut attempts_so_far) {
                Some(result) => return result,
                None => continue,
            }
        }

        if let Some(model) = route.model.as_deref() {
            let mut tried: Vec<String> = Vec::new();
            let mut next = match lease {
                Some(lease) => Some(lease),
                None => self.balancer.select_excluding(model, &tried).ok(),
            };

            while let Some(lease) = next.take() {
                tried.push(lease.instance_id().to_string());
                let target = lease.instance().target();
                let outcome = self.try_candidate(&target, &request, None, true, &cancel).await;
                drop(lease);

                if let Some(result) = self.settle(outcome, &target, &mut failures, &mut attempts_so_far) {
                    return result;
                }
                next = self.balancer.select_excluding(model, &tried).ok();
            }
        }

        warn!(
            agent_type = %agent_type,
            candidates = failures.len(),
            attempts = attempts_so_far,
            "All backends exhausted"
        );
        Err(RoutingError::AllBackendsExhausted { failures })
    }

    /// Turn a candidate outcome into a final result, or record the failure
    /// and return `None` to fall through.
    fn settle(
        &self,
        outcome: CandidateOutcome,
        target: &BackendTarget,
        failures: &mut Vec<CandidateFailure>,
        attempts_so_far: &mut u32,
    ) -> Option<Result<RouteOutcome, RoutingError>> {
        match outcome {
            CandidateOutcome::Success {
                completion,
                latency,
                attempts,
            } => {
                let attempt_count = *attempts_so_far + attempts;
                info!(
                    backend = %target.id,
                    model = %target.model_name,
                    attempt_count,
                    latency_ms = latency.as_millis() as u64,
                    "Routed"
                );
                Some(Ok(RouteOutcome {
                    completion,
                    backend_id: target.id.clone(),
                    model_name: target.model_name.clone(),
                    latency_ms: latency.as_millis() as u64,
                    attempt_count,
                }))
            }
            CandidateOutcome::Failed(failure) => {
                warn!(
                    backend = %failure.backend_id,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Backend candidate failed, falling through"
                );
                *attempts_so_far += failure.attempts;
                failures.push(failure);
                None
            }
            CandidateOutcome::Cancelled { attempts } => {
                debug!(backend = %target.id, "Routing cancelled");
                Some(Err(RoutingError::Cancelled {
                    attempts: *attempts_so_far + attempts,
                }))
            }
        }
    }

    async fn try_candidate(
        &self,
        target: &BackendTarget,
        request: &CompletionRequest,
        bulkhead: Option<&Bulkhead>,
        local: bool,
        cancel: &CancellationToken,
    ) -> CandidateOutcome {
        let result = self
            .retry
            .execute(cancel, |attempt| {
                self.call_once(target, request, bulkhead, local, attempt)
            })
            .await;

        match result {
            RetryResult::Success {
                value: (completion, latency),
                attempts,
            } => CandidateOutcome::Success {
                completion,
                latency,
                attempts,
            },
            RetryResult::Exhausted { error, attempts }
            | RetryResult::NonRetryable { error, attempts } => {
                CandidateOutcome::Failed(CandidateFailure {
                    backend_id: target.id.clone(),
                    attempts,
                    error,
                })
            }
            RetryResult::Cancelled { attempts, .. } => CandidateOutcome::Cancelled { attempts },
        }
    }

    async fn call_once(
        &self,
        target: &BackendTarget,
        request: &CompletionRequest,
        bulkhead: Option<&Bulkhead>,
        local: bool,
        attempt: u32,
    ) -> Result<(Completion, Duration), BackendError> {
        let _permit = match bulkhead {
            Some(bulkhead) => Some(bulkhead.acquire().await?),
            None => None,
        };

        debug!(backend = %target.id, attempt, "Calling backend");
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.config.call_timeout,
            self.backend.run_agent(target, request),
        )
        .await
        .unwrap_or_else(|_| Err(BackendError::timeout(self.config.call_timeout)));
        let elapsed = started.elapsed();

        self.record(&target.id, local, &result, elapsed);
        result.map(|completion| (completion, elapsed))
    }

    fn record(
        &self,
        backend_id: &str,
        local: bool,
        result: &Result<Completion, BackendError>,
        elapsed: Duration,
    ) {
        let stats = self.stats.entry(backend_id.to_string()).or_default();
        stats.requests.fetch_add(1, Ordering::Relaxed);
        stats
            .total_latency_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);

        let outcome = match result {
            Ok(_) => {
                stats.successes.fetch_add(1, Ordering::Relaxed);
                if local {
                    self.reporter.report_success(backend_id);
                }
                "success"
            }
            Err(error) => {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                if local {
                    self.reporter.report_failure(backend_id, error);
                }
                if error.is_timeout() {
                    "timeout"
                } else {
                    "error"
                }
            }
        };
        drop(stats);

        if let Some(metrics) = &self.metrics {
            metrics.record_backend_call(backend_id, outcome, elapsed);
        }
    }

    /// Bulkhead for an external backend, rebuilt if its limit changed
    fn bulkhead_for(&self, backend: &ExternalBackend) -> Arc<Bulkhead> {
        if let Some(existing) = self.bulkheads.get(&backend.id) {
            if existing.stats().max_concurrent == backend.max_concurrency {
                return Arc::clone(existing.value());
            }
        }
        let bulkhead = Arc::new(Bulkhead::with_capacity(
            backend.id.clone(),
            backend.max_concurrency,
        ));
        self.bulkheads
            .insert(backend.id.clone(), Arc::clone(&bulkhead));
        bulkhead
    }

    /// Per-backend dispatch statistics, sorted by backend id
    #[must_use]
    pub fn backend_stats(&self) -> Vec<BackendStatsSnapshot> {
        let mut all: Vec<_> = self
            .stats
            .iter()
            .map(|entry| {
                let requests = entry.requests.load(Ordering::Relaxed);
                let total = entry.total_latency_ms.load(Ordering::Relaxed);
                BackendStatsSnapshot {
                    backend_id: entry.key().clone(),
                    requests,
                    successes: entry.successes.load(Ordering::Relaxed),
                    failures: entry.failures.load(Ordering::Relaxed),
                    avg_latency_ms: if requests == 0 {
                        0.0
                    } else {
                        total as f64 / requests as f64
                    },
                }
            })
            .collect();
        all.sort_by(|a, b| a.backend_id.cmp(&b.backend_id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::tests::{gpu, instance, DeadBackend};
    use crate::load_balancer::LoadBalancerConfig;
    use async_trait::async_trait;
    use gateway_core::{
        AgentRoute, BackendErrorKind, BackendInstance, ChatMessage, Credential, RegistrySnapshot,
    };
    use gateway_telemetry::{FleetMonitor, GpuMetrics, MonitorConfig, StaticGpuSource};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Debug, Clone)]
    enum Script {
        Ok(&'static str),
        Fail(BackendErrorKind),
        Slow(Duration),
    }

    #[derive(Debug, Default)]
    struct ScriptedBackend {
        scripts: HashMap<String, Script>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn with(mut self, id: &str, script: Script) -> Self {
            self.scripts.insert(id.to_string(), script);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl InferenceBackend for ScriptedBackend {
        async fn run_agent(
            &self,
            target: &BackendTarget,
            _request: &CompletionRequest,
        ) -> Result<Completion, BackendError> {
            self.calls.lock().push(target.id.clone());
            match self.scripts.get(&target.id).cloned() {
                Some(Script::Ok(text)) => Ok(Completion {
                    text: text.to_string(),
                    token_count: 3,
                }),
                Some(Script::Fail(kind)) => Err(BackendError::new(kind, "scripted failure")),
                Some(Script::Slow(delay)) => {
                    tokio::time::sleep(delay).await;
                    Ok(Completion {
                        text: "slow".to_string(),
                        token_count: 1,
                    })
                }
                None => Err(BackendError::new(BackendErrorKind::Connection, "no script")),
            }
        }

        async fn probe(&self, _target: &BackendTarget) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn external(id: &str) -> ExternalBackend {
        ExternalBackend {
            id: id.to_string(),
            model_name: "hosted".to_string(),
            base_url: format!("https://{id}"),
            enabled: true,
            max_concurrency: 2,
            credential: Credential::None,
        }
    }

    fn fast_retry() -> RouterConfig {
        RouterConfig {
            retry: RetryConfig {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                ..Default::default()
            },
            call_timeout: Duration::from_millis(200),
        }
    }

    async fn router(
        snapshot: RegistrySnapshot,
        gpus: Vec<GpuMetrics>,
        backend: Arc<ScriptedBackend>,
    ) -> (Router, Arc<LoadBalancer>) {
        let registry = Arc::new(BackendRegistry::new(snapshot));
        let monitor = Arc::new(FleetMonitor::new(
            MonitorConfig::default(),
            Arc::clone(&registry),
            Arc::new(StaticGpuSource::new(gpus)),
            Arc::new(DeadBackend),
        ));
        monitor.refresh_gpus().await;
        let balancer = Arc::new(LoadBalancer::new(
            LoadBalancerConfig::default(),
            Arc::clone(&registry),
            monitor,
        ));
        (
            Router::new(fast_retry(), registry, Arc::clone(&balancer), backend),
            balancer,
        )
    }

    fn local_snapshot(instances: Vec<BackendInstance>) -> RegistrySnapshot {
        let mut builder = RegistrySnapshot::builder().agent(AgentRoute::local("Clinical", "llama"));
        for i in instances {
            builder = builder.instance(i);
        }
        builder.build().expect("snapshot")
    }

    fn payload() -> TaskPayload {
        TaskPayload::new(vec![ChatMessage::user("summarise the chart")])
    }

    #[tokio::test]
    async fn test_falls_back_from_failing_external_to_local() {
        let snapshot = RegistrySnapshot::builder()
            .instance(instance("y", 0, 2))
            .external(external("x"))
            .agent(AgentRoute::local("Clinical", "llama").with_external("x"))
            .build()
            .expect("snapshot");
        let backend = Arc::new(
            ScriptedBackend::default()
                .with("x", Script::Fail(BackendErrorKind::Status(500)))
                .with("y", Script::Ok("done")),
        );
        let (router, _) = router(snapshot, vec![], Arc::clone(&backend)).await;

        let outcome = router
            .route("Clinical", &payload(), AttemptContext::new("t-1"))
            .await
            .expect("fallback succeeds");

        assert_eq!(outcome.backend_id, "y");
        assert_eq!(outcome.completion.text, "done");
        // Three attempts against x, one against y
        assert_eq!(outcome.attempt_count, 4);
        assert_eq!(backend.calls(), vec!["x", "x", "x", "y"]);

        let stats = router.backend_stats();
        assert_eq!(stats[0].backend_id, "x");
        assert_eq!(stats[0].failures, 3);
        assert_eq!(stats[1].successes, 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_skips_remaining_retries() {
        let backend = Arc::new(
            ScriptedBackend::default()
                .with("a", Script::Fail(BackendErrorKind::InvalidResponse))
                .with("b", Script::Ok("fine")),
        );
        let (router, _) = router(
            local_snapshot(vec![instance("a", 0, 1), instance("b", 1, 1)]),
            vec![gpu(0, 10, 0.0, 40.0), gpu(1, 10, 50.0, 40.0)],
            Arc::clone(&backend),
        )
        .await;

        let outcome = router
            .route("Clinical", &payload(), AttemptContext::new("t-2"))
            .await
            .expect("b succeeds");
        assert_eq!(outcome.backend_id, "b");
        assert_eq!(backend.calls(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_each_candidate() {
        let backend = Arc::new(
            ScriptedBackend::default()
                .with("a", Script::Fail(BackendErrorKind::Status(503)))
                .with("b", Script::Slow(Duration::from_secs(5))),
        );
        let (router, balancer) = router(
            local_snapshot(vec![instance("a", 0, 1), instance("b", 1, 1)]),
            vec![],
            backend,
        )
        .await;

        let err = router
            .route("Clinical", &payload(), AttemptContext::new("t-3"))
            .await
            .expect_err("both fail");

        let RoutingError::AllBackendsExhausted { failures } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].backend_id, "a");
        assert_eq!(failures[0].attempts, 3);
        assert!(err.last_was_timeout());
        assert_eq!(err.attempt_count(), 6);
        assert_eq!(err.chain().len(), 2);

        // Leases released after routing
        assert!(balancer.inflight().instances.values().all(|n| *n == 0));
    }

    #[tokio::test]
    async fn test_reserved_lease_is_tried_first() {
        let backend = Arc::new(
            ScriptedBackend::default()
                .with("a", Script::Ok("from a"))
                .with("b", Script::Ok("from b")),
        );
        let (router, balancer) = router(
            local_snapshot(vec![instance("a", 0, 1), instance("b", 1, 1)]),
            vec![gpu(0, 10, 90.0, 40.0), gpu(1, 10, 10.0, 40.0)],
            backend,
        )
        .await;

        let lease = balancer.select_excluding("llama", &["b".to_string()]).expect("a");
        let outcome = router
            .route("Clinical", &payload(), AttemptContext::new("t-4").with_lease(lease))
            .await
            .expect("routed");
        assert_eq!(outcome.backend_id, "a");
        assert_eq!(balancer.inflight().instances.get("a"), Some(&0));
    }

    #[tokio::test]
    async fn test_unknown_agent() {
        let backend = Arc::new(ScriptedBackend::default());
        let (router, _) = router(local_snapshot(vec![instance("a", 0, 1)]), vec![], backend).await;

        let err = router
            .route("Billing", &payload(), AttemptContext::new("t-5"))
            .await
            .expect_err("unknown");
        assert!(matches!(err, RoutingError::UnknownAgent { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_call() {
        let backend = Arc::new(
            ScriptedBackend::default().with("a", Script::Slow(Duration::from_secs(10))),
        );
        let mut config = fast_retry();
        config.call_timeout = Duration::from_secs(30);
        let snapshot = local_snapshot(vec![instance("a", 0, 1)]);
        let (router, _) = router(snapshot, vec![], backend).await;
        let router = Router { config, ..router };

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = router
            .route(
                "Clinical",
                &payload(),
                AttemptContext::new("t-6").with_cancel(cancel),
            )
            .await
            .expect_err("cancelled");
        assert!(matches!(err, RoutingError::Cancelled { attempts: 1 }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_disabled_external_is_skipped() {
        let mut disabled = external("x");
        disabled.enabled = false;
        let snapshot = RegistrySnapshot::builder()
            .instance(instance("y", 0, 1))
            .external(disabled)
            .agent(AgentRoute::local("Clinical", "llama").with_external("x"))
            .build()
            .expect("snapshot");
        let backend = Arc::new(
            ScriptedBackend::default()
                .with("x", Script::Ok("external"))
                .with("y", Script::Ok("local")),
        );
        let (router, _) = router(snapshot, vec![], Arc::clone(&backend)).await;

        let outcome = router
            .route("Clinical", &payload(), AttemptContext::new("t-7"))
            .await
            .expect("routed");
        assert_eq!(outcome.backend_id, "y");
        assert_eq!(backend.calls(), vec!["y"]);
    }
}

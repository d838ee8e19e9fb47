//! Task scheduler.
//!
//! Submission validates, reserves a queue slot and records the task. Tasks
//! with unfinished dependencies are held outside the priority queue until
//! every dependency COMPLETED; a dependency that ends any other way fails
//! them with `DependencyFailed`, transitively.
//!
//! A single dispatcher loop ages and expires queued tasks, moves them into
//! per-group batches and flushes batches that are full or whose window
//! elapsed. Flushing reserves an instance slot from the load balancer for
//! each member; when the balancer signals backpressure the remaining members
//! go back to the queue with their original position. Dispatched tasks are
//! run by a fixed pool of workers per group, sized to the group's capacity.

use crate::batch::{BatchGroup, Batcher};
use crate::config::SchedulerConfig;
use crate::queue::{PriorityQueue, QueuedTask};
use crate::table::{ProcessingTicket, TaskRecord, TaskTable};
use chrono::Utc;
use gateway_core::{
    BackendRegistry, ErrorKind, GatewayError, GatewayResult, Task, TaskError, TaskId,
    TaskOutcome, TaskRequest, TaskResult, TaskStatus,
};
use gateway_routing::{
    AttemptContext, BackendStatsSnapshot, InstanceLease, LoadBalancer, Router, RoutingError,
};
use gateway_telemetry::{AuditEvent, EventSink, GpuMetrics, Metrics, TracingEventSink};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const PURGE_INTERVAL: Duration = Duration::from_secs(1);

struct Dispatch {
    id: TaskId,
    lease: Option<InstanceLease>,
}

struct WorkerPool {
    tx: mpsc::UnboundedSender<Dispatch>,
    size: usize,
    outstanding: Arc<AtomicUsize>,
}

impl WorkerPool {
    fn is_saturated(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst) >= self.size
    }
}

#[derive(Default)]
struct DependencyGraph {
    /// Held task -> dependencies not yet COMPLETED
    waiting: HashMap<TaskId, usize>,
    /// Task -> held tasks waiting on it
    dependents: HashMap<TaskId, Vec<TaskId>>,
}

enum Gate {
    Ready,
    Held,
    Failed(TaskId),
}

struct DispatchState {
    queue: PriorityQueue,
    batcher: Batcher,
    pools: HashMap<String, WorkerPool>,
}

struct Inner {
    config: SchedulerConfig,
    registry: Arc<BackendRegistry>,
    balancer: Arc<LoadBalancer>,
    router: Arc<Router>,
    table: TaskTable,
    state: Mutex<DispatchState>,
    deps: Mutex<DependencyGraph>,
    queued: AtomicUsize,
    wake: Notify,
    events: Arc<dyn EventSink>,
    metrics: Option<Metrics>,
    shutdown: CancellationToken,
}

/// Queue and fleet snapshot for the telemetry endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerTelemetry {
    /// Tasks in QUEUED state, including ones held on dependencies
    pub queue_depth: usize,
    /// Tasks in the priority queue
    pub ready: usize,
    /// Tasks sitting in open batch groups
    pub batched: usize,
    /// Live tasks by status
    pub tasks_by_status: BTreeMap<&'static str, usize>,
    /// In-flight calls per local instance
    pub backend_inflight: HashMap<String, u32>,
    /// In-flight calls per GPU
    pub gpu_inflight: HashMap<u32, u32>,
    /// Latest GPU readings
    pub gpus: Vec<GpuMetrics>,
    /// Whether the last GPU poll succeeded
    pub gpu_telemetry_ok: bool,
    /// Per-backend dispatch statistics
    pub backends: Vec<BackendStatsSnapshot>,
}

/// Builder for [`Scheduler`]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    registry: Arc<BackendRegistry>,
    balancer: Arc<LoadBalancer>,
    router: Arc<Router>,
    events: Option<Arc<dyn EventSink>>,
    metrics: Option<Metrics>,
}

impl SchedulerBuilder {
    /// Set the configuration
    #[must_use]
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the audit event sink
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Set the metrics handle
    #[must_use]
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the scheduler; call [`Scheduler::start`] to begin dispatching
    #[must_use]
    pub fn build(self) -> Scheduler {
        let config = self.config;
        Scheduler {
            inner: Arc::new(Inner {
                table: TaskTable::new(config.result_ttl),
                state: Mutex::new(DispatchState {
                    queue: PriorityQueue::new(),
                    batcher: Batcher::new(config.batch_size, config.batch_timeout),
                    pools: HashMap::new(),
                }),
                deps: Mutex::new(DependencyGraph::default()),
                queued: AtomicUsize::new(0),
                wake: Notify::new(),
                events: self.events.unwrap_or_else(|| Arc::new(TracingEventSink)),
                metrics: self.metrics,
                shutdown: CancellationToken::new(),
                registry: self.registry,
                balancer: self.balancer,
                router: self.router,
                config,
            }),
        }
    }
}

/// Task scheduler handle
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("queue_depth", &self.queue_depth())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Start building a scheduler
    #[must_use]
    pub fn builder(
        registry: Arc<BackendRegistry>,
        balancer: Arc<LoadBalancer>,
        router: Arc<Router>,
    ) -> SchedulerBuilder {
        SchedulerBuilder {
            config: SchedulerConfig::default(),
            registry,
            balancer,
            router,
            events: None,
            metrics: None,
        }
    }

    /// Spawn the dispatcher loop
    pub fn start(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run())
    }

    /// Stop the dispatcher and its workers; new submissions are refused
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Submit one task
    ///
    /// # Errors
    /// Returns a validation, unknown-agent, duplicate-id or queue-full error;
    /// nothing is recorded in that case
    #[instrument(skip(self, request), fields(agent_type = %request.agent_type))]
    pub async fn submit(&self, request: TaskRequest) -> GatewayResult<TaskId> {
        let (id, events) = self.inner.submit(request)?;
        self.inner.emit(events).await;
        Ok(id)
    }

    /// Submit several tasks; each item succeeds or fails on its own
    pub async fn submit_batch(&self, requests: Vec<TaskRequest>) -> Vec<GatewayResult<TaskId>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.submit(request).await);
        }
        results
    }

    /// Current status
    ///
    /// # Errors
    /// Returns [`GatewayError::NotFound`] for unknown or expired ids
    pub fn status(&self, id: &TaskId) -> GatewayResult<TaskStatus> {
        self.inner
            .table
            .status(id)
            .ok_or_else(|| GatewayError::not_found(id.as_str()))
    }

    /// Full task record
    ///
    /// # Errors
    /// Returns [`GatewayError::NotFound`] for unknown or expired ids
    pub fn task(&self, id: &TaskId) -> GatewayResult<Task> {
        self.inner
            .table
            .get(id)
            .ok_or_else(|| GatewayError::not_found(id.as_str()))
    }

    /// Terminal task with its result or error
    ///
    /// # Errors
    /// Returns [`GatewayError::NotFound`] for unknown or expired ids and
    /// [`GatewayError::NotReady`] while the task is still running
    pub fn result(&self, id: &TaskId) -> GatewayResult<Task> {
        let task = self.task(id)?;
        if task.is_terminal() {
            Ok(task)
        } else {
            Err(GatewayError::NotReady {
                id: id.to_string(),
            })
        }
    }

    /// Wait until the task is terminal
    ///
    /// # Errors
    /// Returns [`GatewayError::NotFound`] for unknown or expired ids
    pub async fn wait(&self, id: &TaskId) -> GatewayResult<Task> {
        let mut rx = self
            .inner
            .table
            .subscribe(id)
            .ok_or_else(|| GatewayError::not_found(id.as_str()))?;
        // A closed channel means the record was purged
        let _ = rx.wait_for(|status| status.is_terminal()).await;
        self.task(id)
    }

    /// Cancel a task.
    ///
    /// Returns `true` if the task was QUEUED or DISPATCHED and is now
    /// CANCELLED. A PROCESSING task gets its in-flight call aborted on a best
    /// effort basis and `false` is returned; it ends FAILED with kind
    /// `cancelled` if the abort wins.
    ///
    /// # Errors
    /// Returns [`GatewayError::NotFound`] for unknown or expired ids
    #[instrument(skip(self), fields(task_id = %id))]
    pub async fn cancel(&self, id: &TaskId) -> GatewayResult<bool> {
        let (cancelled, events) = self.inner.cancel(id)?;
        self.inner.emit(events).await;
        Ok(cancelled)
    }

    /// Whether the current registry routes `agent_type`
    #[must_use]
    pub fn has_agent(&self, agent_type: &str) -> bool {
        self.inner.registry.snapshot().has_agent(agent_type)
    }

    /// Tasks in QUEUED state
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    /// Queue and fleet snapshot
    #[must_use]
    pub fn telemetry(&self) -> SchedulerTelemetry {
        let (ready, batched) = {
            let state = self.inner.state.lock();
            (state.queue.len(), state.batcher.pending())
        };
        let inflight = self.inner.balancer.inflight();
        let fleet = self.inner.balancer.fleet();
        SchedulerTelemetry {
            queue_depth: self.queue_depth(),
            ready,
            batched,
            tasks_by_status: self.inner.table.counts(),
            backend_inflight: inflight.instances,
            gpu_inflight: inflight.gpus,
            gpus: fleet.gpus(),
            gpu_telemetry_ok: fleet.gpu_telemetry_ok(),
            backends: self.inner.router.backend_stats(),
        }
    }
}

impl Inner {
    fn submit(&self, request: TaskRequest) -> GatewayResult<(TaskId, Vec<AuditEvent>)> {
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::Unavailable {
                message: "scheduler is shutting down".to_string(),
            });
        }
        request.validate()?;

        let registry = self.registry.snapshot();
        let route = registry
            .resolve(&request.agent_type)
            .ok_or_else(|| GatewayError::unknown_agent(&request.agent_type))?;

        if let Some(missing) = request
            .dependencies
            .iter()
            .find(|dep| !self.table.contains(dep))
        {
            return Err(GatewayError::validation(
                format!("dependency {missing} does not exist"),
                Some("dependencies".to_string()),
                "unknown_dependency",
            ));
        }

        self.reserve_queue_slot()?;

        let id = request.id.clone().unwrap_or_else(TaskId::generate);
        let task = Task::from_request(&request, id.clone(), self.config.default_timeout_seconds);
        let deadline = Instant::now() + Duration::from_secs(task.timeout_seconds);
        let dependencies = task.dependencies.clone();
        let record = TaskRecord::new(task, route.group_key, route.model, deadline);

        if let Err(error) = self.table.insert(record) {
            self.release_queue_slot();
            return Err(error);
        }
        debug!(task_id = %id, dependencies = dependencies.len(), "Task accepted");

        let events = match self.gate(&id, &dependencies) {
            Gate::Ready => {
                self.enqueue(&id);
                Vec::new()
            }
            Gate::Held => Vec::new(),
            Gate::Failed(dependency) => self
                .settle(&id, dependency_failed(&dependency, "is not completed"))
                .1,
        };
        Ok((id, events))
    }

    fn gate(&self, id: &TaskId, dependencies: &[TaskId]) -> Gate {
        if dependencies.is_empty() {
            return Gate::Ready;
        }

        let mut graph = self.deps.lock();
        let mut pending = 0;
        for dependency in dependencies {
            match self.table.status(dependency) {
                Some(TaskStatus::Completed) => {}
                Some(status) if status.is_terminal() => return Gate::Failed(dependency.clone()),
                Some(_) => {
                    graph
                        .dependents
                        .entry(dependency.clone())
                        .or_default()
                        .push(id.clone());
                    pending += 1;
                }
                None => return Gate::Failed(dependency.clone()),
            }
        }

        if pending == 0 {
            Gate::Ready
        } else {
            graph.waiting.insert(id.clone(), pending);
            Gate::Held
        }
    }

    fn enqueue(&self, id: &TaskId) {
        if let Some(entry) = self.table.queue_entry(id) {
            self.state.lock().queue.push(entry);
            self.wake.notify_one();
        }
    }

    fn cancel(&self, id: &TaskId) -> GatewayResult<(bool, Vec<AuditEvent>)> {
        let status = self
            .table
            .status(id)
            .ok_or_else(|| GatewayError::not_found(id.as_str()))?;
        if status.is_terminal() {
            return Ok((false, Vec::new()));
        }

        if let Some(token) = self.table.cancel_token(id) {
            token.cancel();
        }
        if status == TaskStatus::Processing {
            debug!(task_id = %id, "Cancellation signalled to in-flight call");
            return Ok((false, Vec::new()));
        }

        {
            let mut state = self.state.lock();
            state.queue.remove(id);
            state.batcher.remove(id);
        }
        let outcome = TaskOutcome::Cancelled(TaskError::new(ErrorKind::Cancelled, "cancelled by caller"));
        Ok(self.settle(id, outcome))
    }

    /// Apply a terminal outcome and cascade to held dependents.
    ///
    /// Returns whether the outcome was applied to `id`, and the audit events
    /// for every task that became terminal. Must not be called with the
    /// dispatch state locked.
    fn settle(&self, id: &TaskId, outcome: TaskOutcome) -> (bool, Vec<AuditEvent>) {
        let mut events = Vec::new();
        let mut applied = false;
        let mut work = vec![(id.clone(), outcome)];

        while let Some((current, outcome)) = work.pop() {
            let Some((previous, task)) = self.table.finish(&current, outcome) else {
                continue;
            };
            if current == *id {
                applied = true;
            }
            if previous == TaskStatus::Queued {
                self.release_queue_slot();
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_task(task.status.as_str());
            }
            events.push(task_event(&task));

            let (ready, failed) = self.release_dependents(&task);
            for child in failed {
                let reason = format!("ended {}", task.status);
                work.push((child, dependency_failed(&task.id, &reason)));
            }
            for child in ready {
                self.enqueue(&child);
            }
        }

        self.wake.notify_one();
        (applied, events)
    }

    fn release_dependents(&self, task: &Task) -> (Vec<TaskId>, Vec<TaskId>) {
        let mut graph = self.deps.lock();
        graph.waiting.remove(&task.id);
        let Some(children) = graph.dependents.remove(&task.id) else {
            return (Vec::new(), Vec::new());
        };

        if task.status != TaskStatus::Completed {
            for child in &children {
                graph.waiting.remove(child);
            }
            return (Vec::new(), children);
        }

        let mut ready = Vec::new();
        for child in children {
            if let Some(remaining) = graph.waiting.get_mut(&child) {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    graph.waiting.remove(&child);
                    ready.push(child);
                }
            }
        }
        (ready, Vec::new())
    }

    fn reserve_queue_slot(&self) -> GatewayResult<()> {
        let capacity = self.config.queue_max_depth;
        self.queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| {
                (depth < capacity).then_some(depth + 1)
            })
            .map_err(|depth| {
                warn!(depth, capacity, "Queue full, rejecting submission");
                GatewayError::QueueFull { depth, capacity }
            })?;
        self.publish_depth();
        Ok(())
    }

    fn release_queue_slot(&self) {
        let _ = self
            .queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| depth.checked_sub(1));
        self.publish_depth();
    }

    fn publish_depth(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_queue_depth(self.queued.load(Ordering::SeqCst));
        }
    }

    async fn emit(&self, events: Vec<AuditEvent>) {
        for event in events {
            self.events.emit(event).await;
        }
    }

    async fn run(self: Arc<Self>) {
        let tick = self
            .config
            .dispatch_interval
            .min(self.config.batch_timeout)
            .max(Duration::from_millis(1));
        let mut last_purge = Instant::now();

        info!(
            queue_max_depth = self.config.queue_max_depth,
            batch_size = self.config.batch_size,
            batch_timeout_ms = self.config.batch_timeout.as_millis() as u64,
            "Scheduler dispatcher started"
        );

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                () = self.wake.notified() => {}
                () = tokio::time::sleep(tick) => {}
            }

            let expired = self.dispatch_cycle();
            for id in expired {
                let outcome = TaskOutcome::TimedOut(TaskError::new(
                    ErrorKind::QueueTimeout,
                    "no backend capacity before the task timeout",
                ));
                let (_, events) = self.settle(&id, outcome);
                self.emit(events).await;
            }

            if last_purge.elapsed() >= PURGE_INTERVAL {
                let purged = self.table.purge_expired();
                if purged > 0 {
                    debug!(purged, "Expired task records purged");
                }
                last_purge = Instant::now();
            }
        }

        // Dropping the senders lets idle workers exit
        self.state.lock().pools.clear();
        self.events.flush().await;
        info!("Scheduler dispatcher stopped");
    }

    /// One dispatcher pass; returns tasks whose queue deadline passed
    fn dispatch_cycle(self: &Arc<Self>) -> Vec<TaskId> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let promoted = state.queue.age(self.config.max_wait, now);
        if promoted > 0 {
            debug!(promoted, "Aged queued tasks");
        }

        let expired: Vec<TaskId> = state
            .queue
            .drain_expired(now)
            .into_iter()
            .chain(state.batcher.drain_expired(now))
            .map(|entry| entry.id)
            .collect();

        let mut blocked: HashSet<String> = HashSet::new();
        let mut deferred: Vec<QueuedTask> = Vec::new();

        while let Some(entry) = state.queue.pop() {
            if blocked.contains(&entry.group_key) || !self.has_capacity(&state.pools, &entry) {
                blocked.insert(entry.group_key.clone());
                deferred.push(entry);
                continue;
            }
            if let Some(group) = state.batcher.add(entry, now) {
                self.flush(&mut state.pools, group, &mut blocked, &mut deferred);
            }
        }

        for group in state.batcher.take_due(now) {
            self.flush(&mut state.pools, group, &mut blocked, &mut deferred);
        }

        for entry in deferred {
            state.queue.requeue(entry);
        }
        expired
    }

    fn has_capacity(&self, pools: &HashMap<String, WorkerPool>, entry: &QueuedTask) -> bool {
        match &entry.model {
            Some(model) => self.balancer.has_capacity(model),
            None => pools
                .get(&entry.group_key)
                .map_or(true, |pool| !pool.is_saturated()),
        }
    }

    fn flush(
        self: &Arc<Self>,
        pools: &mut HashMap<String, WorkerPool>,
        group: BatchGroup,
        blocked: &mut HashSet<String>,
        deferred: &mut Vec<QueuedTask>,
    ) {
        let Some(first) = group.tasks.first() else {
            return;
        };
        let pool = pools
            .entry(group.key.clone())
            .or_insert_with(|| self.spawn_pool(&group.key, &first.id));

        debug!(
            group = %group.key,
            size = group.tasks.len(),
            waited_ms = group.opened_at.elapsed().as_millis() as u64,
            "Flushing batch"
        );

        let mut members = group.tasks.into_iter();
        while let Some(entry) = members.next() {
            let lease = match &entry.model {
                Some(model) => match self.balancer.select_instance(model) {
                    Ok(lease) => Some(lease),
                    Err(backpressure) => {
                        debug!(group = %group.key, reason = ?backpressure.reason, "Batch deferred");
                        blocked.insert(group.key.clone());
                        deferred.push(entry);
                        deferred.extend(members);
                        return;
                    }
                },
                None if pool.is_saturated() => {
                    blocked.insert(group.key.clone());
                    deferred.push(entry);
                    deferred.extend(members);
                    return;
                }
                None => None,
            };

            if !self.table.mark_dispatched(&entry.id) {
                // Cancelled or failed while batched; the lease is returned on drop
                continue;
            }
            self.release_queue_slot();
            pool.outstanding.fetch_add(1, Ordering::SeqCst);

            if pool.tx.send(Dispatch { id: entry.id, lease }).is_err() {
                pool.outstanding.fetch_sub(1, Ordering::SeqCst);
                warn!(group = %group.key, "Worker pool closed, dispatch dropped");
            }
        }
    }

    fn spawn_pool(self: &Arc<Self>, group_key: &str, sample: &TaskId) -> WorkerPool {
        let registry = self.registry.snapshot();
        let size = self
            .table
            .agent_type(sample)
            .and_then(|agent| registry.resolve(&agent))
            .map_or(1, |route| route.capacity.max(1) as usize);

        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let outstanding = Arc::new(AtomicUsize::new(0));

        for _ in 0..size {
            tokio::spawn(Arc::clone(self).worker(Arc::clone(&rx), Arc::clone(&outstanding)));
        }
        info!(group = %group_key, workers = size, "Worker pool started");

        WorkerPool {
            tx,
            size,
            outstanding,
        }
    }

    async fn worker(
        self: Arc<Self>,
        rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Dispatch>>>,
        outstanding: Arc<AtomicUsize>,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => None,
                next = async { rx.lock().await.recv().await } => next,
            };
            let Some(dispatch) = next else {
                break;
            };
            self.execute(dispatch).await;
            outstanding.fetch_sub(1, Ordering::SeqCst);
            self.wake.notify_one();
        }
    }

    async fn execute(&self, dispatch: Dispatch) {
        let Dispatch { id, lease } = dispatch;
        let Some(ProcessingTicket { task, cancel }) = self.table.begin_processing(&id) else {
            debug!(task_id = %id, "Dispatched task no longer runnable");
            return;
        };

        let mut ctx = AttemptContext::new(id.as_str()).with_cancel(cancel.clone());
        if let Some(lease) = lease {
            ctx = ctx.with_lease(lease);
        }

        let timeout = Duration::from_secs(task.timeout_seconds);
        let routed = tokio::time::timeout(
            timeout,
            self.router.route(&task.agent_type, &task.payload, ctx),
        )
        .await;

        let outcome = match routed {
            Ok(Ok(routed)) => TaskOutcome::Completed(TaskResult {
                content: routed.completion.text,
                token_count: routed.completion.token_count,
                latency_ms: routed.latency_ms,
                backend_id: routed.backend_id,
                model_name: routed.model_name,
                attempt_count: routed.attempt_count,
            }),
            Ok(Err(RoutingError::Cancelled { attempts })) => TaskOutcome::Failed(
                TaskError::new(ErrorKind::Cancelled, "cancelled while processing")
                    .with_attempts(attempts),
            ),
            Ok(Err(error)) => {
                let kind = if error.last_was_timeout() {
                    ErrorKind::BackendTimeout
                } else {
                    ErrorKind::BackendError
                };
                TaskOutcome::Failed(
                    TaskError::new(kind, error.to_string())
                        .with_attempts(error.attempt_count())
                        .with_chain(error.chain()),
                )
            }
            Err(_) => {
                cancel.cancel();
                TaskOutcome::TimedOut(TaskError::new(
                    ErrorKind::Timeout,
                    format!("task exceeded its {}s timeout", task.timeout_seconds),
                ))
            }
        };

        let (_, events) = self.settle(&id, outcome);
        self.emit(events).await;
    }
}

fn dependency_failed(dependency: &TaskId, reason: &str) -> TaskOutcome {
    TaskOutcome::Failed(TaskError::new(
        ErrorKind::DependencyFailed,
        format!("dependency {dependency} {reason}"),
    ))
}

fn task_event(task: &Task) -> AuditEvent {
    AuditEvent::TaskFinished {
        task_id: task.id.to_string(),
        agent_type: task.agent_type.clone(),
        status: task.status,
        backend_id: task.result.as_ref().map(|r| r.backend_id.clone()),
        error_kind: task.error.as_ref().map(|e| e.kind),
        attempt_count: task
            .result
            .as_ref()
            .map(|r| r.attempt_count)
            .or_else(|| task.error.as_ref().map(|e| e.attempt_count))
            .unwrap_or(0),
        latency_ms: task.result.as_ref().map(|r| r.latency_ms),
        timestamp: Utc::now(),
    }
}

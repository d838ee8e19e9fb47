//! Workflow orchestrator.
//!
//! A workflow runs wave by wave. Every task of a wave is submitted to the
//! scheduler, then the orchestrator waits until all of them are terminal
//! before looking at the next wave. A task whose dependency did not complete
//! is recorded as FAILED with `DependencyFailed` and never submitted.
//!
//! A full scheduler queue is backpressure, not failure: the submission is
//! retried with capped backoff until it is accepted.
//!
//! Both the wait and those retries are bounded by the workflow deadline and
//! by caller cancellation; either one cancels every task of the current wave
//! that is still running and marks the remaining tasks as never run.

use crate::aggregate::{aggregate, completed_count, workflow_metrics};
use crate::dag::WorkflowDag;
use crate::store::WorkflowStore;
use crate::workflow::{WorkflowRequest, WorkflowResult, WorkflowStatus, WorkflowTaskOutcome};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use gateway_core::{
    ErrorKind, GatewayError, GatewayResult, Task, TaskError, TaskId, TaskRequest, TaskStatus,
    WorkflowId,
};
use gateway_scheduler::Scheduler;
use gateway_telemetry::{AuditEvent, EventSink, Metrics, TracingEventSink};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Separator between workflow id and local task id in scheduler ids
const SCOPE_SEPARATOR: char = ':';

/// First wait after the scheduler reports a full queue
const QUEUE_RETRY_BASE: Duration = Duration::from_millis(10);

/// Longest wait between resubmissions to a full queue
const QUEUE_RETRY_MAX: Duration = Duration::from_millis(250);

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Workflow deadline when the request does not set one
    pub default_timeout: Duration,
    /// How long finished workflows stay readable
    pub result_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(300),
            result_ttl: Duration::from_secs(300),
        }
    }
}

/// Workflow orchestrator
pub struct Orchestrator {
    config: OrchestratorConfig,
    scheduler: Scheduler,
    store: WorkflowStore,
    events: Arc<dyn EventSink>,
    metrics: Option<Metrics>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("running", &self.store.running())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator submitting to `scheduler`
    #[must_use]
    pub fn new(config: OrchestratorConfig, scheduler: Scheduler) -> Self {
        Self {
            store: WorkflowStore::new(config.result_ttl),
            config,
            scheduler,
            events: Arc::new(TracingEventSink),
            metrics: None,
        }
    }

    /// Set the audit event sink
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Set the metrics handle
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run a workflow to completion.
    ///
    /// Timeouts and cancellation are reported through the result status,
    /// with every task's outcome included.
    ///
    /// # Errors
    /// Returns [`GatewayError::InvalidWorkflow`] for a malformed or cyclic
    /// DAG, [`GatewayError::UnknownAgent`] if any task names an agent type
    /// the registry does not route, [`GatewayError::Validation`] for a
    /// workflow id containing `:` or a zero timeout, and
    /// [`GatewayError::DuplicateId`] if the workflow id is in use. Nothing is
    /// submitted in those cases.
    #[instrument(
        skip(self, request),
        fields(workflow_type = %request.workflow_type, tasks = request.tasks.len())
    )]
    pub async fn execute(&self, request: WorkflowRequest) -> GatewayResult<WorkflowResult> {
        self.store.purge_expired();

        let dag = WorkflowDag::build(&request.tasks)?;
        if let Some(task) = request
            .tasks
            .iter()
            .find(|t| !self.scheduler.has_agent(&t.agent_type))
        {
            return Err(GatewayError::unknown_agent(&task.agent_type));
        }
        if let Some(id) = request
            .id
            .as_ref()
            .filter(|id| id.as_str().contains(SCOPE_SEPARATOR))
        {
            return Err(GatewayError::validation(
                format!("workflow id {id} must not contain '{SCOPE_SEPARATOR}'"),
                Some("id".to_string()),
                "invalid_workflow_id",
            ));
        }
        if request.timeout_seconds == Some(0) {
            return Err(GatewayError::validation(
                "timeout_seconds must be greater than zero",
                Some("timeout_seconds".to_string()),
                "invalid_timeout",
            ));
        }
        let timeout = request
            .timeout_seconds
            .map_or(self.config.default_timeout, Duration::from_secs);

        let id = request.id.clone().unwrap_or_else(WorkflowId::generate);
        let mut run = WorkflowRun::new(id.clone(), &request, &dag);
        let cancel = self
            .store
            .register(run.snapshot(WorkflowStatus::Created, Duration::ZERO))?;

        info!(
            workflow_id = %id,
            waves = dag.waves().len(),
            timeout_ms = timeout.as_millis() as u64,
            "Workflow started"
        );

        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut interrupted = None;

        for (wave_index, wave) in dag.waves().iter().enumerate() {
            let mut submitted: Vec<(usize, TaskId)> = Vec::with_capacity(wave.len());
            for &position in wave {
                if let Some((dependency, status)) = run.unfinished_dependency(position) {
                    run.record_unsubmitted(
                        position,
                        TaskStatus::Failed,
                        TaskError::new(
                            ErrorKind::DependencyFailed,
                            format!("dependency {dependency} ended {status}"),
                        ),
                    );
                    continue;
                }

                let scoped = scoped_request(&id, &request.tasks[position]);
                match self.admit(scoped, deadline, &cancel).await {
                    Admission::Accepted(task_id) => {
                        run.record_submitted(position, task_id.clone());
                        submitted.push((position, task_id));
                    }
                    Admission::Rejected(error) => {
                        warn!(workflow_id = %id, task = dag.id(position), error = %error, "Workflow task rejected");
                        run.record_unsubmitted(
                            position,
                            TaskStatus::Failed,
                            TaskError::new(submission_error_kind(&error), error.to_string()),
                        );
                    }
                    Admission::Interrupted(status) => {
                        interrupted = Some(status);
                        break;
                    }
                }
            }
            self.store.update(run.snapshot(WorkflowStatus::Running, started.elapsed()));
            if interrupted.is_some() {
                self.abort_wave(&mut run, &submitted, interrupted).await;
                break;
            }

            let barrier = join_all(submitted.iter().map(|(_, task_id)| self.scheduler.wait(task_id)));
            let finished = tokio::select! {
                biased;
                results = barrier => Some(results),
                () = tokio::time::sleep_until(deadline) => {
                    interrupted = Some(WorkflowStatus::TimedOut);
                    None
                }
                () = cancel.cancelled() => {
                    interrupted = Some(WorkflowStatus::Cancelled);
                    None
                }
            };

            match finished {
                Some(results) => {
                    for ((position, task_id), result) in submitted.iter().zip(results) {
                        match result {
                            Ok(task) => run.record_task(*position, &task),
                            // The record expired while we waited
                            Err(error) => run.record_unsubmitted(
                                *position,
                                TaskStatus::Failed,
                                TaskError::new(
                                    ErrorKind::BackendError,
                                    format!("task {task_id} lost: {error}"),
                                ),
                            ),
                        }
                    }
                    debug!(workflow_id = %id, wave = wave_index, tasks = submitted.len(), "Wave finished");
                }
                None => {
                    self.abort_wave(&mut run, &submitted, interrupted).await;
                    break;
                }
            }
            self.store.update(run.snapshot(WorkflowStatus::Running, started.elapsed()));
        }

        if let Some(status) = interrupted {
            run.record_not_run(status);
        }

        let completed = completed_count(&run.outcomes());
        let status =
            interrupted.unwrap_or_else(|| WorkflowStatus::from_outcomes(completed, dag.len()));
        let result = run.finish(status, started.elapsed());
        self.store.finish(result.clone());

        if let Some(metrics) = &self.metrics {
            metrics.record_workflow(status.as_str(), Some(result.metrics.speedup_factor));
        }
        self.events
            .emit(AuditEvent::WorkflowFinished {
                workflow_id: id.to_string(),
                workflow_type: result.workflow_type.clone(),
                status: status.as_str().to_string(),
                task_count: dag.len(),
                total_latency_ms: result.metrics.total_latency_ms,
                speedup_factor: result.metrics.speedup_factor,
                timestamp: Utc::now(),
            })
            .await;

        info!(
            workflow_id = %id,
            status = %status,
            completed,
            total = dag.len(),
            total_latency_ms = result.metrics.total_latency_ms,
            speedup = result.metrics.speedup_factor,
            "Workflow finished"
        );
        Ok(result)
    }

    /// Latest snapshot of a workflow, running or finished
    ///
    /// # Errors
    /// Returns [`GatewayError::NotFound`] for unknown or expired ids
    pub fn get(&self, id: &WorkflowId) -> GatewayResult<WorkflowResult> {
        self.store
            .get(id)
            .ok_or_else(|| GatewayError::not_found(id.as_str()))
    }

    /// Cancel a running workflow; `false` if it already finished
    ///
    /// # Errors
    /// Returns [`GatewayError::NotFound`] for unknown or expired ids
    pub fn cancel(&self, id: &WorkflowId) -> GatewayResult<bool> {
        let cancelled = self
            .store
            .cancel(id)
            .ok_or_else(|| GatewayError::not_found(id.as_str()))?;
        if cancelled {
            info!(workflow_id = %id, "Workflow cancellation requested");
        }
        Ok(cancelled)
    }

    /// Workflows currently running
    #[must_use]
    pub fn running(&self) -> usize {
        self.store.running()
    }

    /// Submit one task, riding out a full queue until the deadline or
    /// cancellation
    async fn admit(
        &self,
        request: TaskRequest,
        deadline: tokio::time::Instant,
        cancel: &CancellationToken,
    ) -> Admission {
        let mut backoff = QUEUE_RETRY_BASE;
        loop {
            match self.scheduler.submit(request.clone()).await {
                Ok(task_id) => return Admission::Accepted(task_id),
                Err(GatewayError::QueueFull { depth, capacity }) => {
                    debug!(
                        task = request.id.as_ref().map_or("", TaskId::as_str),
                        depth,
                        capacity,
                        backoff_ms = backoff.as_millis() as u64,
                        "Scheduler queue full, resubmitting"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            return Admission::Interrupted(WorkflowStatus::Cancelled);
                        }
                        () = tokio::time::sleep_until(deadline) => {
                            return Admission::Interrupted(WorkflowStatus::TimedOut);
                        }
                        () = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(QUEUE_RETRY_MAX);
                }
                Err(error) => return Admission::Rejected(error),
            }
        }
    }

    async fn abort_wave(
        &self,
        run: &mut WorkflowRun<'_>,
        submitted: &[(usize, TaskId)],
        reason: Option<WorkflowStatus>,
    ) {
        let kind = match reason {
            Some(WorkflowStatus::Cancelled) => ErrorKind::Cancelled,
            _ => ErrorKind::WorkflowTimeout,
        };
        for (position, task_id) in submitted {
            if let Err(error) = self.scheduler.cancel(task_id).await {
                debug!(task_id = %task_id, error = %error, "Cancel during abort failed");
            }
            match self.scheduler.task(task_id) {
                Ok(task) => {
                    run.record_task(*position, &task);
                    if !task.is_terminal() {
                        run.mark_interrupted(*position, kind);
                    }
                }
                Err(_) => run.record_unsubmitted(
                    *position,
                    TaskStatus::Cancelled,
                    TaskError::new(kind, "workflow stopped before the task finished"),
                ),
            }
        }
    }
}

/// How a workflow task submission ended
enum Admission {
    Accepted(TaskId),
    Rejected(GatewayError),
    Interrupted(WorkflowStatus),
}

/// Scheduler request for a workflow task.
///
/// The id is scoped to the workflow so several workflows can reuse local
/// ids; workflow ids never contain the separator, so scoped ids are unique.
/// Dependencies are dropped: the wave barrier already enforces them.
fn scoped_request(workflow_id: &WorkflowId, task: &TaskRequest) -> TaskRequest {
    let local = task.id.as_ref().map_or("", |id| id.as_str());
    TaskRequest {
        id: Some(TaskId::new(format!("{workflow_id}{SCOPE_SEPARATOR}{local}"))),
        dependencies: Vec::new(),
        ..task.clone()
    }
}

fn submission_error_kind(error: &GatewayError) -> ErrorKind {
    match error {
        GatewayError::QueueFull { .. } => ErrorKind::QueueFull,
        GatewayError::Validation { .. }
        | GatewayError::UnknownAgent { .. }
        | GatewayError::DuplicateId { .. } => ErrorKind::Validation,
        _ => ErrorKind::BackendError,
    }
}

/// Mutable state of one executing workflow
struct WorkflowRun<'a> {
    id: WorkflowId,
    request: &'a WorkflowRequest,
    dag: &'a WorkflowDag,
    positions: HashMap<&'a str, usize>,
    outcomes: Vec<Option<WorkflowTaskOutcome>>,
    created_at: DateTime<Utc>,
}

impl<'a> WorkflowRun<'a> {
    fn new(id: WorkflowId, request: &'a WorkflowRequest, dag: &'a WorkflowDag) -> Self {
        let positions = (0..dag.len()).map(|p| (dag.id(p), p)).collect();
        Self {
            id,
            request,
            dag,
            positions,
            outcomes: vec![None; dag.len()],
            created_at: Utc::now(),
        }
    }

    fn blank(&self, position: usize, status: TaskStatus) -> WorkflowTaskOutcome {
        WorkflowTaskOutcome {
            task_id: self.dag.id(position).to_string(),
            scheduler_task_id: None,
            agent_type: self.request.tasks[position].agent_type.clone(),
            wave: self.dag.wave_of(position),
            status,
            result: None,
            error: None,
            submitted_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// First dependency that did not complete, with its status
    fn unfinished_dependency(&self, position: usize) -> Option<(String, TaskStatus)> {
        self.request.tasks[position]
            .dependencies
            .iter()
            .find_map(|dependency| {
                let status = self
                    .positions
                    .get(dependency.as_str())
                    .and_then(|&p| self.outcomes[p].as_ref())
                    .map_or(TaskStatus::Queued, |o| o.status);
                (status != TaskStatus::Completed).then(|| (dependency.to_string(), status))
            })
    }

    fn record_submitted(&mut self, position: usize, task_id: TaskId) {
        let mut outcome = self.blank(position, TaskStatus::Queued);
        outcome.scheduler_task_id = Some(task_id);
        outcome.submitted_at = Some(Utc::now());
        self.outcomes[position] = Some(outcome);
    }

    fn record_unsubmitted(&mut self, position: usize, status: TaskStatus, error: TaskError) {
        let mut outcome = self.blank(position, status);
        if let Some(previous) = &self.outcomes[position] {
            outcome.scheduler_task_id = previous.scheduler_task_id.clone();
            outcome.submitted_at = previous.submitted_at;
        }
        outcome.error = Some(error);
        outcome.completed_at = Some(Utc::now());
        self.outcomes[position] = Some(outcome);
    }

    fn record_task(&mut self, position: usize, task: &Task) {
        let mut outcome = self.blank(position, task.status);
        outcome.scheduler_task_id = Some(task.id.clone());
        outcome.result = task.result.clone();
        outcome.error = task.error.clone();
        outcome.submitted_at = Some(task.submitted_at);
        outcome.started_at = task.started_at;
        outcome.completed_at = task.completed_at;
        self.outcomes[position] = Some(outcome);
    }

    /// Note why a still-running task was abandoned
    fn mark_interrupted(&mut self, position: usize, kind: ErrorKind) {
        if let Some(outcome) = self.outcomes[position].as_mut() {
            outcome.error = Some(TaskError::new(
                kind,
                "workflow stopped before the task finished",
            ));
        }
    }

    /// Every task that never got an outcome becomes CANCELLED
    fn record_not_run(&mut self, reason: WorkflowStatus) {
        let kind = if reason == WorkflowStatus::Cancelled {
            ErrorKind::Cancelled
        } else {
            ErrorKind::WorkflowTimeout
        };
        for position in 0..self.outcomes.len() {
            if self.outcomes[position].is_none() {
                self.record_unsubmitted(
                    position,
                    TaskStatus::Cancelled,
                    TaskError::new(kind, "workflow stopped before the task ran"),
                );
            }
        }
    }

    /// Outcomes recorded so far, in wave order
    fn outcomes(&self) -> Vec<WorkflowTaskOutcome> {
        self.dag
            .waves()
            .iter()
            .flatten()
            .filter_map(|&p| self.outcomes[p].clone())
            .collect()
    }

    fn snapshot(&self, status: WorkflowStatus, elapsed: Duration) -> WorkflowResult {
        let outcomes = self.outcomes();
        WorkflowResult {
            id: self.id.clone(),
            workflow_type: self.request.workflow_type.clone(),
            status,
            context: self.request.context.clone(),
            waves: self.dag.wave_ids(),
            aggregated_result: aggregate(&outcomes),
            metrics: workflow_metrics(&outcomes, self.dag.waves().len(), elapsed),
            tasks: outcomes,
            created_at: self.created_at,
            completed_at: None,
        }
    }

    fn finish(&self, status: WorkflowStatus, elapsed: Duration) -> WorkflowResult {
        WorkflowResult {
            completed_at: Some(Utc::now()),
            ..self.snapshot(status, elapsed)
        }
    }
}

//! HTTP request handlers for the gateway API.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use gateway_core::{
    ErrorBody, GatewayError, Priority, Task, TaskError, TaskId, TaskRequest, TaskResult,
    TaskStatus, WorkflowId,
};
use gateway_orchestrator::{WorkflowRequest, WorkflowResult};
use gateway_scheduler::SchedulerTelemetry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{
    error::ApiError,
    extractors::{JsonBody, RequestId},
    health::{HealthResponse, ReadinessResponse},
    state::AppState,
};

/// Accepted task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Task id
    pub task_id: TaskId,
}

/// One entry of a batch submission response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchItem {
    /// Accepted
    Accepted {
        /// Task id
        task_id: TaskId,
    },
    /// Rejected
    Rejected {
        /// Why
        error: ErrorBody,
    },
}

/// Task status and, once terminal, its outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    /// Task id
    pub task_id: TaskId,
    /// Agent type
    pub agent_type: String,
    /// Status
    pub status: TaskStatus,
    /// Priority at submission
    pub priority: Priority,
    /// Present iff COMPLETED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    /// Present iff FAILED, TIMEOUT or CANCELLED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// Submission time
    pub submitted_at: DateTime<Utc>,
    /// Processing start time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.id,
            agent_type: task.agent_type,
            status: task.status,
            priority: task.priority,
            result: task.result,
            error: task.error,
            submitted_at: task.submitted_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
        }
    }
}

/// Cancellation outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    /// Task or workflow id
    pub id: String,
    /// Whether the cancel took effect
    pub cancelled: bool,
}

/// `POST /v1/tasks`
#[instrument(skip(state, body), fields(request_id = %request_id, agent_type = %body.agent_type))]
pub async fn submit_task(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    JsonBody(body): JsonBody<TaskRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let task_id = state.scheduler.submit(body).await?;
    debug!(task_id = %task_id, "Task accepted");
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { task_id })))
}

/// `POST /v1/tasks/batch`
#[instrument(skip(state, body), fields(request_id = %request_id, tasks = body.len()))]
pub async fn submit_batch(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    JsonBody(body): JsonBody<Vec<TaskRequest>>,
) -> Json<Vec<BatchItem>> {
    let items = state
        .scheduler
        .submit_batch(body)
        .await
        .into_iter()
        .map(|result| match result {
            Ok(task_id) => BatchItem::Accepted { task_id },
            Err(e) => BatchItem::Rejected {
                error: ErrorBody::from(&e),
            },
        })
        .collect();
    Json(items)
}

/// `GET /v1/tasks/{id}`
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskView>, ApiError> {
    let task = state.scheduler.task(&TaskId::from(id))?;
    Ok(Json(task.into()))
}

/// `GET /v1/tasks/{id}/result`; 425 while the task is still running
pub async fn get_task_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskView>, ApiError> {
    let task = state.scheduler.result(&TaskId::from(id))?;
    Ok(Json(task.into()))
}

/// `DELETE /v1/tasks/{id}`
#[instrument(skip(state))]
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let cancelled = state.scheduler.cancel(&TaskId::from(id.as_str())).await?;
    Ok(Json(CancelResponse { id, cancelled }))
}

/// `POST /v1/workflows`; runs the workflow and returns its result
#[instrument(
    skip(state, body),
    fields(request_id = %request_id, workflow_type = %body.workflow_type)
)]
pub async fn execute_workflow(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    JsonBody(body): JsonBody<WorkflowRequest>,
) -> Result<Json<WorkflowResult>, ApiError> {
    let result = state.orchestrator.execute(body).await?;
    info!(
        workflow_id = %result.id,
        status = %result.status,
        speedup = result.metrics.speedup_factor,
        "Workflow request finished"
    );
    Ok(Json(result))
}

/// `GET /v1/workflows/{id}`
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowResult>, ApiError> {
    Ok(Json(state.orchestrator.get(&WorkflowId::new(id))?))
}

/// `DELETE /v1/workflows/{id}`
#[instrument(skip(state))]
pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let cancelled = state.orchestrator.cancel(&WorkflowId::new(id.as_str()))?;
    Ok(Json(CancelResponse { id, cancelled }))
}

/// `GET /v1/telemetry`
pub async fn telemetry(State(state): State<AppState>) -> Json<SchedulerTelemetry> {
    Json(state.scheduler.telemetry())
}

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse::from_components(state.fleet_view().components(), state.uptime());
    let status = StatusCode::from_u16(response.status.http_status_code())
        .unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
    (status, Json(response))
}

/// `GET /ready`
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let readiness = state.fleet_view().readiness();
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness))
}

/// `GET /metrics` (Prometheus format)
pub async fn metrics_endpoint(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state
        .metrics
        .render()
        .map_err(|e| ApiError::internal(format!("Failed to render metrics: {e}")))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

/// Fallback for unknown paths
pub async fn not_found() -> ApiError {
    ApiError::from(GatewayError::not_found("route"))
}

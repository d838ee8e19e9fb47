//! Route definitions for the gateway API.

use axum::{
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

use crate::{handlers, middleware, state::AppState};

/// Create the main API router
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        // Metrics endpoint
        .route("/metrics", get(handlers::metrics_endpoint))
        .nest("/v1", api_routes(state.clone()))
        .fallback(handlers::not_found)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::trace_layer())
        .layer(middleware::propagate_request_id_layer())
        .layer(middleware::set_request_id_layer())
        .with_state(state)
}

/// Task, workflow and telemetry routes; refused while shutting down
fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/tasks", post(handlers::submit_task))
        .route("/tasks/batch", post(handlers::submit_batch))
        .route(
            "/tasks/:id",
            get(handlers::get_task).delete(handlers::cancel_task),
        )
        .route("/tasks/:id/result", get(handlers::get_task_result))
        .route("/workflows", post(handlers::execute_workflow))
        .route(
            "/workflows/:id",
            get(handlers::get_workflow).delete(handlers::cancel_workflow),
        )
        .route("/telemetry", get(handlers::telemetry))
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::in_flight_middleware,
        ))
}

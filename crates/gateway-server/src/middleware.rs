//! Request middleware.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::{error::ApiError, shutdown::RequestGuard, state::AppState};

/// Header carrying the request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Count the request as in flight; refuse it once shutdown has started
pub async fn in_flight_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(_guard) = RequestGuard::new(state.shutdown.clone()) else {
        return ApiError::shutting_down().into_response();
    };
    next.run(request).await
}

/// Assign an `x-request-id` when the caller sent none
#[must_use]
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(
        http::HeaderName::from_static(REQUEST_ID_HEADER),
        MakeRequestUuid,
    )
}

/// Echo the request id on the response
#[must_use]
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(http::HeaderName::from_static(REQUEST_ID_HEADER))
}

/// Span and completion log per request
#[must_use]
pub fn trace_layer() -> TraceLayer<
    tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG))
}

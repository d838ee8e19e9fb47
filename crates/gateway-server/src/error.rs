//! API error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gateway_core::{ErrorBody, GatewayError};
use serde::Serialize;
use tracing::{error, warn};

/// Error returned by handlers, rendered as `{"error": {code, message, field?}}`
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    /// HTTP status
    pub status: StatusCode,
    /// Machine readable code
    pub code: String,
    /// Human readable message
    pub message: String,
    /// Offending field, if any
    pub field: Option<String>,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

impl ApiError {
    /// Malformed request body or path
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_request".to_string(),
            message: message.into(),
            field: None,
        }
    }

    /// The gateway is draining and refuses new work
    #[must_use]
    pub fn shutting_down() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "shutting_down".to_string(),
            message: "Gateway is shutting down".to_string(),
            field: None,
        }
    }

    /// The request exceeded the server's request timeout
    #[must_use]
    pub fn request_timeout() -> Self {
        Self {
            status: StatusCode::REQUEST_TIMEOUT,
            code: "request_timeout".to_string(),
            message: "Request timed out".to_string(),
            field: None,
        }
    }

    /// Unexpected server-side failure
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error".to_string(),
            message: message.into(),
            field: None,
        }
    }

    /// Serializable body
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code.clone(),
            message: self.message.clone(),
            field: self.field.clone(),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        let body = ErrorBody::from(&error);
        Self {
            status: StatusCode::from_u16(error.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            code: body.code,
            message: body.message,
            field: body.field,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = %self.code, message = %self.message, "Request failed");
        } else {
            warn!(status = self.status.as_u16(), code = %self.code, "Request rejected");
        }
        let envelope = ErrorEnvelope { error: self.body() };
        (self.status, Json(envelope)).into_response()
    }
}

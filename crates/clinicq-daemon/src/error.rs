//! Error types for clinicqd

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use clinicq_core::FlowError;
use clinicq_types::IdParseError;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed path or body
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Flow operation failed
    #[error(transparent)]
    Flow(#[from] FlowError),
}

impl From<IdParseError> for ApiError {
    fn from(err: IdParseError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Flow(err) => match err {
                FlowError::NoAuthorization { .. } => (StatusCode::NOT_FOUND, "NO_AUTHORIZATION"),
                FlowError::WrongCounter { .. } => (StatusCode::CONFLICT, "WRONG_COUNTER"),
                FlowError::AlreadyResolved { .. } => (StatusCode::CONFLICT, "ALREADY_RESOLVED"),
                FlowError::ConflictingEntry { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "CONFLICTING_ENTRY")
                }
                FlowError::QueueEmpty { .. } => (StatusCode::NOT_FOUND, "QUEUE_EMPTY"),
                FlowError::VerificationFailed { .. } => {
                    (StatusCode::UNAUTHORIZED, "VERIFICATION_FAILED")
                }
                FlowError::VerificationExpired { .. } => (StatusCode::GONE, "VERIFICATION_EXPIRED"),
                FlowError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                FlowError::InvalidState(_) => (StatusCode::CONFLICT, "INVALID_STATE"),
                FlowError::Store(store) if store.is_transient() => {
                    (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
                }
                FlowError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
            },
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::Flow(FlowError::WrongCounter {
                expected, actual, ..
            }) => Some(json!({ "expected": expected, "actual": actual })),
            ApiError::Flow(FlowError::AlreadyResolved { state, .. }) => {
                Some(json!({ "state": state }))
            }
            ApiError::Flow(FlowError::ConflictingEntry {
                existing_counter, ..
            }) => Some(json!({ "existingCounter": existing_counter })),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(code, error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details: self.details(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

//! HTTP error responses.
//!
//! Service failures arrive as `Report<ServiceError>`; the current context
//! picks the status code and a user-safe message. Details of internal
//! failures are logged, not returned.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use boardflow_flow::ServiceError;
use rootcause::Report;
use serde_json::json;
use std::fmt;

/// Errors returned by API handlers.
#[derive(Debug)]
pub enum ApiError {
    /// A flow service operation failed.
    Service(Report<ServiceError>),
    /// A path parameter was not a valid flow id.
    InvalidFlowId { id: String, reason: String },
}

impl From<Report<ServiceError>> for ApiError {
    fn from(report: Report<ServiceError>) -> Self {
        Self::Service(report)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(report) => write!(f, "{}", report.current_context()),
            Self::InvalidFlowId { id, reason } => {
                write!(f, "invalid flow id '{}': {}", id, reason)
            }
        }
    }
}

impl ApiError {
    /// Returns the HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Service(report) => match report.current_context() {
                ServiceError::AlreadyRunning { .. } => StatusCode::CONFLICT,
                ServiceError::FlowNotFound { .. } => StatusCode::NOT_FOUND,
                ServiceError::AccessDenied { .. } => StatusCode::FORBIDDEN,
                ServiceError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::InvalidFlowId { .. } => StatusCode::BAD_REQUEST,
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Service(report) => match report.current_context() {
                ServiceError::AlreadyRunning { .. } => "Flow is already running".to_string(),
                ServiceError::FlowNotFound { .. } => "Flow not found".to_string(),
                ServiceError::AccessDenied { .. } => "Access denied".to_string(),
                ServiceError::Store { .. } => "Database error".to_string(),
            },
            Self::InvalidFlowId { .. } => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

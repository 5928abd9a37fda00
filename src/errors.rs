//! Application error taxonomy.
//!
//! Errors are grouped by how the caller is expected to react:
//! - `InvalidRequest` - malformed input, surfaced as 400
//! - `NotConfigured` - a required piece of configuration is missing
//! - `Upstream` - the telephony or voice-AI vendor call failed
//! - `NotFound` - unknown call identifier
//! - `Capacity` - no free audio-bridge resource
//!
//! Webhook handlers never propagate these as non-200 responses; API handlers
//! return them directly via the `IntoResponse` impl below.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Errors that can occur while servicing API requests and driving calls.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or missing input from the caller
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Required configuration is missing (e.g. no outbound phone number)
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// A vendor call (telephony placement, voice-AI session) failed
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Unknown call identifier
    #[error("not found: {0}")]
    NotFound(String),

    /// No free audio-bridge resource is available
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for application operations.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// HTTP status the error maps to when surfaced through the API.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::NotConfigured(_) => "not_configured",
            AppError::Upstream(_) => "upstream_error",
            AppError::NotFound(_) => "not_found",
            AppError::Capacity(_) => "capacity_exceeded",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "success": false,
            "error": self.code(),
            "detail": self.to_string(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::InvalidRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotConfigured("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Upstream("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Capacity("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_display() {
        let err = AppError::NotFound("call abc".to_string());
        assert_eq!(err.to_string(), "not found: call abc");
        assert_eq!(err.code(), "not_found");
    }
}

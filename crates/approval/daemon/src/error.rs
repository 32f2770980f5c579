//! Error types for approvald

use approval_engine::EngineError;
use approval_types::ApprovalError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
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

    /// Storage backend could not be opened
    #[error("Storage error: {0}")]
    Storage(String),

    /// In-flight approvals could not be re-armed
    #[error("Recovery error: {0}")]
    Recovery(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Caller may not act on this approval
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Service is going away
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Approval(inner) => match inner {
                ApprovalError::NotFound(_) => ApiError::NotFound(inner.to_string()),
                ApprovalError::UnauthorizedApprover { .. } => ApiError::Forbidden(inner.to_string()),
                ApprovalError::InvalidChain(_) | ApprovalError::InvalidTransition(_) => {
                    ApiError::Validation(inner.to_string())
                }
                ApprovalError::AlreadyResolved { .. } => ApiError::Conflict(inner.to_string()),
            },
            EngineError::Intake(inner) => ApiError::BadRequest(inner.to_string()),
            EngineError::ShuttingDown => ApiError::Unavailable(err.to_string()),
            EngineError::Storage(_) | EngineError::Recovery(_) => ApiError::Internal(err.to_string()),
        }
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

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "UNAUTHORIZED_APPROVER"),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;
    use approval_engine::IntakeError;
    use approval_types::{ApprovalId, ApproverId};

    #[test]
    fn test_engine_errors_map_to_status_codes() {
        let id = ApprovalId::generate();
        let cases = [
            (
                EngineError::from(ApprovalError::NotFound(id.clone())),
                StatusCode::NOT_FOUND,
            ),
            (
                EngineError::from(ApprovalError::UnauthorizedApprover {
                    id: id.clone(),
                    approver: ApproverId::new("mallory"),
                }),
                StatusCode::FORBIDDEN,
            ),
            (
                EngineError::from(ApprovalError::InvalidChain("empty".into())),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                EngineError::from(IntakeError::MissingApprovalId),
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::Recovery("store down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }
}

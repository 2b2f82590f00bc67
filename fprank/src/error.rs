//! Error types for the HTTP surface

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// fprank-common error
    #[error(transparent)]
    Common(#[from] fprank_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        use fprank_common::Error as CommonError;

        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(CommonError::InvalidInput(msg)) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Common(CommonError::NotFound(msg)) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Common(ref err @ CommonError::Database(_)) => {
                tracing::error!(error = %err, "Database error while handling request");
                (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", err.to_string())
            }
            ApiError::Common(ref err) => (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR", err.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

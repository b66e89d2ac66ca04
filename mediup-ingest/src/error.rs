//! Error types for mediup-ingest
//!
//! Handlers return `ApiResult<T>`; every error renders as
//! `{"error": {"code": ..., "message": ...}}` with a matching status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::TransferError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Upload stream failed or disagreed with its manifest
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// mediup-common error
    #[error("Common error: {0}")]
    Common(#[from] mediup_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
            ApiError::Transfer(ref err) => match err {
                TransferError::Write(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STAGING_FAILED",
                    err.to_string(),
                ),
                TransferError::Stream(_) => {
                    (StatusCode::BAD_REQUEST, "TRANSFER_FAILED", err.to_string())
                }
                TransferError::SizeMismatch { .. }
                | TransferError::MissingFiles { .. }
                | TransferError::UnexpectedFile(_) => {
                    (StatusCode::BAD_REQUEST, "MANIFEST_MISMATCH", err.to_string())
                }
            },
            ApiError::Common(ref err) => match err {
                mediup_common::Error::InvalidInput(msg) => {
                    (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone())
                }
                mediup_common::Error::NotFound(msg) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone())
                }
                mediup_common::Error::Conflict(msg) => {
                    (StatusCode::CONFLICT, "CONFLICT", msg.clone())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMMON_ERROR",
                    err.to_string(),
                ),
            },
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (
                ApiError::Common(mediup_common::Error::InvalidInput("x".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Transfer(TransferError::MissingFiles { expected: 2, received: 1 }),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Common(mediup_common::Error::Conflict("x".into())),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::Common(mediup_common::Error::Internal("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}

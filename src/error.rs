/// Unified error types for the Anteroom admission service
use crate::invitation::SecurityViolation;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for admission operations
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unknown invitation or waiting entry
    #[error("Not found: {0}")]
    NotFound(String),

    /// Attempt to transition an invitation out of a terminal status
    #[error("Invitation is no longer active: {0}")]
    AlreadyTerminal(String),

    /// Acting on a waiting entry that is not in `waiting` status
    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    /// Admit called with a room that does not match the waiting entry
    #[error("Room mismatch")]
    RoomMismatch,

    /// Malformed, expired, or wrong-signature token. Deliberately
    /// undifferentiated to callers to prevent probing.
    #[error("Invalid or expired token")]
    TokenInvalid,

    /// One or more security checks failed
    #[error("Access denied")]
    SecurityDenied { violations: Vec<SecurityViolation> },

    /// Malformed input (constraint shape, bad email, unknown browser)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Store or geolocation dependency down
    #[error("Infrastructure unavailable: {0}")]
    Infrastructure(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// JSON error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<SecurityViolation>>,
}

/// Convert AdmissionError to HTTP response
impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let (status, error_code, message, violations) = match self {
            AdmissionError::NotFound(_) => {
                (StatusCode::NOT_FOUND, "NotFound", self.to_string(), None)
            }
            AdmissionError::AlreadyTerminal(_) => (
                StatusCode::CONFLICT,
                "AlreadyTerminal",
                self.to_string(),
                None,
            ),
            AdmissionError::InvalidStatus(_) => (
                StatusCode::CONFLICT,
                "InvalidStatus",
                self.to_string(),
                None,
            ),
            AdmissionError::RoomMismatch => (
                StatusCode::CONFLICT,
                "RoomMismatch",
                self.to_string(),
                None,
            ),
            AdmissionError::TokenInvalid => (
                StatusCode::UNAUTHORIZED,
                "InvalidToken",
                "Invalid or expired token".to_string(),
                None,
            ),
            AdmissionError::SecurityDenied { violations } => (
                StatusCode::FORBIDDEN,
                "AccessDenied",
                "Access denied".to_string(),
                Some(violations),
            ),
            AdmissionError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
                None,
            ),
            AdmissionError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RateLimitExceeded",
                "Rate limit exceeded".to_string(),
                None,
            ),
            AdmissionError::Infrastructure(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InfrastructureUnavailable",
                "Service temporarily unavailable".to_string(),
                None,
            ),
            AdmissionError::Database(_) | AdmissionError::Internal(_) | AdmissionError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
            violations,
        });

        (status, body).into_response()
    }
}

/// Result type alias for admission operations
pub type AdmissionResult<T> = Result<T, AdmissionError>;

//! Error types for gotm-bot
//!
//! - `BotError::Store`: key-value backend failure, retryable, never swallowed
//! - `BotError::Remote`: one chat-server call failed
//! - `BotError::Config`: fatal at startup
//!
//! An uninitialized guild is not an error: the election engine reports it as
//! a skipped outcome and retries next cycle.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use gotm_common::api::auth::ApiAuthError;

use crate::chat::ChatError;

#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Store(#[from] gotm_common::Error),

    #[error("Remote resource error: {0}")]
    Remote(#[from] ChatError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BotError {
    pub fn is_retryable(&self) -> bool {
        match self {
            BotError::Store(e) => e.is_retryable(),
            BotError::Remote(_) => true,
            BotError::Config(_) => false,
        }
    }
}

/// API error type
///
/// Messages are short and user-facing; internal detail is logged, not
/// returned.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request understood but refused by a vote rule (400)
    #[error("{0}")]
    Rejected(String),

    /// Malformed request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend temporarily unavailable (503)
    #[error("{0}")]
    Unavailable(String),

    /// Request timestamp outside the accepted window (401)
    #[error("Invalid timestamp: {0}")]
    StaleRequest(String),

    /// Body hash does not match the shared secret (401)
    #[error("Invalid hash")]
    BadSignature,

    /// Body lacks `timestamp` or `hash` (400)
    #[error("Missing required fields: {0}")]
    Unsigned(String),

    /// Body unreadable or not JSON (400)
    #[error("Parse error: {0}")]
    MalformedBody(String),
}

impl From<ApiAuthError> for ApiError {
    fn from(e: ApiAuthError) -> Self {
        match e {
            ApiAuthError::InvalidTimestamp { reason, .. } => ApiError::StaleRequest(reason),
            ApiAuthError::InvalidHash { .. } => ApiError::BadSignature,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, error_code) = match self {
            ApiError::Rejected(_) => (StatusCode::BAD_REQUEST, "VOTE_REJECTED"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE"),
            ApiError::StaleRequest(_) => (StatusCode::UNAUTHORIZED, "INVALID_TIMESTAMP"),
            ApiError::BadSignature => (StatusCode::UNAUTHORIZED, "INVALID_HASH"),
            ApiError::Unsigned(_) => (StatusCode::BAD_REQUEST, "MISSING_FIELDS"),
            ApiError::MalformedBody(_) => (StatusCode::BAD_REQUEST, "PARSE_ERROR"),
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

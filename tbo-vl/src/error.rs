//! Error types for tbo-vl
//!
//! `Error` is the engine taxonomy; `ApiError` adds the HTTP-only cases and
//! maps everything onto status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::entitlement::AccessReason;

/// Entitlement engine error
#[derive(Error, Debug)]
pub enum Error {
    /// Content or record absent where one is required
    #[error("Not found: {0}")]
    NotFound(String),

    /// Premium content without a qualifying grant
    #[error("Payment required for content {content_id}")]
    PaymentRequired { content_id: Uuid },

    /// Progress beyond the permitted window, or access the resolver denied
    #[error("Boundary violation on content {content_id}: {reason} (reported {reported_seconds}s, permitted {max_playback_seconds:?})")]
    BoundaryViolation {
        content_id: Uuid,
        reason: AccessReason,
        reported_seconds: f64,
        max_playback_seconds: Option<f64>,
    },

    /// Concurrent write on the same (user, content) key; retried before surfacing
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Input or stored state that violates an invariant
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Common error: {0}")]
    Common(#[from] tbo_common::Error),
}

impl Error {
    /// Whether another attempt of the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

impl From<sqlx::Error> for Error {
    /// Lock contention and unique-key races are conflicts, not failures
    fn from(err: sqlx::Error) -> Self {
        if is_write_conflict(&err) {
            Error::Conflict(err.to_string())
        } else {
            Error::Database(err)
        }
    }
}

/// SQLite signals for a lost write race
fn is_write_conflict(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        return false;
    };
    if db_err.is_unique_violation() {
        return true;
    }
    // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_BUSY_SNAPSHOT (517)
    if matches!(db_err.code().as_deref(), Some("5") | Some("6") | Some("517")) {
        return true;
    }
    db_err.message().contains("database is locked")
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP API error
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] Error),

    /// Malformed request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing or invalid credentials (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Engine(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details): (StatusCode, &str, String, Value) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, Value::Null),
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, Value::Null)
            }
            ApiError::Engine(err) => {
                let message = err.to_string();
                match err {
                    Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", message, Value::Null),
                    Error::PaymentRequired { content_id } => (
                        StatusCode::PAYMENT_REQUIRED,
                        "PAYMENT_REQUIRED",
                        message,
                        json!({ "content_id": content_id }),
                    ),
                    Error::BoundaryViolation {
                        content_id,
                        reason,
                        reported_seconds,
                        max_playback_seconds,
                    } => (
                        StatusCode::FORBIDDEN,
                        "BOUNDARY_VIOLATION",
                        message,
                        json!({
                            "content_id": content_id,
                            "reason": reason,
                            "reported_seconds": reported_seconds,
                            "max_playback_seconds": max_playback_seconds,
                        }),
                    ),
                    Error::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT", message, Value::Null),
                    Error::InvalidState(_) => (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        "INVALID_STATE",
                        message,
                        Value::Null,
                    ),
                    Error::Database(_) | Error::Common(_) => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        message,
                        Value::Null,
                    ),
                }
            }
        };

        let mut error = json!({
            "code": code,
            "message": message,
        });
        if let (Some(obj), Value::Object(extra)) = (error.as_object_mut(), details) {
            obj.extend(extra);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

//! Request authentication
//!
//! `auth_middleware` validates the timestamp and request hash on `/api/*`
//! routes. `Principal` extracts the learner identity from `x-tbo-user`;
//! there is no fallback identity, so learner handlers that take a
//! `Principal` reject requests without one.

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tbo_common::api::{
    calculate_hash, validate_hash, validate_timestamp, ApiAuthError, HASH_HEADER,
    TIMESTAMP_HEADER, USER_HEADER,
};
use tbo_common::time::now_millis;
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppState;

/// Largest request body accepted for hashing
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Validate timestamp and hash, then hand the request on with its body restored
///
/// A shared secret of 0 disables the check.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.shared_secret == 0 {
        return Ok(next.run(request).await);
    }

    let (parts, body) = request.into_parts();

    let timestamp = header_str(&parts.headers, TIMESTAMP_HEADER)?
        .parse::<i64>()
        .map_err(|e| ApiError::Unauthorized(format!("Invalid {}: {}", TIMESTAMP_HEADER, e)))?;
    let provided_hash = header_str(&parts.headers, HASH_HEADER)?.to_string();
    let user = parts
        .headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    validate_timestamp(timestamp, now_millis()).map_err(auth_failure)?;

    let body_bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read body: {}", e)))?;

    let calculated = calculate_hash(
        timestamp,
        parts.method.as_str(),
        parts.uri.path(),
        user.as_deref(),
        &body_bytes,
        state.shared_secret,
    );
    validate_hash(&provided_hash, &calculated).map_err(auth_failure)?;

    let request = Request::from_parts(parts, Body::from(body_bytes));
    Ok(next.run(request).await)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, ApiError> {
    headers
        .get(name)
        .ok_or_else(|| auth_failure(ApiAuthError::MissingHeader(name)))?
        .to_str()
        .map_err(|e| ApiError::Unauthorized(format!("Invalid {}: {}", name, e)))
}

fn auth_failure(err: ApiAuthError) -> ApiError {
    match &err {
        ApiAuthError::InvalidHash { provided, calculated } => {
            warn!("Hash validation failed: provided={}, calculated={}", provided, calculated);
        }
        ApiAuthError::InvalidTimestamp { reason, .. } => {
            warn!("Timestamp validation failed: {}", reason);
        }
        _ => {}
    }
    ApiError::Unauthorized(err.to_string())
}

/// The authenticated learner making the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("Missing header: {}", USER_HEADER)))?
            .to_str()
            .map_err(|e| ApiError::BadRequest(format!("Invalid {}: {}", USER_HEADER, e)))?;

        Uuid::parse_str(raw.trim())
            .map(Principal)
            .map_err(|e| ApiError::BadRequest(format!("Invalid {}: {}", USER_HEADER, e)))
    }
}

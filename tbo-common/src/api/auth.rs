//! API authentication via timestamp and request hash
//!
//! Every authenticated request carries:
//! - `x-tbo-timestamp`: Unix epoch milliseconds
//! - `x-tbo-hash`: SHA-256 (hex) of the signing payload plus the shared secret
//! - `x-tbo-user` (learner endpoints): the authenticated principal's UUID
//!
//! Signing payload: `"{timestamp}\n{METHOD}\n{path}\n{user}\n{body}"` followed
//! directly by the shared secret as a decimal i64. The principal is part of the
//! signed payload, so it cannot be swapped without the secret.
//!
//! The shared secret lives in `settings.api_shared_secret`; `0` disables
//! authentication.

use sha2::{Digest, Sha256};
use thiserror::Error;

#[cfg(feature = "sqlx")]
use sqlx::SqlitePool;

pub const TIMESTAMP_HEADER: &str = "x-tbo-timestamp";
pub const HASH_HEADER: &str = "x-tbo-hash";
pub const USER_HEADER: &str = "x-tbo-user";

/// Accepted age of a request timestamp
pub const MAX_PAST_MS: i64 = 30_000;
/// Accepted clock skew into the future
pub const MAX_FUTURE_MS: i64 = 1_000;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiAuthError {
    #[error("Invalid timestamp: {reason}")]
    InvalidTimestamp { timestamp: i64, now: i64, reason: String },

    #[error("Invalid hash")]
    InvalidHash { provided: String, calculated: String },

    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Load the shared secret, generating one on first use
#[cfg(feature = "sqlx")]
pub async fn load_shared_secret(db: &SqlitePool) -> Result<i64, ApiAuthError> {
    let stored: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = 'api_shared_secret'")
            .fetch_optional(db)
            .await
            .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    match stored.flatten() {
        Some(value) => value
            .trim()
            .parse::<i64>()
            .map_err(|e| ApiAuthError::DatabaseError(format!("Invalid api_shared_secret: {}", e))),
        None => initialize_shared_secret(db).await,
    }
}

/// Generate and store a random non-zero secret
#[cfg(feature = "sqlx")]
pub async fn initialize_shared_secret(db: &SqlitePool) -> Result<i64, ApiAuthError> {
    use rand::Rng;

    let secret: i64 = {
        let mut rng = rand::thread_rng();
        loop {
            let val = rng.gen::<i64>();
            if val != 0 {
                break val;
            }
        }
    };

    sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES ('api_shared_secret', ?)")
        .bind(secret.to_string())
        .execute(db)
        .await
        .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    Ok(secret)
}

/// Check `timestamp` against `now` (both Unix ms)
pub fn validate_timestamp(timestamp: i64, now: i64) -> Result<(), ApiAuthError> {
    let age = now - timestamp;

    if age > MAX_PAST_MS {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!("{}ms old (max {}ms)", age, MAX_PAST_MS),
        });
    }

    if -age > MAX_FUTURE_MS {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!("{}ms in the future (max {}ms)", -age, MAX_FUTURE_MS),
        });
    }

    Ok(())
}

/// Calculate the request hash
///
/// # Examples
///
/// ```
/// use tbo_common::api::auth::calculate_hash;
///
/// let hash = calculate_hash(1_780_000_000_000, "POST", "/api/payments/confirmed", None, b"{}", 42);
/// assert_eq!(hash.len(), 64);
/// ```
pub fn calculate_hash(
    timestamp: i64,
    method: &str,
    path: &str,
    user: Option<&str>,
    body: &[u8],
    shared_secret: i64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    hasher.update(user.unwrap_or("").as_bytes());
    hasher.update(b"\n");
    hasher.update(body);
    hasher.update(shared_secret.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compare a provided hash with the calculated one (case-insensitive hex)
pub fn validate_hash(provided: &str, calculated: &str) -> Result<(), ApiAuthError> {
    if provided.eq_ignore_ascii_case(calculated) {
        Ok(())
    } else {
        Err(ApiAuthError::InvalidHash {
            provided: provided.to_string(),
            calculated: calculated.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_780_000_000_000;

    #[test]
    fn test_timestamp_window() {
        assert!(validate_timestamp(NOW, NOW).is_ok());
        assert!(validate_timestamp(NOW - MAX_PAST_MS, NOW).is_ok());
        assert!(validate_timestamp(NOW - MAX_PAST_MS - 1, NOW).is_err());
        assert!(validate_timestamp(NOW + MAX_FUTURE_MS, NOW).is_ok());
        assert!(validate_timestamp(NOW + MAX_FUTURE_MS + 1, NOW).is_err());
    }

    #[test]
    fn test_hash_binds_principal_and_body() {
        let base = calculate_hash(NOW, "post", "/api/x", Some("u1"), b"{}", 7);
        assert_eq!(base, calculate_hash(NOW, "POST", "/api/x", Some("u1"), b"{}", 7));
        assert_ne!(base, calculate_hash(NOW, "POST", "/api/x", Some("u2"), b"{}", 7));
        assert_ne!(base, calculate_hash(NOW, "POST", "/api/x", Some("u1"), b"{ }", 7));
        assert_ne!(base, calculate_hash(NOW, "POST", "/api/x", Some("u1"), b"{}", 8));
    }

    #[test]
    fn test_validate_hash_case_insensitive() {
        let hash = calculate_hash(NOW, "GET", "/api/library", None, b"", 1);
        assert!(validate_hash(&hash.to_uppercase(), &hash).is_ok());
        assert!(matches!(
            validate_hash("00", &hash),
            Err(ApiAuthError::InvalidHash { .. })
        ));
    }
}

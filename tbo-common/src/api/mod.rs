//! Shared HTTP API functionality
//!
//! Contains only pure functions and database operations; each service wraps
//! them in its own axum middleware.

pub mod auth;

pub use auth::{
    calculate_hash, initialize_shared_secret, load_shared_secret, validate_hash,
    validate_timestamp, ApiAuthError, HASH_HEADER, TIMESTAMP_HEADER, USER_HEADER,
};

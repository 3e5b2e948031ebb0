//! Shared error type for TBO crates
//!
//! Covers bootstrap and storage failures raised inside `tbo-common`. Service
//! crates wrap it in their own error enums.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Pool setup, schema creation or migration failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Reading a config or catalog file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unparsable TOML configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown enum name, invalid catalog entry or malformed stored value
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

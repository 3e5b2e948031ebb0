//! # TBO Common Library
//!
//! Shared code for the training back-office services:
//! - Database initialization, migrations and catalog models
//! - Event types (`TboEvent`) and the `EventBus`
//! - Shared-secret API authentication primitives
//! - Configuration loading and root folder resolution
//! - SSE helpers and timestamp utilities

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;
pub mod time;

pub use error::{Error, Result};

//! Runtime settings for the entitlement engine
//!
//! Read from the `settings` table at startup. Defaults are written by
//! `tbo_common::db::init_database`, so missing or unparsable values only
//! occur when the table was edited by hand; those fall back to the compiled
//! default with a warning.

use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::Result;

/// Conflict-retry and event-bus tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Retries after the first attempt before `Conflict` surfaces
    pub conflict_max_retries: u32,
    /// First backoff delay; doubles per retry
    pub conflict_backoff_ms: u64,
    pub event_bus_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            conflict_max_retries: 5,
            conflict_backoff_ms: 5,
            event_bus_capacity: 1000,
        }
    }
}

impl EngineSettings {
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let defaults = Self::default();
        let settings = Self {
            conflict_max_retries: get_setting(
                pool,
                "entitlement_conflict_max_retries",
                defaults.conflict_max_retries,
            )
            .await?,
            conflict_backoff_ms: get_setting(
                pool,
                "entitlement_conflict_backoff_ms",
                defaults.conflict_backoff_ms,
            )
            .await?,
            event_bus_capacity: get_setting(pool, "event_bus_capacity", defaults.event_bus_capacity)
                .await?,
        };

        info!(
            conflict_max_retries = settings.conflict_max_retries,
            conflict_backoff_ms = settings.conflict_backoff_ms,
            event_bus_capacity = settings.event_bus_capacity,
            "Loaded engine settings"
        );
        Ok(settings)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.conflict_backoff_ms)
    }
}

async fn get_setting<T>(pool: &SqlitePool, key: &str, default: T) -> Result<T>
where
    T: FromStr + std::fmt::Display + Copy,
{
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match value.flatten() {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(_) => {
                warn!("Setting '{}' has invalid value '{}', using default {}", key, raw, default);
                Ok(default)
            }
        },
        None => Ok(default),
    }
}

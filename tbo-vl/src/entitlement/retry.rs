//! Conflict retry with exponential backoff
//!
//! Every entitlement write runs as a closure that opens its own transaction,
//! so a retry re-reads the row and recomputes the new state from scratch.

use std::time::{Duration, Instant};

use crate::config::EngineSettings;
use crate::error::{Error, Result};

/// Longest single backoff sleep
const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// Bounded retry policy for write conflicts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl From<&EngineSettings> for RetryPolicy {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            max_retries: settings.conflict_max_retries,
            initial_backoff: settings.initial_backoff(),
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// exhausts `policy.max_retries` retries
///
/// Only [`Error::Conflict`] is retried. On exhaustion the last conflict is
/// returned unchanged.
pub async fn retry_on_conflict<F, Fut, T>(
    operation_name: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let mut attempt: u32 = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Entitlement write succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if err.is_retryable() => {
                if attempt > policy.max_retries {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        error = %err,
                        "Entitlement write conflict: retries exhausted"
                    );
                    return Err(err);
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Entitlement write conflict, will retry after backoff"
                );

                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Conflict raised when a versioned update touched no row
pub(crate) fn stale_write(user_id: uuid::Uuid, content_id: uuid::Uuid) -> Error {
    Error::Conflict(format!(
        "Entitlement ({}, {}) changed during update",
        user_id, content_id
    ))
}

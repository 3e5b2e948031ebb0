//! Database schema migrations
//!
//! Versioned, idempotent schema changes applied after the baseline
//! `CREATE TABLE IF NOT EXISTS` pass. The `schema_version` table records
//! which versions have run.
//!
//! # Migration Guidelines
//!
//! 1. Never modify an existing migration; add a new one.
//! 2. Every migration must be safe to re-run (check before altering).
//! 3. Prefer `ALTER TABLE` / `CREATE INDEX IF NOT EXISTS` over drop-and-recreate.

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// Increment this when adding a migration.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version (0 when nothing has been recorded)
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({}); proceeding",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: learner library ordering
///
/// The library view lists a user's records most recently watched first.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entitlements_user_last_watched \
         ON entitlements (user_id, last_watched_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Migration v2: receipts lookup by (user, content)
///
/// Older databases may predate `progress_schema`; add it before indexing.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    let has_column: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('entitlements') WHERE name = 'progress_schema'",
    )
    .fetch_one(pool)
    .await?;

    if has_column == 0 {
        sqlx::query(
            "ALTER TABLE entitlements ADD COLUMN progress_schema INTEGER NOT NULL DEFAULT 1",
        )
        .execute(pool)
        .await?;
        info!("Migration v2: added progress_schema to entitlements");
    }

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_payment_receipts_user_content \
         ON payment_receipts (user_id, content_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

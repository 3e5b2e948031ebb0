//! Database initialization
//!
//! Creates the database on first run and brings an existing one up to the
//! current schema. Safe to call on every startup: every statement is
//! `IF NOT EXISTS` / `INSERT OR IGNORE`, followed by versioned migrations.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Busy timeout applied to every connection before settings are readable
const BOOTSTRAP_BUSY_TIMEOUT_MS: i64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .min_connections(2)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                // Per-connection pragmas: each pooled connection needs its own
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query(&format!("PRAGMA busy_timeout = {}", BOOTSTRAP_BUSY_TIMEOUT_MS))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets playback readers proceed while a grant or progress write commits
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    create_schema_version_table(&pool).await?;
    create_settings_table(&pool).await?;
    create_content_items_table(&pool).await?;
    create_entitlements_table(&pool).await?;
    create_payment_receipts_table(&pool).await?;

    crate::db::migrations::run_migrations(&pool).await?;

    init_default_settings(&pool).await?;

    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores runtime configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Catalog projection read by the entitlement engine
///
/// Owned by the catalog; services only read it (plus the bulk import used
/// for seeding).
async fn create_content_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_items (
            guid TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            access_tier TEXT NOT NULL CHECK (access_tier IN ('free', 'preview', 'premium')),
            price_minor INTEGER NOT NULL DEFAULT 0 CHECK (price_minor >= 0),
            currency TEXT NOT NULL DEFAULT 'INR',
            total_duration_seconds REAL NOT NULL CHECK (total_duration_seconds > 0),
            preview_duration_seconds REAL NOT NULL DEFAULT 0 CHECK (preview_duration_seconds >= 0),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One row per (user, content); the primary key enforces the single-record rule
async fn create_entitlements_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entitlements (
            user_id TEXT NOT NULL,
            content_id TEXT NOT NULL REFERENCES content_items(guid),
            access_type TEXT NOT NULL CHECK (access_type IN ('free', 'preview', 'premium')),
            payment_ref TEXT,
            granted_at TEXT NOT NULL,
            expires_at TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            current_position_seconds REAL NOT NULL DEFAULT 0 CHECK (current_position_seconds >= 0),
            total_duration_seconds REAL NOT NULL CHECK (total_duration_seconds > 0),
            percentage REAL NOT NULL DEFAULT 0 CHECK (percentage >= 0 AND percentage <= 100),
            last_watched_at TEXT,
            watch_session_count INTEGER NOT NULL DEFAULT 0,
            completed INTEGER NOT NULL DEFAULT 0,
            completed_at TEXT,
            progress_schema INTEGER NOT NULL DEFAULT 1,
            row_version INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (user_id, content_id),
            CHECK (completed = 0 OR completed_at IS NOT NULL)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Idempotency ledger: a payment reference is applied at most once
async fn create_payment_receipts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS payment_receipts (
            payment_ref TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            content_id TEXT NOT NULL,
            amount_minor INTEGER NOT NULL,
            currency TEXT NOT NULL,
            access_type TEXT NOT NULL,
            received_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or repair default settings
///
/// Missing keys are inserted; NULL values are reset to the default.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(pool, "entitlement_conflict_max_retries", "5").await?;
    ensure_setting(pool, "entitlement_conflict_backoff_ms", "5").await?;
    ensure_setting(pool, "event_bus_capacity", "1000").await?;

    Ok(())
}

async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let existing: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match existing {
        Some(Some(_)) => {}
        Some(None) => {
            warn!("Setting '{}' is NULL, resetting to default: {}", key, default_value);
            sqlx::query("UPDATE settings SET value = ?, updated_at = CURRENT_TIMESTAMP WHERE key = ?")
                .bind(default_value)
                .bind(key)
                .execute(pool)
                .await?;
        }
        None => {
            sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}

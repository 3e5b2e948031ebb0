//! Entitlement store
//!
//! One row per (user, content). Writes are versioned: `update_entitlement`
//! only succeeds against the `row_version` the caller read, and bumps it.

use sqlx::{sqlite::SqliteRow, Row, SqliteExecutor};
use tbo_common::db::AccessType;
use tbo_common::time::{from_storage, from_storage_opt, to_storage};
use uuid::Uuid;

use super::parse_uuid;
use crate::entitlement::{EntitlementRecord, WatchProgress};
use crate::error::{Error, Result};

const SELECT_COLUMNS: &str = r#"
    SELECT user_id, content_id, access_type, payment_ref, granted_at, expires_at,
           active, current_position_seconds, total_duration_seconds, percentage,
           last_watched_at, watch_session_count, completed, completed_at,
           progress_schema, row_version
    FROM entitlements
"#;

fn record_from_row(row: &SqliteRow) -> Result<EntitlementRecord> {
    let progress_schema: i64 = row.try_get("progress_schema")?;
    if progress_schema != WatchProgress::SCHEMA_VERSION {
        return Err(Error::InvalidState(format!(
            "Unsupported progress schema {} (expected {})",
            progress_schema,
            WatchProgress::SCHEMA_VERSION
        )));
    }

    let user_id: String = row.try_get("user_id")?;
    let content_id: String = row.try_get("content_id")?;
    let access_type: String = row.try_get("access_type")?;
    let granted_at: String = row.try_get("granted_at")?;
    let expires_at: Option<String> = row.try_get("expires_at")?;
    let last_watched_at: Option<String> = row.try_get("last_watched_at")?;
    let completed: bool = row.try_get("completed")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;

    let completed_at = from_storage_opt(completed_at.as_deref())?;
    if completed && completed_at.is_none() {
        return Err(Error::InvalidState(format!(
            "Entitlement ({}, {}) completed without a timestamp",
            user_id, content_id
        )));
    }

    Ok(EntitlementRecord {
        user_id: parse_uuid("user_id", &user_id)?,
        content_id: parse_uuid("content_id", &content_id)?,
        access_type: access_type.parse::<AccessType>()?,
        payment_ref: row.try_get("payment_ref")?,
        granted_at: from_storage(&granted_at)?,
        expires_at: from_storage_opt(expires_at.as_deref())?,
        active: row.try_get("active")?,
        progress: WatchProgress {
            current_position_seconds: row.try_get("current_position_seconds")?,
            total_duration_seconds: row.try_get("total_duration_seconds")?,
            percentage: row.try_get("percentage")?,
            last_watched_at: from_storage_opt(last_watched_at.as_deref())?,
        },
        watch_session_count: row.try_get("watch_session_count")?,
        completed_at,
        row_version: row.try_get("row_version")?,
    })
}

pub async fn fetch_entitlement<'e, E>(
    executor: E,
    user_id: Uuid,
    content_id: Uuid,
) -> Result<Option<EntitlementRecord>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("{} WHERE user_id = ? AND content_id = ?", SELECT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(user_id.to_string())
        .bind(content_id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Every record for a user, most recently watched first
///
/// Never-watched records follow, newest grant first.
pub async fn list_entitlements_for_user<'e, E>(executor: E, user_id: Uuid) -> Result<Vec<EntitlementRecord>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        "{} WHERE user_id = ? \
         ORDER BY last_watched_at IS NULL, last_watched_at DESC, granted_at DESC",
        SELECT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(user_id.to_string())
        .fetch_all(executor)
        .await?;

    rows.iter().map(record_from_row).collect()
}

/// Insert a new record at `row_version = 1`
///
/// A concurrent insert of the same key fails with a unique violation, which
/// converts to [`Error::Conflict`].
pub async fn insert_entitlement<'e, E>(executor: E, record: &EntitlementRecord) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO entitlements (
            user_id, content_id, access_type, payment_ref, granted_at, expires_at,
            active, current_position_seconds, total_duration_seconds, percentage,
            last_watched_at, watch_session_count, completed, completed_at,
            progress_schema, row_version
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
        "#,
    )
    .bind(record.user_id.to_string())
    .bind(record.content_id.to_string())
    .bind(record.access_type.as_str())
    .bind(&record.payment_ref)
    .bind(to_storage(record.granted_at))
    .bind(record.expires_at.map(to_storage))
    .bind(record.active)
    .bind(record.progress.current_position_seconds)
    .bind(record.progress.total_duration_seconds)
    .bind(record.progress.percentage)
    .bind(record.progress.last_watched_at.map(to_storage))
    .bind(record.watch_session_count)
    .bind(record.completed())
    .bind(record.completed_at.map(to_storage))
    .bind(WatchProgress::SCHEMA_VERSION)
    .execute(executor)
    .await?;

    Ok(())
}

/// Overwrite a record if it is still at `record.row_version`
///
/// Returns `false` when another writer got there first.
pub async fn update_entitlement<'e, E>(executor: E, record: &EntitlementRecord) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE entitlements SET
            access_type = ?,
            payment_ref = ?,
            granted_at = ?,
            expires_at = ?,
            active = ?,
            current_position_seconds = ?,
            total_duration_seconds = ?,
            percentage = ?,
            last_watched_at = ?,
            watch_session_count = ?,
            completed = ?,
            completed_at = ?,
            progress_schema = ?,
            row_version = row_version + 1
        WHERE user_id = ? AND content_id = ? AND row_version = ?
        "#,
    )
    .bind(record.access_type.as_str())
    .bind(&record.payment_ref)
    .bind(to_storage(record.granted_at))
    .bind(record.expires_at.map(to_storage))
    .bind(record.active)
    .bind(record.progress.current_position_seconds)
    .bind(record.progress.total_duration_seconds)
    .bind(record.progress.percentage)
    .bind(record.progress.last_watched_at.map(to_storage))
    .bind(record.watch_session_count)
    .bind(record.completed())
    .bind(record.completed_at.map(to_storage))
    .bind(WatchProgress::SCHEMA_VERSION)
    .bind(record.user_id.to_string())
    .bind(record.content_id.to_string())
    .bind(record.row_version)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

//! Catalog projection reads and seeding import
//!
//! The engine only reads `content_items`. The import exists so a fresh
//! deployment (or a test) can be seeded from a TOML catalog file; it never
//! touches entitlements.

use serde::Deserialize;
use sqlx::{Row, SqliteExecutor, SqlitePool};
use std::path::Path;
use tbo_common::db::{AccessTier, ContentItem};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};

/// TOML catalog file: a list of `[[content]]` tables
///
/// ```toml
/// [[content]]
/// guid = "7d0c6a4e-1f36-4f7b-9d43-3f1b1c7c2a10"
/// title = "Orientation"
/// access_tier = "preview"
/// price_minor = 99900
/// total_duration_seconds = 3600.0
/// preview_duration_seconds = 120.0
/// ```
#[derive(Debug, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub content: Vec<ContentItem>,
}

impl CatalogFile {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::InvalidState(format!("Invalid catalog file: {}", e)))
    }
}

/// Look up one catalog item
pub async fn get_content_item<'e, E>(executor: E, content_id: Uuid) -> Result<Option<ContentItem>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        SELECT guid, title, access_tier, price_minor, currency,
               total_duration_seconds, preview_duration_seconds
        FROM content_items
        WHERE guid = ?
        "#,
    )
    .bind(content_id.to_string())
    .fetch_optional(executor)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let tier: String = row.try_get("access_tier")?;
    let access_tier: AccessTier = tier.parse()?;

    Ok(Some(ContentItem {
        guid: content_id,
        title: row.try_get("title")?,
        access_tier,
        price_minor: row.try_get("price_minor")?,
        currency: row.try_get("currency")?,
        total_duration_seconds: row.try_get("total_duration_seconds")?,
        preview_duration_seconds: row.try_get("preview_duration_seconds")?,
    }))
}

/// Insert or update catalog items in one transaction
///
/// Every item is validated first; one bad item rejects the whole batch.
pub async fn import_content_items(pool: &SqlitePool, items: &[ContentItem]) -> Result<usize> {
    for item in items {
        item.validate()?;
    }

    let mut tx = pool.begin().await?;
    for item in items {
        sqlx::query(
            r#"
            INSERT INTO content_items
                (guid, title, access_tier, price_minor, currency,
                 total_duration_seconds, preview_duration_seconds)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(guid) DO UPDATE SET
                title = excluded.title,
                access_tier = excluded.access_tier,
                price_minor = excluded.price_minor,
                currency = excluded.currency,
                total_duration_seconds = excluded.total_duration_seconds,
                preview_duration_seconds = excluded.preview_duration_seconds,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(item.guid.to_string())
        .bind(&item.title)
        .bind(item.access_tier.as_str())
        .bind(item.price_minor)
        .bind(&item.currency)
        .bind(item.total_duration_seconds)
        .bind(item.preview_duration_seconds)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(items.len())
}

/// Read a TOML catalog file and import it
pub async fn import_catalog_file(pool: &SqlitePool, path: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(path).map_err(tbo_common::Error::Io)?;
    let catalog = CatalogFile::from_toml_str(&content)?;
    let count = import_content_items(pool, &catalog.content).await?;
    info!("Imported {} catalog items from {}", count, path.display());
    Ok(count)
}

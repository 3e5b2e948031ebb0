//! Test helper utilities
//!
//! Shared setup for tbo-vl integration tests: a fresh SQLite database in a
//! temp directory, seeded with a small catalog.

#![allow(dead_code)]

use sqlx::SqlitePool;
use tbo_common::db::{init_database, AccessTier, ContentItem};
use tbo_common::events::EventBus;
use tempfile::TempDir;
use uuid::Uuid;

use tbo_vl::config::EngineSettings;
use tbo_vl::entitlement::PaymentConfirmation;
use tbo_vl::EntitlementEngine;

pub struct TestContext {
    // Held so the directory outlives the pool
    _dir: TempDir,
    pub pool: SqlitePool,
    pub engine: EntitlementEngine,
    pub free: ContentItem,
    pub preview: ContentItem,
    pub premium: ContentItem,
}

pub fn content(tier: AccessTier, total: f64, preview: f64) -> ContentItem {
    ContentItem {
        guid: Uuid::new_v4(),
        title: format!("{} lesson", tier),
        access_tier: tier,
        price_minor: if tier == AccessTier::Free { 0 } else { 99_900 },
        currency: "INR".to_string(),
        total_duration_seconds: total,
        preview_duration_seconds: preview,
    }
}

pub async fn setup() -> TestContext {
    let dir = TempDir::new().expect("temp dir");
    let pool = init_database(&dir.path().join("tbo.db"))
        .await
        .expect("init database");

    let free = content(AccessTier::Free, 600.0, 0.0);
    let preview = content(AccessTier::Preview, 3600.0, 120.0);
    let premium = content(AccessTier::Premium, 3600.0, 0.0);
    tbo_vl::db::import_content_items(&pool, &[free.clone(), preview.clone(), premium.clone()])
        .await
        .expect("seed catalog");

    let settings = EngineSettings::load(&pool).await.expect("settings");
    let engine = EntitlementEngine::new(pool.clone(), EventBus::new(100), settings);

    TestContext {
        _dir: dir,
        pool,
        engine,
        free,
        preview,
        premium,
    }
}

/// A second engine on the same database with its own key locks
///
/// Stands in for another service instance: writes from the two engines are
/// only serialized by SQLite and the row version check.
pub fn peer_engine(ctx: &TestContext) -> EntitlementEngine {
    let settings = EngineSettings {
        conflict_max_retries: 20,
        ..*ctx.engine.settings()
    };
    EntitlementEngine::new(ctx.pool.clone(), EventBus::new(100), settings)
}

pub fn payment(user_id: Uuid, content: &ContentItem, payment_ref: &str) -> PaymentConfirmation {
    PaymentConfirmation {
        user_id,
        content_id: content.guid,
        payment_ref: payment_ref.to_string(),
        amount_minor: content.price_minor,
        currency: content.currency.clone(),
        access_type: tbo_common::db::AccessType::Premium,
        expires_at: None,
    }
}

pub async fn entitlement_count(pool: &SqlitePool, user_id: Uuid, content_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM entitlements WHERE user_id = ? AND content_id = ?")
        .bind(user_id.to_string())
        .bind(content_id.to_string())
        .fetch_one(pool)
        .await
        .expect("count entitlements")
}

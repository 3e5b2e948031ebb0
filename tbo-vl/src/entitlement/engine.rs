//! Store-backed entitlement engine
//!
//! Reads go straight to the pool. Writes for one (user, content) key are
//! serialized by [`KeyedLocks`], run in a transaction with a versioned
//! update, and are retried on conflict. Events go out only after commit.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tbo_common::db::ContentItem;
use tbo_common::events::EventBus;
use tbo_common::time::storage_precision;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};
use uuid::Uuid;

use super::locks::KeyedLocks;
use super::resolver::resolve_access;
use super::retry::RetryPolicy;
use super::types::{AccessDecision, EntitlementRecord, GrantState, ProgressState};
use crate::config::EngineSettings;
use crate::db;
use crate::error::{Error, Result};

/// Entitlement engine shared by all request handlers
#[derive(Clone)]
pub struct EntitlementEngine {
    pub(super) db: SqlitePool,
    pub(super) event_bus: EventBus,
    settings: EngineSettings,
    locks: Arc<KeyedLocks>,
}

/// One row of a learner's library
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryEntry {
    pub content: ContentItem,
    pub record: EntitlementRecord,
    /// Evaluated at listing time
    pub decision: AccessDecision,
    pub grant_state: GrantState,
    pub progress_state: ProgressState,
}

impl EntitlementEngine {
    pub fn new(db: SqlitePool, event_bus: EventBus, settings: EngineSettings) -> Self {
        Self {
            db,
            event_bus,
            settings,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub(super) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.settings)
    }

    pub(super) async fn lock_key(&self, user_id: Uuid, content_id: Uuid) -> OwnedMutexGuard<()> {
        self.locks.lock(user_id, content_id).await
    }

    /// Decide whether `user_id` may play `content_id` right now
    ///
    /// A denial is a normal result, not an error. Only an unknown content id fails.
    pub async fn check_access(
        &self,
        user_id: Uuid,
        content_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AccessDecision> {
        let content = self.content(content_id).await?;
        let record = db::fetch_entitlement(&self.db, user_id, content_id).await?;
        let decision = resolve_access(&content, record.as_ref(), now);

        debug!(
            %user_id,
            %content_id,
            allowed = decision.allowed,
            reason = %decision.reason,
            "Access check"
        );
        Ok(decision)
    }

    pub async fn get_entitlement(&self, user_id: Uuid, content_id: Uuid) -> Result<EntitlementRecord> {
        db::fetch_entitlement(&self.db, user_id, content_id)
            .await?
            .ok_or_else(|| record_not_found(user_id, content_id))
    }

    /// Every record the learner has, most recently watched first
    pub async fn list_library(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<LibraryEntry>> {
        let records = db::list_entitlements_for_user(&self.db, user_id).await?;

        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let Some(content) = db::get_content_item(&self.db, record.content_id).await? else {
                warn!(
                    %user_id,
                    content_id = %record.content_id,
                    "Entitlement references content missing from catalog"
                );
                continue;
            };

            entries.push(LibraryEntry {
                decision: resolve_access(&content, Some(&record), now),
                grant_state: record.grant_state(now),
                progress_state: record.progress_state(),
                content,
                record,
            });
        }

        Ok(entries)
    }

    pub(super) async fn content(&self, content_id: Uuid) -> Result<ContentItem> {
        db::get_content_item(&self.db, content_id)
            .await?
            .ok_or_else(|| content_not_found(content_id))
    }
}

/// Normalize a caller-supplied time to what storage keeps
pub(super) fn normalize(now: DateTime<Utc>) -> DateTime<Utc> {
    storage_precision(now)
}

pub(super) fn content_not_found(content_id: Uuid) -> Error {
    Error::NotFound(format!("Content {}", content_id))
}

pub(super) fn record_not_found(user_id: Uuid, content_id: Uuid) -> Error {
    Error::NotFound(format!("Entitlement for user {} on content {}", user_id, content_id))
}

//! HTTP API handlers for tbo-vl

pub mod access;
pub mod auth;
pub mod health;
pub mod library;
pub mod payments;
pub mod sse;

pub use access::{check_access, get_entitlement, report_progress};
pub use auth::{auth_middleware, Principal};
pub use health::health_routes;
pub use library::list_library;
pub use payments::{extend_grant, payment_confirmed, revoke_grant};
pub use sse::event_stream;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tbo_common::db::AccessType;
use uuid::Uuid;

use crate::entitlement::{EntitlementRecord, GrantState, ProgressState, WatchProgress};

/// Entitlement record as returned to clients
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementView {
    pub user_id: Uuid,
    pub content_id: Uuid,
    pub access_type: AccessType,
    pub payment_ref: Option<String>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub progress: WatchProgress,
    pub watch_session_count: i64,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub grant_state: GrantState,
    pub progress_state: ProgressState,
}

impl EntitlementView {
    pub fn new(record: EntitlementRecord, now: DateTime<Utc>) -> Self {
        Self {
            grant_state: record.grant_state(now),
            progress_state: record.progress_state(),
            completed: record.completed(),
            user_id: record.user_id,
            content_id: record.content_id,
            access_type: record.access_type,
            payment_ref: record.payment_ref,
            granted_at: record.granted_at,
            expires_at: record.expires_at,
            active: record.active,
            progress: record.progress,
            watch_session_count: record.watch_session_count,
            completed_at: record.completed_at,
        }
    }
}

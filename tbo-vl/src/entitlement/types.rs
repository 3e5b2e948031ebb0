//! Entitlement engine types
//!
//! The progress and completion fields are a fixed record shape rather than
//! an open map: completion is an `Option<DateTime>` so "completed without a
//! timestamp" cannot be represented, and the progress shape carries a schema
//! version that is persisted alongside it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tbo_common::db::AccessType;

/// Percentage at which a video counts as completed
pub const COMPLETION_THRESHOLD_PERCENT: f64 = 90.0;

/// Watch progress for one (user, content) record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchProgress {
    pub current_position_seconds: f64,
    pub total_duration_seconds: f64,
    /// Always `current / total * 100`, clamped to [0, 100]
    pub percentage: f64,
    pub last_watched_at: Option<DateTime<Utc>>,
}

impl WatchProgress {
    /// Persisted in `entitlements.progress_schema`; bump when the shape changes
    pub const SCHEMA_VERSION: i64 = 1;

    /// Progress of a record nobody has watched yet
    pub fn zeroed(total_duration_seconds: f64) -> Self {
        Self {
            current_position_seconds: 0.0,
            total_duration_seconds,
            percentage: 0.0,
            last_watched_at: None,
        }
    }

    pub fn percentage_of(position_seconds: f64, total_duration_seconds: f64) -> f64 {
        if total_duration_seconds <= 0.0 {
            return 0.0;
        }
        (position_seconds / total_duration_seconds * 100.0).clamp(0.0, 100.0)
    }

    /// Fold a position report in: the stored position never moves backwards
    ///
    /// `max` is commutative and idempotent, so reports applied in any order
    /// converge on the same stored position.
    pub fn merge(&self, reported_seconds: f64, total_duration_seconds: f64, now: DateTime<Utc>) -> Self {
        let position = self.current_position_seconds.max(reported_seconds);
        Self {
            current_position_seconds: position,
            total_duration_seconds,
            percentage: Self::percentage_of(position, total_duration_seconds),
            last_watched_at: Some(now),
        }
    }

    pub fn reaches_completion(&self) -> bool {
        self.percentage >= COMPLETION_THRESHOLD_PERCENT
    }
}

/// One learner's relationship to one content item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitlementRecord {
    pub user_id: Uuid,
    pub content_id: Uuid,
    pub access_type: AccessType,
    pub payment_ref: Option<String>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Manual revocation flag, independent of `expires_at`
    pub active: bool,
    pub progress: WatchProgress,
    pub watch_session_count: i64,
    /// Set once, the first time progress reaches the threshold; never cleared
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token
    #[serde(skip)]
    pub row_version: i64,
}

impl EntitlementRecord {
    /// Fresh record with zeroed progress
    pub fn new(
        user_id: Uuid,
        content_id: Uuid,
        access_type: AccessType,
        payment_ref: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        total_duration_seconds: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            content_id,
            access_type,
            payment_ref,
            granted_at: now,
            expires_at,
            active: true,
            progress: WatchProgress::zeroed(total_duration_seconds),
            watch_session_count: 0,
            completed_at: None,
            row_version: 0,
        }
    }

    pub fn completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    /// Active, premium and inside its validity window
    pub fn is_qualifying_premium(&self, now: DateTime<Utc>) -> bool {
        self.active && self.access_type == AccessType::Premium && !self.is_expired(now)
    }

    pub fn grant_state(&self, now: DateTime<Utc>) -> GrantState {
        if !self.active {
            GrantState::Revoked
        } else if self.is_expired(now) {
            GrantState::Expired
        } else {
            GrantState::Granted
        }
    }

    pub fn progress_state(&self) -> ProgressState {
        if self.completed() {
            ProgressState::Completed
        } else if self.watch_session_count == 0 && self.progress.current_position_seconds == 0.0 {
            ProgressState::NotStarted
        } else {
            ProgressState::InProgress
        }
    }
}

/// Grant axis of the record lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantState {
    Granted,
    Expired,
    Revoked,
}

/// Progress axis of the record lifecycle (Completed is terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    NotStarted,
    InProgress,
    Completed,
}

/// Why a playback decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessReason {
    /// Content is free
    Free,
    /// A qualifying premium grant unlocks the content
    Entitled,
    PreviewLimited,
    PaymentRequired,
    /// A premium grant exists but its window has passed
    EntitlementExpired,
    /// A premium grant exists but was revoked
    EntitlementRevoked,
}

impl AccessReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessReason::Free => "free",
            AccessReason::Entitled => "entitled",
            AccessReason::PreviewLimited => "preview-limited",
            AccessReason::PaymentRequired => "payment-required",
            AccessReason::EntitlementExpired => "entitlement-expired",
            AccessReason::EntitlementRevoked => "entitlement-revoked",
        }
    }
}

impl std::fmt::Display for AccessReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Playback decision for one request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    /// `None` means unbounded
    pub max_playback_seconds: Option<f64>,
    pub reason: AccessReason,
}

impl AccessDecision {
    pub fn unbounded(reason: AccessReason) -> Self {
        Self {
            allowed: true,
            max_playback_seconds: None,
            reason,
        }
    }

    pub fn limited(max_playback_seconds: f64) -> Self {
        Self {
            allowed: true,
            max_playback_seconds: Some(max_playback_seconds),
            reason: AccessReason::PreviewLimited,
        }
    }

    pub fn denied(reason: AccessReason) -> Self {
        Self {
            allowed: false,
            max_playback_seconds: Some(0.0),
            reason,
        }
    }

    /// Whether playing up to `position_seconds` stays inside this decision
    pub fn permits_position(&self, position_seconds: f64) -> bool {
        self.allowed
            && self
                .max_playback_seconds
                .map_or(true, |max| position_seconds <= max)
    }
}

/// Confirmed-payment event from the payment outcome adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub user_id: Uuid,
    pub content_id: Uuid,
    pub payment_ref: String,
    /// Minor currency units
    pub amount_minor: i64,
    pub currency: String,
    pub access_type: AccessType,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of applying a payment confirmation
#[derive(Debug, Clone, PartialEq)]
pub enum GrantOutcome {
    Created(EntitlementRecord),
    Renewed {
        record: EntitlementRecord,
        previous_payment_ref: Option<String>,
    },
    /// Already applied; the record is returned unchanged
    Duplicate(EntitlementRecord),
}

impl GrantOutcome {
    pub fn record(&self) -> &EntitlementRecord {
        match self {
            GrantOutcome::Created(record)
            | GrantOutcome::Renewed { record, .. }
            | GrantOutcome::Duplicate(record) => record,
        }
    }

    pub fn into_record(self) -> EntitlementRecord {
        match self {
            GrantOutcome::Created(record)
            | GrantOutcome::Renewed { record, .. }
            | GrantOutcome::Duplicate(record) => record,
        }
    }
}

/// A playback-position report from a client
///
/// Carries the position only. The duration used for the percentage always
/// comes from the catalog entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressReport {
    pub position_seconds: f64,
}

impl ProgressReport {
    pub fn at(position_seconds: f64) -> Self {
        Self { position_seconds }
    }
}

/// Result of a successful progress report
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub record: EntitlementRecord,
    /// True only for the call that crossed the completion threshold
    pub newly_completed: bool,
    pub decision: AccessDecision,
}

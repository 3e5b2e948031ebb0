//! Progress tracker
//!
//! Folds playback-position reports into the learner's record. Each report is
//! authorized against the resolver first; reports outside the permitted
//! window are rejected, never clamped.

use chrono::{DateTime, Utc};
use tbo_common::db::{AccessType, ContentItem};
use tbo_common::events::TboEvent;
use tracing::{debug, info};
use uuid::Uuid;

use super::engine::{content_not_found, normalize, EntitlementEngine};
use super::resolver::resolve_access;
use super::retry::{retry_on_conflict, stale_write};
use super::types::{AccessDecision, AccessReason, EntitlementRecord, ProgressReport, ProgressUpdate};
use crate::db;
use crate::error::{Error, Result};

/// Planned write for one progress report
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressPlan {
    pub record: EntitlementRecord,
    /// No record existed; insert instead of update
    pub is_new: bool,
    pub newly_completed: bool,
    pub decision: AccessDecision,
}

/// Pure planning step for a progress report
///
/// `existing` is the record as currently stored, if any.
pub fn plan_progress(
    user_id: Uuid,
    content: &ContentItem,
    existing: Option<&EntitlementRecord>,
    report: &ProgressReport,
    now: DateTime<Utc>,
) -> Result<ProgressPlan> {
    let position = report.position_seconds;
    if !position.is_finite() || position < 0.0 {
        return Err(Error::InvalidState(format!(
            "Reported position {} must be a non-negative number of seconds",
            position
        )));
    }

    let total = content.total_duration_seconds;
    if !total.is_finite() || total <= 0.0 {
        return Err(Error::InvalidState(format!(
            "Catalog duration {} for {} must be positive",
            total, content.guid
        )));
    }

    let decision = resolve_access(content, existing, now);
    if !decision.permits_position(position) {
        return Err(denial(content.guid, &decision, position));
    }

    let is_new = existing.is_none();
    let mut record = match existing {
        Some(record) => record.clone(),
        None => EntitlementRecord::new(
            user_id,
            content.guid,
            AccessType::inferred_from_tier(content.access_tier),
            None,
            None,
            total,
            now,
        ),
    };

    record.progress = record.progress.merge(position, total, now);
    record.watch_session_count += 1;

    let newly_completed = !record.completed() && record.progress.reaches_completion();
    if newly_completed {
        record.completed_at = Some(now);
    }

    Ok(ProgressPlan {
        record,
        is_new,
        newly_completed,
        decision,
    })
}

fn denial(content_id: Uuid, decision: &AccessDecision, position: f64) -> Error {
    if decision.reason == AccessReason::PaymentRequired {
        return Error::PaymentRequired { content_id };
    }
    Error::BoundaryViolation {
        content_id,
        reason: decision.reason,
        reported_seconds: position,
        max_playback_seconds: decision.max_playback_seconds,
    }
}

impl EntitlementEngine {
    /// Record a playback position for the authenticated learner
    ///
    /// Creates the record on first report for free and preview content.
    /// A position the resolver does not permit is returned as
    /// `Error::PaymentRequired` or `Error::BoundaryViolation` carrying the decision.
    pub async fn report_progress(
        &self,
        user_id: Uuid,
        content_id: Uuid,
        report: ProgressReport,
        now: DateTime<Utc>,
    ) -> Result<ProgressUpdate> {
        let now = normalize(now);
        let _guard = self.lock_key(user_id, content_id).await;

        let plan = retry_on_conflict("report_progress", self.retry_policy(), || {
            self.try_report_progress(user_id, content_id, &report, now)
        })
        .await?;

        let record = &plan.record;
        debug!(
            %user_id,
            %content_id,
            position_seconds = record.progress.current_position_seconds,
            percentage = record.progress.percentage,
            "Progress recorded"
        );
        self.event_bus.emit_lossy(TboEvent::ProgressRecorded {
            user_id,
            content_id,
            position_seconds: record.progress.current_position_seconds,
            percentage: record.progress.percentage,
            watch_session_count: record.watch_session_count,
            timestamp: now,
        });

        if plan.newly_completed {
            info!(
                %user_id,
                %content_id,
                percentage = record.progress.percentage,
                "Content completed"
            );
            self.event_bus.emit_lossy(TboEvent::ContentCompleted {
                user_id,
                content_id,
                completed_at: now,
            });
        }

        Ok(ProgressUpdate {
            record: plan.record,
            newly_completed: plan.newly_completed,
            decision: plan.decision,
        })
    }

    async fn try_report_progress(
        &self,
        user_id: Uuid,
        content_id: Uuid,
        report: &ProgressReport,
        now: DateTime<Utc>,
    ) -> Result<ProgressPlan> {
        let mut tx = self.db.begin().await?;

        let content = db::get_content_item(&mut *tx, content_id)
            .await?
            .ok_or_else(|| content_not_found(content_id))?;
        let existing = db::fetch_entitlement(&mut *tx, user_id, content_id).await?;

        let mut plan = plan_progress(user_id, &content, existing.as_ref(), report, now)?;

        if plan.is_new {
            db::insert_entitlement(&mut *tx, &plan.record).await?;
            plan.record.row_version = 1;
        } else {
            if !db::update_entitlement(&mut *tx, &plan.record).await? {
                return Err(stale_write(user_id, content_id));
            }
            plan.record.row_version += 1;
        }

        tx.commit().await?;
        Ok(plan)
    }
}

//! Grant manager
//!
//! Turns confirmed payments into entitlement records, idempotently keyed by
//! payment reference. Renewal replaces the grant but keeps progress and
//! completion history. Revocation and extension change grant state only.

use chrono::{DateTime, Utc};
use tbo_common::events::TboEvent;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::engine::{content_not_found, normalize, record_not_found, EntitlementEngine};
use super::retry::{retry_on_conflict, stale_write};
use super::types::{EntitlementRecord, GrantOutcome, PaymentConfirmation};
use crate::db::{self, PaymentReceipt};
use crate::error::{Error, Result};

/// What a payment confirmation does to the stored record
#[derive(Debug, Clone, PartialEq)]
pub enum GrantPlan {
    Insert(EntitlementRecord),
    Update {
        record: EntitlementRecord,
        previous_payment_ref: Option<String>,
    },
    /// The record already carries this payment
    Unchanged(EntitlementRecord),
}

/// Pure planning step for a payment confirmation
pub fn plan_grant(
    existing: Option<&EntitlementRecord>,
    confirmation: &PaymentConfirmation,
    total_duration_seconds: f64,
    now: DateTime<Utc>,
) -> GrantPlan {
    let Some(existing) = existing else {
        return GrantPlan::Insert(EntitlementRecord::new(
            confirmation.user_id,
            confirmation.content_id,
            confirmation.access_type,
            Some(confirmation.payment_ref.clone()),
            confirmation.expires_at,
            total_duration_seconds,
            now,
        ));
    };

    if existing.payment_ref.as_deref() == Some(confirmation.payment_ref.as_str()) {
        return GrantPlan::Unchanged(existing.clone());
    }

    let mut record = existing.clone();
    record.access_type = confirmation.access_type;
    record.active = true;
    record.granted_at = now;
    record.expires_at = confirmation.expires_at;
    record.payment_ref = Some(confirmation.payment_ref.clone());

    GrantPlan::Update {
        record,
        previous_payment_ref: existing.payment_ref.clone(),
    }
}

fn validate_confirmation(confirmation: &PaymentConfirmation, now: DateTime<Utc>) -> Result<()> {
    if confirmation.payment_ref.trim().is_empty() {
        return Err(Error::InvalidState("Payment reference is empty".to_string()));
    }
    if confirmation.amount_minor < 0 {
        return Err(Error::InvalidState(format!(
            "Payment {} has negative amount {}",
            confirmation.payment_ref, confirmation.amount_minor
        )));
    }
    if let Some(expires_at) = confirmation.expires_at {
        if expires_at <= now {
            return Err(Error::InvalidState(format!(
                "Payment {} expires at {} which is not in the future",
                confirmation.payment_ref, expires_at
            )));
        }
    }
    Ok(())
}

impl EntitlementEngine {
    /// Apply a confirmed payment (at-least-once delivery, any order)
    ///
    /// A payment reference seen before returns the current record unchanged.
    pub async fn apply_payment_confirmation(
        &self,
        confirmation: PaymentConfirmation,
        now: DateTime<Utc>,
    ) -> Result<GrantOutcome> {
        let now = normalize(now);
        let mut confirmation = confirmation;
        confirmation.payment_ref = confirmation.payment_ref.trim().to_string();
        confirmation.expires_at = confirmation.expires_at.map(normalize);
        validate_confirmation(&confirmation, now)?;

        let _guard = self.lock_key(confirmation.user_id, confirmation.content_id).await;
        let outcome = retry_on_conflict("apply_payment_confirmation", self.retry_policy(), || {
            self.try_apply_payment(&confirmation, now)
        })
        .await?;

        match &outcome {
            GrantOutcome::Created(record) => {
                info!(
                    user_id = %record.user_id,
                    content_id = %record.content_id,
                    payment_ref = %confirmation.payment_ref,
                    access_type = %record.access_type,
                    "Entitlement granted"
                );
                self.event_bus.emit_lossy(TboEvent::EntitlementGranted {
                    user_id: record.user_id,
                    content_id: record.content_id,
                    access_type: record.access_type,
                    payment_ref: record.payment_ref.clone(),
                    expires_at: record.expires_at,
                    timestamp: now,
                });
            }
            GrantOutcome::Renewed {
                record,
                previous_payment_ref,
            } => {
                info!(
                    user_id = %record.user_id,
                    content_id = %record.content_id,
                    payment_ref = %confirmation.payment_ref,
                    previous_payment_ref = previous_payment_ref.as_deref().unwrap_or("none"),
                    "Entitlement renewed, progress retained"
                );
                self.event_bus.emit_lossy(TboEvent::EntitlementRenewed {
                    user_id: record.user_id,
                    content_id: record.content_id,
                    access_type: record.access_type,
                    payment_ref: confirmation.payment_ref.clone(),
                    previous_payment_ref: previous_payment_ref.clone(),
                    expires_at: record.expires_at,
                    timestamp: now,
                });
            }
            GrantOutcome::Duplicate(_) => {}
        }

        Ok(outcome)
    }

    async fn try_apply_payment(
        &self,
        confirmation: &PaymentConfirmation,
        now: DateTime<Utc>,
    ) -> Result<GrantOutcome> {
        let user_id = confirmation.user_id;
        let content_id = confirmation.content_id;
        let mut tx = self.db.begin().await?;

        let content = db::get_content_item(&mut *tx, content_id)
            .await?
            .ok_or_else(|| content_not_found(content_id))?;

        if content.price_minor != confirmation.amount_minor || content.currency != confirmation.currency {
            warn!(
                %user_id,
                %content_id,
                payment_ref = %confirmation.payment_ref,
                paid = confirmation.amount_minor,
                paid_currency = %confirmation.currency,
                listed = content.price_minor,
                listed_currency = %content.currency,
                "Payment amount differs from catalog price"
            );
        }

        if let Some(receipt) = db::find_receipt(&mut *tx, &confirmation.payment_ref).await? {
            return self
                .duplicate_delivery(&mut tx, confirmation, &receipt)
                .await;
        }

        let existing = db::fetch_entitlement(&mut *tx, user_id, content_id).await?;
        let outcome = match plan_grant(
            existing.as_ref(),
            confirmation,
            content.total_duration_seconds,
            now,
        ) {
            GrantPlan::Insert(mut record) => {
                db::insert_entitlement(&mut *tx, &record).await?;
                record.row_version = 1;
                GrantOutcome::Created(record)
            }
            GrantPlan::Update {
                mut record,
                previous_payment_ref,
            } => {
                if !db::update_entitlement(&mut *tx, &record).await? {
                    return Err(stale_write(user_id, content_id));
                }
                record.row_version += 1;
                GrantOutcome::Renewed {
                    record,
                    previous_payment_ref,
                }
            }
            // Record carries the reference but the ledger missed it; backfill below
            GrantPlan::Unchanged(record) => GrantOutcome::Duplicate(record),
        };

        db::insert_receipt(
            &mut *tx,
            &PaymentReceipt {
                payment_ref: confirmation.payment_ref.clone(),
                user_id,
                content_id,
                amount_minor: confirmation.amount_minor,
                currency: confirmation.currency.clone(),
                access_type: confirmation.access_type,
                received_at: now,
            },
        )
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn duplicate_delivery(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        confirmation: &PaymentConfirmation,
        receipt: &PaymentReceipt,
    ) -> Result<GrantOutcome> {
        if receipt.user_id != confirmation.user_id || receipt.content_id != confirmation.content_id {
            return Err(Error::InvalidState(format!(
                "Payment {} was already applied to user {} on content {}",
                receipt.payment_ref, receipt.user_id, receipt.content_id
            )));
        }

        if receipt.access_type != confirmation.access_type {
            warn!(
                user_id = %confirmation.user_id,
                content_id = %confirmation.content_id,
                payment_ref = %confirmation.payment_ref,
                recorded = %receipt.access_type,
                requested = %confirmation.access_type,
                "Duplicate payment delivery requests a different access type; keeping the first grant"
            );
        } else {
            debug!(
                user_id = %confirmation.user_id,
                content_id = %confirmation.content_id,
                payment_ref = %confirmation.payment_ref,
                "Duplicate payment delivery ignored"
            );
        }

        let record = db::fetch_entitlement(&mut **tx, confirmation.user_id, confirmation.content_id)
            .await?
            .ok_or_else(|| {
                Error::InvalidState(format!(
                    "Payment {} is recorded but its entitlement is missing",
                    receipt.payment_ref
                ))
            })?;

        Ok(GrantOutcome::Duplicate(record))
    }

    /// Manually revoke a grant; progress and completion are kept
    ///
    /// Revoking an already revoked record changes nothing.
    pub async fn revoke(&self, user_id: Uuid, content_id: Uuid, now: DateTime<Utc>) -> Result<EntitlementRecord> {
        let now = normalize(now);
        let _guard = self.lock_key(user_id, content_id).await;

        let (record, changed) = retry_on_conflict("revoke", self.retry_policy(), || {
            self.try_update_grant(user_id, content_id, |record| {
                if !record.active {
                    return false;
                }
                record.active = false;
                true
            })
        })
        .await?;

        if changed {
            info!(%user_id, %content_id, "Entitlement revoked");
            self.event_bus.emit_lossy(TboEvent::EntitlementRevoked {
                user_id,
                content_id,
                timestamp: now,
            });
        } else {
            debug!(%user_id, %content_id, "Entitlement already revoked");
        }

        Ok(record)
    }

    /// Change the validity window without a new payment
    ///
    /// `None` removes the expiry. A revoked grant stays revoked.
    pub async fn extend_grant(
        &self,
        user_id: Uuid,
        content_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<EntitlementRecord> {
        let now = normalize(now);
        let expires_at = expires_at.map(normalize);
        if let Some(at) = expires_at {
            if at <= now {
                return Err(Error::InvalidState(format!(
                    "New expiry {} is not in the future",
                    at
                )));
            }
        }

        let _guard = self.lock_key(user_id, content_id).await;
        let (record, changed) = retry_on_conflict("extend_grant", self.retry_policy(), || {
            self.try_update_grant(user_id, content_id, |record| {
                if record.expires_at == expires_at {
                    return false;
                }
                record.expires_at = expires_at;
                true
            })
        })
        .await?;

        if changed {
            info!(
                %user_id,
                %content_id,
                expires_at = ?record.expires_at,
                "Entitlement validity changed"
            );
            self.event_bus.emit_lossy(TboEvent::EntitlementExtended {
                user_id,
                content_id,
                expires_at: record.expires_at,
                timestamp: now,
            });
        }

        Ok(record)
    }

    /// Read-modify-write of grant fields; `apply` returns whether it changed anything
    async fn try_update_grant<F>(
        &self,
        user_id: Uuid,
        content_id: Uuid,
        apply: F,
    ) -> Result<(EntitlementRecord, bool)>
    where
        F: Fn(&mut EntitlementRecord) -> bool,
    {
        let mut tx = self.db.begin().await?;

        let mut record = db::fetch_entitlement(&mut *tx, user_id, content_id)
            .await?
            .ok_or_else(|| record_not_found(user_id, content_id))?;

        if !apply(&mut record) {
            return Ok((record, false));
        }

        if !db::update_entitlement(&mut *tx, &record).await? {
            return Err(stale_write(user_id, content_id));
        }
        tx.commit().await?;

        record.row_version += 1;
        Ok((record, true))
    }
}

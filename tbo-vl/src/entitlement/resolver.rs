//! Access resolution
//!
//! The single decision point for playback authorization. Pure: callers
//! re-evaluate it on every request with the current time and the current
//! record, so expiry and revocation take effect without any sweep.

use chrono::{DateTime, Utc};
use tbo_common::db::{AccessTier, AccessType, ContentItem};

use super::types::{AccessDecision, AccessReason, EntitlementRecord};

/// Decide whether `content` may be played and for how long
///
/// Rules, first match wins:
/// 1. Free content: allowed, unbounded.
/// 2. Active, unexpired premium grant: allowed, unbounded (any tier).
/// 3. Preview content: allowed up to `preview_duration_seconds`.
/// 4. Premium content: denied. The reason names a lapsed premium grant if
///    there is one, otherwise payment is required.
pub fn resolve_access(
    content: &ContentItem,
    record: Option<&EntitlementRecord>,
    now: DateTime<Utc>,
) -> AccessDecision {
    if content.access_tier == AccessTier::Free {
        return AccessDecision::unbounded(AccessReason::Free);
    }

    if let Some(record) = record {
        if record.is_qualifying_premium(now) {
            return AccessDecision::unbounded(AccessReason::Entitled);
        }
    }

    match content.access_tier {
        AccessTier::Free => AccessDecision::unbounded(AccessReason::Free),
        AccessTier::Preview => AccessDecision::limited(content.preview_duration_seconds),
        AccessTier::Premium => AccessDecision::denied(lapsed_reason(record, now)),
    }
}

/// Denial reason for premium content without a qualifying grant
fn lapsed_reason(record: Option<&EntitlementRecord>, now: DateTime<Utc>) -> AccessReason {
    match record {
        Some(r) if r.access_type == AccessType::Premium && !r.active => {
            AccessReason::EntitlementRevoked
        }
        Some(r) if r.access_type == AccessType::Premium && r.is_expired(now) => {
            AccessReason::EntitlementExpired
        }
        _ => AccessReason::PaymentRequired,
    }
}

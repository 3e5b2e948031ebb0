//! Payment intake and back-office grant management
//!
//! Called by the payment outcome adapter and admin tooling, not by learners,
//! so the target user is part of the request rather than a `Principal`.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tbo_common::time;
use uuid::Uuid;

use super::EntitlementView;
use crate::entitlement::{GrantOutcome, PaymentConfirmation};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantResult {
    Created,
    Renewed,
    Duplicate,
}

#[derive(Debug, Serialize)]
pub struct GrantResponse {
    pub result: GrantResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_payment_ref: Option<String>,
    pub entitlement: EntitlementView,
}

/// POST /api/payments/confirmed
///
/// 201 when a record was created, 200 otherwise (including duplicates).
pub async fn payment_confirmed(
    State(state): State<AppState>,
    payload: Result<Json<PaymentConfirmation>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<GrantResponse>)> {
    let Json(confirmation) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let now = time::now();

    let outcome = state.engine.apply_payment_confirmation(confirmation, now).await?;

    let (status, result, previous_payment_ref, record) = match outcome {
        GrantOutcome::Created(record) => (StatusCode::CREATED, GrantResult::Created, None, record),
        GrantOutcome::Renewed {
            record,
            previous_payment_ref,
        } => (StatusCode::OK, GrantResult::Renewed, previous_payment_ref, record),
        GrantOutcome::Duplicate(record) => (StatusCode::OK, GrantResult::Duplicate, None, record),
    };

    Ok((
        status,
        Json(GrantResponse {
            result,
            previous_payment_ref,
            entitlement: EntitlementView::new(record, now),
        }),
    ))
}

/// POST /api/entitlements/:user_id/:content_id/revoke
pub async fn revoke_grant(
    State(state): State<AppState>,
    Path((user_id, content_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<EntitlementView>> {
    let now = time::now();
    let record = state.engine.revoke(user_id, content_id, now).await?;
    Ok(Json(EntitlementView::new(record, now)))
}

#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    /// `null` removes the expiry
    pub expires_at: Option<DateTime<Utc>>,
}

/// POST /api/entitlements/:user_id/:content_id/extend
pub async fn extend_grant(
    State(state): State<AppState>,
    Path((user_id, content_id)): Path<(Uuid, Uuid)>,
    payload: Result<Json<ExtendRequest>, JsonRejection>,
) -> ApiResult<Json<EntitlementView>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let now = time::now();

    let record = state
        .engine
        .extend_grant(user_id, content_id, request.expires_at, now)
        .await?;

    Ok(Json(EntitlementView::new(record, now)))
}

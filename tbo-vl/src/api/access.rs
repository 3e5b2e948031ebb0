//! Learner playback endpoints
//!
//! All three act on the authenticated principal only.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tbo_common::time;
use uuid::Uuid;

use super::{EntitlementView, Principal};
use crate::entitlement::{AccessDecision, ProgressReport};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub content_id: Uuid,
    #[serde(flatten)]
    pub decision: AccessDecision,
}

/// GET /api/content/:content_id/access
pub async fn check_access(
    State(state): State<AppState>,
    Principal(user_id): Principal,
    Path(content_id): Path<Uuid>,
) -> ApiResult<Json<AccessResponse>> {
    let decision = state
        .engine
        .check_access(user_id, content_id, time::now())
        .await?;

    Ok(Json(AccessResponse {
        content_id,
        decision,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub position_seconds: f64,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub entitlement: EntitlementView,
    pub newly_completed: bool,
    pub decision: AccessDecision,
}

/// POST /api/content/:content_id/progress
pub async fn report_progress(
    State(state): State<AppState>,
    Principal(user_id): Principal,
    Path(content_id): Path<Uuid>,
    payload: Result<Json<ProgressRequest>, JsonRejection>,
) -> ApiResult<Json<ProgressResponse>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let now = time::now();

    let update = state
        .engine
        .report_progress(
            user_id,
            content_id,
            ProgressReport::at(request.position_seconds),
            now,
        )
        .await?;

    Ok(Json(ProgressResponse {
        entitlement: EntitlementView::new(update.record, now),
        newly_completed: update.newly_completed,
        decision: update.decision,
    }))
}

/// GET /api/content/:content_id/entitlement
pub async fn get_entitlement(
    State(state): State<AppState>,
    Principal(user_id): Principal,
    Path(content_id): Path<Uuid>,
) -> ApiResult<Json<EntitlementView>> {
    let record = state.engine.get_entitlement(user_id, content_id).await?;
    Ok(Json(EntitlementView::new(record, time::now())))
}

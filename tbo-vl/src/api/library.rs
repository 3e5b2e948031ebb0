//! Learner library listing

use axum::{extract::State, Json};
use serde::Serialize;
use tbo_common::db::AccessTier;
use tbo_common::time;
use uuid::Uuid;

use super::{EntitlementView, Principal};
use crate::entitlement::AccessDecision;
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct LibraryItem {
    pub title: String,
    pub access_tier: AccessTier,
    pub entitlement: EntitlementView,
    pub decision: AccessDecision,
}

#[derive(Debug, Serialize)]
pub struct LibraryResponse {
    pub user_id: Uuid,
    pub items: Vec<LibraryItem>,
}

/// GET /api/library
pub async fn list_library(
    State(state): State<AppState>,
    Principal(user_id): Principal,
) -> ApiResult<Json<LibraryResponse>> {
    let now = time::now();
    let entries = state.engine.list_library(user_id, now).await?;

    let items = entries
        .into_iter()
        .map(|entry| LibraryItem {
            title: entry.content.title,
            access_tier: entry.content.access_tier,
            entitlement: EntitlementView::new(entry.record, now),
            decision: entry.decision,
        })
        .collect();

    Ok(Json(LibraryResponse { user_id, items }))
}

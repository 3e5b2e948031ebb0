//! Server-Sent Events for entitlement and progress changes

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EventQuery {
    /// Only forward events concerning this user
    pub user_id: Option<Uuid>,
}

/// GET /events
pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let user_filter = query.user_id;
    tbo_common::sse::create_event_sse_stream("tbo-vl", state.engine.event_bus(), move |event| {
        user_filter.map_or(true, |user_id| event.user_id() == user_id)
    })
}

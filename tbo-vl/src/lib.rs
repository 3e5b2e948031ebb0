//! tbo-vl library - Video Library entitlement service
//!
//! Decides per learner and per video whether playback is allowed and for how
//! long, turns confirmed payments into grants, and tracks watch progress
//! toward completion.

use axum::Router;

pub mod api;
pub mod config;
pub mod db;
pub mod entitlement;
pub mod error;

pub use entitlement::EntitlementEngine;
pub use error::{ApiError, Error, Result};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: EntitlementEngine,
    /// 0 disables API authentication
    pub shared_secret: i64,
}

impl AppState {
    pub fn new(engine: EntitlementEngine, shared_secret: i64) -> Self {
        Self {
            engine,
            shared_secret,
        }
    }
}

/// Build application router
///
/// `/api/*` routes go through `auth_middleware`; `/health` and `/events` do not.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};
    use tower_http::cors::CorsLayer;
    use tower_http::trace::TraceLayer;

    let protected = Router::new()
        .route("/api/content/:content_id/access", get(api::check_access))
        .route("/api/content/:content_id/progress", post(api::report_progress))
        .route("/api/content/:content_id/entitlement", get(api::get_entitlement))
        .route("/api/library", get(api::list_library))
        .route("/api/payments/confirmed", post(api::payment_confirmed))
        .route(
            "/api/entitlements/:user_id/:content_id/revoke",
            post(api::revoke_grant),
        )
        .route(
            "/api/entitlements/:user_id/:content_id/extend",
            post(api::extend_grant),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth_middleware,
        ));

    let public = Router::new()
        .route("/events", get(api::event_stream))
        .merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

//! API routes

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{inbound_auth, AppState};
use crate::handlers::{health, inbound, metrics};
use crate::openapi::create_openapi_routes;

/// Create the API router
pub fn create_router(state: AppState, max_concurrent_requests: usize) -> Router {
    let state = Arc::new(state);

    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/ready", get(health::readiness));

    // Inbound routes (bearer token)
    let inbound_routes = Router::new()
        .route("/emails", post(inbound::ingest_email))
        .route("/jobs/:job_id", get(inbound::get_job))
        .layer(middleware::from_fn_with_state(state.clone(), inbound_auth));

    Router::new()
        .nest("/health", health_routes)
        .route("/metrics", get(metrics::metrics))
        .nest("/api/v1/inbound", inbound_routes)
        .merge(create_openapi_routes())
        .with_state(state)
        .layer(GlobalConcurrencyLimitLayer::new(max_concurrent_requests.max(1)))
        .layer(TraceLayer::new_for_http())
}

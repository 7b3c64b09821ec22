//! Prometheus exposition

use axum::{http::header::CONTENT_TYPE, response::IntoResponse};

/// Render pipeline counters in the Prometheus text format
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "health",
    responses(
        (status = 200, description = "Prometheus metrics", body = String, content_type = "text/plain")
    )
)]
pub async fn metrics() -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        inlet_core::metrics::render(),
    )
}

//! OpenAPI documentation
//!
//! Serves the OpenAPI 3 document for the Inlet HTTP API.

use axum::{routing::get, Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error::ErrorResponse;
use crate::handlers::{health, inbound, metrics};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Inlet API",
        description = "Inbound email ingestion. Inbound endpoints require `Authorization: Bearer <token>`."
    ),
    paths(
        health::health,
        health::readiness,
        metrics::metrics,
        inbound::ingest_email,
        inbound::get_job,
    ),
    components(schemas(
        health::HealthResponse,
        health::ReadinessResponse,
        inbound::InboundEmailRequest,
        inbound::EnqueueResponse,
        inbound::JobResponse,
        ErrorResponse,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Health and metrics"),
        (name = "inbound", description = "Inbound email ingestion")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// Create OpenAPI routes
pub fn create_openapi_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDoc::openapi()) }),
    )
}

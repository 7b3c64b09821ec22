//! Inlet API - HTTP front door
//!
//! Bearer-authenticated inbound email submission and job lookup, plus health,
//! metrics and the OpenAPI document.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod routes;

pub use auth::AppState;
pub use openapi::{create_openapi_routes, ApiDoc};
pub use routes::create_router;

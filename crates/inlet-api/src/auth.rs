//! Authentication module

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use inlet_common::config::ApiConfig;
use inlet_storage::repository::IngestJobRepository;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

use crate::error::ApiError;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn IngestJobRepository>,
    /// Bearer token for the inbound endpoints; `None` disables them
    pub inbound_token: Option<String>,
    pub max_body_bytes: usize,
    /// Attempts granted to every enqueued job
    pub max_attempts: i32,
}

impl AppState {
    pub fn new(jobs: Arc<dyn IngestJobRepository>, config: &ApiConfig, max_attempts: i32) -> Self {
        Self {
            jobs,
            inbound_token: config.inbound_token().map(str::to_string),
            max_body_bytes: config.max_body_bytes,
            max_attempts,
        }
    }
}

/// Extract a bearer token from the Authorization header
pub fn extract_bearer_token(req: &Request) -> Option<&str> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|token| !token.is_empty())
}

fn hash_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

/// Constant-time comparison of the token digests
fn verify_token(presented: &str, expected: &str) -> bool {
    hash_token(presented)
        .iter()
        .zip(hash_token(expected).iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Guard for the inbound endpoints
pub async fn inbound_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.inbound_token.as_deref() else {
        return Err(ApiError::service_unavailable("inbound api is not configured"));
    };

    let presented = extract_bearer_token(&request).ok_or_else(|| {
        warn!("Missing bearer token in request to {}", request.uri().path());
        ApiError::unauthorized()
    })?;

    if !verify_token(presented, expected) {
        warn!("Invalid bearer token in request to {}", request.uri().path());
        return Err(ApiError::unauthorized());
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(authorization: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/api/v1/inbound/emails");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token(&request(Some("Bearer abc"))), Some("abc"));
        assert_eq!(extract_bearer_token(&request(Some("bearer  abc "))), Some("abc"));
        assert_eq!(extract_bearer_token(&request(Some("Basic abc"))), None);
        assert_eq!(extract_bearer_token(&request(Some("Bearer "))), None);
        assert_eq!(extract_bearer_token(&request(None)), None);
    }

    #[test]
    fn test_verify_token() {
        assert!(verify_token("s3cret", "s3cret"));
        assert!(!verify_token("s3cret", "s3cret2"));
        assert!(!verify_token("", "s3cret"));
    }
}

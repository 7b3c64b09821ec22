//! Inbound ingest handlers

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header::CONTENT_LENGTH, HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use inlet_core::metrics;
use inlet_core::worker::IngestJobPayload;
use inlet_storage::models::IngestJob;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AppState;
use crate::error::{ApiError, ErrorResponse};

/// Inbound email submission. Either `raw_rfc822`, or `sender` together with
/// at least one recipient, is required; explicit fields win over values
/// parsed from the raw message.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct InboundEmailRequest {
    pub sender: Option<String>,
    pub recipients: Option<Vec<String>>,
    pub subject: Option<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub message_id: Option<String>,
    /// Complete RFC822 message source
    pub raw_rfc822: Option<String>,
}

impl From<InboundEmailRequest> for IngestJobPayload {
    fn from(req: InboundEmailRequest) -> Self {
        let mut payload = Self {
            sender: req.sender.unwrap_or_default(),
            recipients: req.recipients.unwrap_or_default(),
            subject: req.subject.unwrap_or_default(),
            text_body: req.text_body.unwrap_or_default(),
            html_body: req.html_body.unwrap_or_default(),
            message_id: req.message_id.unwrap_or_default(),
            raw_rfc822: req.raw_rfc822.unwrap_or_default(),
        };
        payload.normalize();
        payload
    }
}

/// Enqueue acknowledgement
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EnqueueResponse {
    pub ok: bool,
    pub job_id: Uuid,
    pub status: String,
}

/// Ingest job as seen by operators
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobResponse {
    pub id: Uuid,
    /// queued, processing, done or failed
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub accepted: i32,
    pub dropped: i32,
    pub last_error: String,
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub done_at: Option<DateTime<Utc>>,
}

impl From<IngestJob> for JobResponse {
    fn from(job: IngestJob) -> Self {
        Self {
            id: job.id,
            status: job.status,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            accepted: job.accepted,
            dropped: job.dropped,
            last_error: job.last_error,
            available_at: job.available_at,
            created_at: job.created_at,
            updated_at: job.updated_at,
            done_at: job.done_at,
        }
    }
}

/// Queue an inbound email for ingestion
#[utoipa::path(
    post,
    path = "/api/v1/inbound/emails",
    tag = "inbound",
    request_body = InboundEmailRequest,
    responses(
        (status = 202, description = "Job queued", body = EnqueueResponse),
        (status = 400, description = "Invalid JSON or missing fields", body = ErrorResponse),
        (status = 401, description = "Missing or wrong bearer token", body = ErrorResponse),
        (status = 413, description = "Body too large", body = ErrorResponse),
        (status = 503, description = "No inbound token configured", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub async fn ingest_email(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let declared_too_large = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok())
        .is_some_and(|len| len > state.max_body_bytes);
    if declared_too_large {
        return Err(ApiError::payload_too_large());
    }

    let bytes = axum::body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|_| ApiError::payload_too_large())?;

    let request: InboundEmailRequest = serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::bad_request(format!("invalid json: {}", e)))?;
    let payload = IngestJobPayload::from(request);
    if !payload.is_usable() {
        return Err(ApiError::bad_request(
            "raw_rfc822, or sender and at least one recipient, is required",
        ));
    }

    let encoded = serde_json::to_vec(&payload).map_err(|e| {
        error!("Failed to encode ingest payload: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    })?;
    let job = state.jobs.enqueue(encoded, state.max_attempts).await?;

    metrics::record_http_enqueue();
    info!(job_id = %job.id, "Inbound email queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            ok: true,
            job_id: job.id,
            status: job.status,
        }),
    ))
}

/// Look up an ingest job
#[utoipa::path(
    get,
    path = "/api/v1/inbound/jobs/{job_id}",
    tag = "inbound",
    params(("job_id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job state", body = JobResponse),
        (status = 401, description = "Missing or wrong bearer token", body = ErrorResponse),
        (status = 404, description = "Job not found", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .jobs
        .get(job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {} not found", job_id)))?;
    Ok(Json(job.into()))
}

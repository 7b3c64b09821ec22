use axum::body::Bytes;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderValue, StatusCode};
use axum_test::TestServer;
use inlet_api::{create_router, AppState};
use inlet_common::config::ApiConfig;
use inlet_core::ingest::{IngestService, RecipientPolicy};
use inlet_core::worker::{IngestJobPayload, IngestWorker, WorkerOptions};
use inlet_storage::models::CreateDomain;
use inlet_storage::repository::{
    DomainRepository, InboundDomainConfigRepository, IngestJobRepository,
};
use inlet_storage::MemoryStore;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

const TOKEN: &str = "s3cret";

fn server_with(store: &MemoryStore, token: Option<&str>, max_body_bytes: usize) -> TestServer {
    let config = ApiConfig {
        inbound_token: token.map(str::to_string),
        max_body_bytes,
        ..ApiConfig::default()
    };
    let state = AppState::new(Arc::new(store.clone()), &config, 3);
    TestServer::new(create_router(state, 16)).unwrap()
}

fn server(store: &MemoryStore) -> TestServer {
    server_with(store, Some(TOKEN), 64 * 1024)
}

fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {}", token)).unwrap()
}

async fn add_receiving_domain(store: &MemoryStore, name: &str) {
    let domain = DomainRepository::create(
        store,
        CreateDomain {
            user_id: Uuid::now_v7(),
            name: name.to_string(),
            verified: true,
        },
    )
    .await
    .unwrap();
    store.upsert(domain.id, "mx.inlet.test").await.unwrap();
    store.record_verification(domain.id, true, "").await.unwrap();
}

#[tokio::test]
async fn test_enqueue_returns_accepted() {
    let store = MemoryStore::new();
    let server = server(&store);

    let response = server
        .post("/api/v1/inbound/emails")
        .add_header(AUTHORIZATION, bearer(TOKEN))
        .json(&json!({
            "sender": "a@x.example",
            "recipients": ["b@y.example"],
            "subject": "Hello",
            "text_body": "Hi",
        }))
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["status"], json!("queued"));

    let job_id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();
    let job = IngestJobRepository::get(&store, job_id).await.unwrap().unwrap();
    assert_eq!(job.max_attempts, 3);

    let payload: IngestJobPayload = serde_json::from_slice(&job.payload).unwrap();
    assert_eq!(payload.sender, "a@x.example");
    assert_eq!(payload.recipients, vec!["b@y.example"]);
    assert_eq!(payload.subject, "Hello");
}

#[tokio::test]
async fn test_raw_only_request_is_usable() {
    let store = MemoryStore::new();
    let server = server(&store);

    let response = server
        .post("/api/v1/inbound/emails")
        .add_header(AUTHORIZATION, bearer(TOKEN))
        .json(&json!({
            "raw_rfc822": "From: a@x.example\r\nTo: b@y.example\r\n\r\nhello",
        }))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_missing_token_configuration_is_unavailable() {
    let store = MemoryStore::new();
    let server = server_with(&store, None, 1024);

    let response = server
        .post("/api/v1/inbound/emails")
        .add_header(AUTHORIZATION, bearer(TOKEN))
        .json(&json!({"sender": "a@x.example", "recipients": ["b@y.example"]}))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["error"], json!("inbound api is not configured"));
}

#[tokio::test]
async fn test_wrong_or_missing_token_is_unauthorized() {
    let store = MemoryStore::new();
    let server = server(&store);
    let request = json!({"sender": "a@x.example", "recipients": ["b@y.example"]});

    server
        .post("/api/v1/inbound/emails")
        .json(&request)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    server
        .post("/api/v1/inbound/emails")
        .add_header(AUTHORIZATION, bearer("guess"))
        .json(&request)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    assert_eq!(store.stats().await.unwrap().queued, 0);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let store = MemoryStore::new();
    let server = server_with(&store, Some(TOKEN), 128);

    let response = server
        .post("/api/v1/inbound/emails")
        .add_header(AUTHORIZATION, bearer(TOKEN))
        .json(&json!({
            "sender": "a@x.example",
            "recipients": ["b@y.example"],
            "text_body": "x".repeat(1024),
        }))
        .await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(store.stats().await.unwrap().queued, 0);
}

#[tokio::test]
async fn test_invalid_requests_are_bad_requests() {
    let store = MemoryStore::new();
    let server = server(&store);

    server
        .post("/api/v1/inbound/emails")
        .add_header(AUTHORIZATION, bearer(TOKEN))
        .bytes(Bytes::from_static(b"{not json"))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    for request in [
        json!({}),
        json!({"sender": "a@x.example"}),
        json!({"sender": "a@x.example", "recipients": ["  "]}),
        json!({"recipients": ["b@y.example"]}),
        json!({"raw_rfc822": "   "}),
    ] {
        server
            .post("/api/v1/inbound/emails")
            .add_header(AUTHORIZATION, bearer(TOKEN))
            .json(&request)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    assert_eq!(store.stats().await.unwrap().queued, 0);
}

#[tokio::test]
async fn test_job_lookup_reflects_worker_outcome() {
    let store = MemoryStore::new();
    add_receiving_domain(&store, "y.example").await;
    let server = server(&store);

    let body: Value = server
        .post("/api/v1/inbound/emails")
        .add_header(AUTHORIZATION, bearer(TOKEN))
        .json(&json!({
            "sender": "a@x.example",
            "recipients": ["b@y.example", "c@unknown.example"],
        }))
        .await
        .json();
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let queued: Value = server
        .get(&format!("/api/v1/inbound/jobs/{}", job_id))
        .add_header(AUTHORIZATION, bearer(TOKEN))
        .await
        .json();
    assert_eq!(queued["status"], json!("queued"));
    assert_eq!(queued["attempts"], json!(0));

    let shared = Arc::new(store.clone());
    let service = IngestService::new(
        RecipientPolicy::new(shared.clone(), shared.clone(), shared.clone()),
        shared.clone(),
        None,
    );
    let worker = IngestWorker::new(shared, Arc::new(service), WorkerOptions::default());
    assert!(worker.process_one().await.unwrap());

    let done: Value = server
        .get(&format!("/api/v1/inbound/jobs/{}", job_id))
        .add_header(AUTHORIZATION, bearer(TOKEN))
        .await
        .json();
    assert_eq!(done["status"], json!("done"));
    assert_eq!(done["accepted"], json!(1));
    assert_eq!(done["dropped"], json!(1));
    assert_eq!(store.emails().len(), 1);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let store = MemoryStore::new();
    let server = server(&store);

    let response = server
        .get(&format!("/api/v1/inbound/jobs/{}", Uuid::now_v7()))
        .add_header(AUTHORIZATION, bearer(TOKEN))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);

    server
        .get(&format!("/api/v1/inbound/jobs/{}", Uuid::now_v7()))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health_metrics_and_docs() {
    let store = MemoryStore::new();
    let server = server(&store);

    let health: Value = server.get("/health").await.json();
    assert_eq!(health["status"], json!("healthy"));

    let ready = server.get("/health/ready").await;
    ready.assert_status(StatusCode::OK);
    let ready: Value = ready.json();
    assert_eq!(ready["queued"], json!(0));

    server
        .post("/api/v1/inbound/emails")
        .add_header(AUTHORIZATION, bearer(TOKEN))
        .json(&json!({"sender": "a@x.example", "recipients": ["b@y.example"]}))
        .await
        .assert_status(StatusCode::ACCEPTED);
    let metrics = server.get("/metrics").await.text();
    assert!(metrics.contains("inlet_http_enqueued_total"));

    let doc: Value = server.get("/api-docs/openapi.json").await.json();
    assert!(doc["paths"]["/api/v1/inbound/emails"]["post"].is_object());
}

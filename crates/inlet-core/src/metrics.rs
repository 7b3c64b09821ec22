//! Prometheus counters for the ingestion pipeline
//!
//! Counters live in the default registry so `prometheus::gather()` exposes
//! them without extra wiring.

use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};
use std::sync::OnceLock;

struct Metrics {
    recipients: IntCounterVec,
    jobs: IntCounterVec,
    smtp_transactions: IntCounterVec,
    http_enqueued: IntCounter,
}

fn metrics() -> &'static Metrics {
    static METRICS: OnceLock<Metrics> = OnceLock::new();
    METRICS.get_or_init(|| Metrics {
        recipients: register_int_counter_vec!(
            "inlet_ingest_recipients_total",
            "Recipients processed by the ingest service, by outcome",
            &["outcome"]
        )
        .expect("register inlet_ingest_recipients_total"),
        jobs: register_int_counter_vec!(
            "inlet_ingest_jobs_total",
            "Ingest jobs finished by the worker, by result",
            &["result"]
        )
        .expect("register inlet_ingest_jobs_total"),
        smtp_transactions: register_int_counter_vec!(
            "inlet_smtp_transactions_total",
            "SMTP DATA transactions, by result",
            &["result"]
        )
        .expect("register inlet_smtp_transactions_total"),
        http_enqueued: register_int_counter!(
            "inlet_http_enqueued_total",
            "Ingest jobs enqueued through the HTTP front door"
        )
        .expect("register inlet_http_enqueued_total"),
    })
}

/// Count one recipient: `accepted` or a drop reason
pub fn record_recipient(outcome: &str) {
    metrics().recipients.with_label_values(&[outcome]).inc();
}

/// Count one finished job: `done`, `retry` or `failed`
pub fn record_job(result: &str) {
    metrics().jobs.with_label_values(&[result]).inc();
}

pub fn record_smtp_transaction(result: &str) {
    metrics().smtp_transactions.with_label_values(&[result]).inc();
}

pub fn record_http_enqueue() {
    metrics().http_enqueued.inc();
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> String {
    let encoder = prometheus::TextEncoder::new();
    encoder
        .encode_to_string(&prometheus::gather())
        .unwrap_or_else(|e| format!("# failed to encode metrics: {}\n", e))
}

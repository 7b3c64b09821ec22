//! Ingestion worker
//!
//! A polling loop that claims one job at a time from the ingest queue,
//! decodes its payload, runs the ingest service and reports the result back
//! to the queue. Any number of workers may poll the same queue; exclusivity
//! comes from the store's claim.

mod payload;

pub use payload::IngestJobPayload;

use crate::ingest::IngestService;
use crate::message::InboundMessage;
use crate::metrics;
use crate::mime::{decode_rfc822, DecodeError, DEFAULT_MAX_ATTACHMENT_BYTES};
use chrono::Utc;
use inlet_common::config::WorkerConfig;
use inlet_common::Result;
use inlet_storage::models::IngestJob;
use inlet_storage::repository::IngestJobRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Worker timing and limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    pub poll_interval: Duration,
    pub retry_base_delay: Duration,
    pub max_retry_delay: Duration,
    pub max_attachment_bytes: usize,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            retry_base_delay: Duration::from_secs(5),
            max_retry_delay: Duration::from_secs(600),
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
        }
    }
}

impl WorkerOptions {
    /// Options from configuration; zero values fall back to the defaults
    pub fn from_config(config: &WorkerConfig) -> Self {
        let defaults = Self::default();
        let or_default = |value: Duration, default: Duration| {
            if value.is_zero() {
                default
            } else {
                value
            }
        };
        Self {
            poll_interval: or_default(config.poll_interval(), defaults.poll_interval),
            retry_base_delay: or_default(config.retry_base_delay(), defaults.retry_base_delay),
            max_retry_delay: or_default(config.max_retry_delay(), defaults.max_retry_delay),
            max_attachment_bytes: if config.max_attachment_bytes == 0 {
                defaults.max_attachment_bytes
            } else {
                config.max_attachment_bytes
            },
        }
    }

    /// Delay before the retry that follows `attempt` failed attempts.
    ///
    /// The first retry waits the base delay and every further attempt doubles
    /// it, capped at the maximum. Attempts below one count as one.
    pub fn backoff(&self, attempt: i32) -> Duration {
        let exponent = attempt.max(1).unsigned_abs() - 1;
        2u32.checked_pow(exponent)
            .and_then(|factor| self.retry_base_delay.checked_mul(factor))
            .map_or(self.max_retry_delay, |delay| delay.min(self.max_retry_delay))
    }
}

/// Ingestion worker
pub struct IngestWorker {
    jobs: Arc<dyn IngestJobRepository>,
    service: Arc<IngestService>,
    options: WorkerOptions,
}

impl IngestWorker {
    pub fn new(
        jobs: Arc<dyn IngestJobRepository>,
        service: Arc<IngestService>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            jobs,
            service,
            options,
        }
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// After a processed job the next claim happens immediately; an idle or
    /// failed cycle waits for the next tick. No job is claimed once shutdown
    /// has begun.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            poll_interval_ms = self.options.poll_interval.as_millis() as u64,
            "Ingest worker started"
        );

        while !shutdown.is_cancelled() {
            match self.process_one().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => error!("Ingest worker cycle failed: {}", e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
        }

        info!("Ingest worker stopped");
    }

    /// Claim and process at most one job. Returns whether a job was claimed.
    pub async fn process_one(&self) -> Result<bool> {
        let Some(job) = self.jobs.claim_next().await? else {
            return Ok(false);
        };
        let span = info_span!("ingest_job", job_id = %job.id, attempt = job.attempts);
        self.process(job).instrument(span).await?;
        Ok(true)
    }

    async fn process(&self, job: IngestJob) -> Result<()> {
        let mut payload: IngestJobPayload = match serde_json::from_slice(&job.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Rejecting ingest job with invalid payload: {}", e);
                return self.fail(&job, &format!("invalid payload: {}", e)).await;
            }
        };
        payload.normalize();

        let message = match self.build_message(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Rejecting ingest job with undecodable raw message: {}", e);
                return self.fail(&job, &format!("invalid raw_rfc822: {}", e)).await;
            }
        };

        match self.service.ingest(&message).await {
            Ok(outcome) => {
                debug!(accepted = outcome.accepted, dropped = outcome.dropped, "ingest job done");
                self.jobs
                    .mark_done(job.id, outcome.accepted, outcome.dropped)
                    .await?;
                metrics::record_job("done");
                Ok(())
            }
            Err(failure) if failure.is_permanent() || job.attempts_exhausted() => {
                warn!(
                    accepted = failure.outcome.accepted,
                    dropped = failure.outcome.dropped,
                    permanent = failure.is_permanent(),
                    "Ingest job failed: {}",
                    failure
                );
                self.fail(&job, &failure.to_string()).await
            }
            Err(failure) => {
                let delay = self.options.backoff(job.attempts);
                let available_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                warn!(
                    retry_in_ms = delay.as_millis() as u64,
                    "Ingest job will be retried: {}",
                    failure
                );
                self.jobs
                    .mark_retry(job.id, available_at, &failure.to_string())
                    .await?;
                metrics::record_job("retry");
                Ok(())
            }
        }
    }

    async fn fail(&self, job: &IngestJob, reason: &str) -> Result<()> {
        self.jobs.mark_failed(job.id, reason).await?;
        metrics::record_job("failed");
        Ok(())
    }

    /// Explicit payload fields win; decoded fields only fill the blanks
    fn build_message(&self, payload: IngestJobPayload) -> std::result::Result<InboundMessage, DecodeError> {
        let mut message = payload.into_message();
        let Some(raw) = message.raw.as_deref() else {
            return Ok(message);
        };
        let decoded = decode_rfc822(raw, self.options.max_attachment_bytes)?;

        fill_blank(&mut message.sender, decoded.sender);
        fill_blank(&mut message.subject, decoded.subject);
        fill_blank(&mut message.text_body, decoded.text_body);
        fill_blank(&mut message.html_body, decoded.html_body);
        fill_blank(&mut message.message_id, decoded.message_id);
        if message.recipients.is_empty() {
            message.recipients = decoded.recipients;
        }
        message.sender_name = decoded.sender_name;
        message.attachments = decoded.attachments;
        Ok(message)
    }
}

fn fill_blank(field: &mut String, decoded: String) {
    if field.is_empty() {
        *field = decoded;
    }
}

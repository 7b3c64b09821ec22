//! Downstream hand-off of a completed SMTP transaction

use crate::ingest::IngestService;
use crate::mime::{decode_rfc822, DEFAULT_MAX_ATTACHMENT_BYTES};
use crate::worker::IngestJobPayload;
use async_trait::async_trait;
use inlet_common::types::EmailAddress;
use inlet_storage::repository::IngestJobRepository;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Envelope of one SMTP transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// `None` for the null sender `<>`
    pub sender: Option<EmailAddress>,
    pub recipient: EmailAddress,
}

/// Why a transaction could not be handed downstream
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The sending server must not retry
    #[error("{0}")]
    Permanent(String),

    /// The sending server should retry later
    #[error("{0}")]
    Transient(String),
}

/// Hand-off target for accepted DATA payloads
#[async_trait]
pub trait SmtpDelivery: Send + Sync {
    /// Returns a reference for the `250` reply
    async fn deliver(&self, envelope: &Envelope, raw: &[u8]) -> Result<String, DeliveryError>;
}

/// Fields pulled out of a raw message for the queue payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageSummary {
    pub sender: String,
    pub subject: String,
    pub text_body: String,
}

/// Extract sender, subject and a text body from raw DATA bytes.
///
/// Text parts are preferred over HTML. When the message cannot be decoded the
/// body is whatever follows the header block, and the sender falls back to
/// the envelope sender.
pub fn summarize(raw: &[u8], envelope_sender: Option<&EmailAddress>) -> MessageSummary {
    let fallback_sender = envelope_sender.map(ToString::to_string).unwrap_or_default();
    match decode_rfc822(raw, DEFAULT_MAX_ATTACHMENT_BYTES) {
        Ok(message) => {
            let text_body = match message.display_text() {
                text if text.is_empty() => body_after_headers(raw),
                text => text,
            };
            MessageSummary {
                sender: if message.sender.is_empty() {
                    fallback_sender
                } else {
                    message.sender
                },
                subject: message.subject,
                text_body,
            }
        }
        Err(e) => {
            debug!("raw message not decodable, using plain body: {}", e);
            MessageSummary {
                sender: fallback_sender,
                subject: String::new(),
                text_body: body_after_headers(raw),
            }
        }
    }
}

fn body_after_headers(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let body = text
        .split_once("\r\n\r\n")
        .or_else(|| text.split_once("\n\n"))
        .map_or("", |(_, body)| body);
    body.trim().to_string()
}

/// Enqueue an ingest job and let the worker process it
pub struct QueuedDelivery {
    jobs: Arc<dyn IngestJobRepository>,
    max_attempts: i32,
}

impl QueuedDelivery {
    pub fn new(jobs: Arc<dyn IngestJobRepository>, max_attempts: i32) -> Self {
        Self { jobs, max_attempts }
    }
}

#[async_trait]
impl SmtpDelivery for QueuedDelivery {
    async fn deliver(&self, envelope: &Envelope, raw: &[u8]) -> Result<String, DeliveryError> {
        let summary = summarize(raw, envelope.sender.as_ref());
        let payload = IngestJobPayload {
            sender: summary.sender,
            recipients: vec![envelope.recipient.to_string()],
            subject: summary.subject,
            text_body: summary.text_body,
            raw_rfc822: String::from_utf8_lossy(raw).into_owned(),
            ..IngestJobPayload::default()
        };
        let body = serde_json::to_vec(&payload)
            .map_err(|e| DeliveryError::Permanent(format!("encode job payload: {}", e)))?;

        let job = self
            .jobs
            .enqueue(body, self.max_attempts)
            .await
            .map_err(|e| DeliveryError::Transient(format!("enqueue ingest job: {}", e)))?;
        Ok(job.id.to_string())
    }
}

/// Decode and ingest while the client waits
pub struct DirectDelivery {
    service: Arc<IngestService>,
    max_attachment_bytes: usize,
}

impl DirectDelivery {
    pub fn new(service: Arc<IngestService>, max_attachment_bytes: usize) -> Self {
        Self {
            service,
            max_attachment_bytes,
        }
    }
}

#[async_trait]
impl SmtpDelivery for DirectDelivery {
    async fn deliver(&self, envelope: &Envelope, raw: &[u8]) -> Result<String, DeliveryError> {
        let mut message = decode_rfc822(raw, self.max_attachment_bytes)
            .map_err(|e| DeliveryError::Permanent(format!("invalid message: {}", e)))?;
        if message.sender.is_empty() {
            message.sender = envelope
                .sender
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
        }
        message.recipients = vec![envelope.recipient.to_string()];
        message.raw = Some(raw.to_vec());

        match self.service.ingest(&message).await {
            Ok(outcome) => Ok(format!("accepted={} dropped={}", outcome.accepted, outcome.dropped)),
            Err(failure) if failure.is_permanent() => {
                Err(DeliveryError::Permanent(failure.to_string()))
            }
            Err(failure) => Err(DeliveryError::Transient(failure.to_string())),
        }
    }
}

//! Inlet Core - inbound mail ingestion
//!
//! This crate turns untrusted inbound mail into stored inbound emails: the
//! MIME decoder, the recipient policy and ingest service, the queue worker,
//! the SMTP front door and MX verification of receiving domains.

pub mod ingest;
pub mod message;
pub mod metrics;
pub mod mime;
pub mod mx;
pub mod notify;
pub mod smtp;
pub mod worker;

pub use ingest::{
    DropReason, IngestError, IngestFailure, IngestOutcome, IngestService, RecipientPolicy,
    RuleCache, Verdict,
};
pub use message::{Attachment, InboundMessage};
pub use mime::{decode_rfc822, html_to_text, DecodeError};
pub use mx::{DnsMxResolver, InboundDomainService, MxResolver};
pub use notify::{InboundNotifier, NoopNotifier, WebhookNotifier};
pub use smtp::{DirectDelivery, PolicyDirectory, QueuedDelivery, SmtpDelivery, SmtpServer};
pub use worker::{IngestJobPayload, IngestWorker, WorkerOptions};

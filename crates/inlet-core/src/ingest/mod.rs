//! Ingest service: recipient policy and persistence of accepted messages

mod pattern;
mod policy;
mod service;

pub use pattern::{glob_match, BadPattern};
pub use policy::{rules_allow, DropReason, RecipientPolicy, RuleCache, Verdict};
pub use service::{blob_extension, blob_key, IngestService};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-call recipient counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub accepted: i32,
    pub dropped: i32,
}

impl IngestOutcome {
    pub fn considered(&self) -> i32 {
        self.accepted + self.dropped
    }
}

/// Ingest failure taxonomy
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("sender is required")]
    SenderRequired,

    #[error("at least one recipient is required")]
    RecipientsRequired,

    #[error("invalid sender address: {0}")]
    InvalidSender(String),

    #[error("{stage}: {source}")]
    Store {
        stage: &'static str,
        #[source]
        source: inlet_common::Error,
    },
}

impl IngestError {
    /// Whether retrying the same input can never succeed
    pub fn is_permanent(&self) -> bool {
        match self {
            IngestError::SenderRequired
            | IngestError::RecipientsRequired
            | IngestError::InvalidSender(_) => true,
            IngestError::Store { .. } => false,
        }
    }

    pub(crate) fn store(stage: &'static str, source: inlet_common::Error) -> Self {
        IngestError::Store { stage, source }
    }
}

/// A failed ingest call together with the progress made before the failure
#[derive(Debug, Error)]
#[error("{error}")]
pub struct IngestFailure {
    pub error: IngestError,
    pub outcome: IngestOutcome,
}

impl IngestFailure {
    pub fn is_permanent(&self) -> bool {
        self.error.is_permanent()
    }
}

impl From<IngestError> for IngestFailure {
    fn from(error: IngestError) -> Self {
        Self {
            error,
            outcome: IngestOutcome::default(),
        }
    }
}

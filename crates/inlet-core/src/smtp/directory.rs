//! Recipient lookup at RCPT time

use crate::ingest::{DropReason, RecipientPolicy, RuleCache, Verdict};
use async_trait::async_trait;
use inlet_common::types::EmailAddress;
use inlet_common::Result;
use inlet_storage::models::Domain;

/// Result of looking up an envelope recipient
#[derive(Debug, Clone)]
pub enum RouteLookup {
    /// Deliverable; mail lands in the inbox of the domain owner
    Deliver(Domain),
    /// Known domain, but policy refuses this recipient
    Disabled(DropReason),
    /// Not a domain we receive for
    Unknown,
}

/// Synchronous routing decision for one recipient
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn lookup(&self, address: &EmailAddress) -> Result<RouteLookup>;
}

/// Directory backed by the same policy chain the ingest service applies
pub struct PolicyDirectory {
    policy: RecipientPolicy,
}

impl PolicyDirectory {
    pub fn new(policy: RecipientPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl RecipientDirectory for PolicyDirectory {
    async fn lookup(&self, address: &EmailAddress) -> Result<RouteLookup> {
        let mut cache = RuleCache::new();
        let lookup = match self.policy.evaluate(&address.normalized(), &mut cache).await? {
            Verdict::Accept(domain) => RouteLookup::Deliver(domain),
            Verdict::Drop(DropReason::UnknownDomain | DropReason::Malformed) => RouteLookup::Unknown,
            Verdict::Drop(reason) => RouteLookup::Disabled(reason),
        };
        Ok(lookup)
    }
}

//! Repository layer for data access

pub mod domain_configs;
pub mod domains;
pub mod inbound_emails;
pub mod ingest_jobs;
pub mod recipient_rules;

// Re-export concrete repository implementations with simple names
pub use domain_configs::DbInboundDomainConfigRepository as InboundDomainConfigStore;
pub use domains::DbDomainRepository as DomainStore;
pub use inbound_emails::DbInboundEmailRepository as InboundEmailStore;
pub use ingest_jobs::DbIngestJobRepository as IngestJobStore;
pub use recipient_rules::DbRecipientRuleRepository as RecipientRuleStore;

// Re-export repository traits
pub use domain_configs::InboundDomainConfigRepository;
pub use domains::DomainRepository;
pub use inbound_emails::InboundEmailRepository;
pub use ingest_jobs::{IngestJobRepository, DEFAULT_MAX_ATTEMPTS};
pub use recipient_rules::RecipientRuleRepository;

//! Recipient policy: domain verification, MX verification and recipient rules

use super::pattern::glob_match;
use inlet_common::types::{normalize_local_part, DomainId, EmailAddress, RuleAction, RuleType};
use inlet_common::Result;
use inlet_storage::models::{Domain, InboundRecipientRule};
use inlet_storage::repository::{
    DomainRepository, InboundDomainConfigRepository, RecipientRuleRepository,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Why a recipient was not delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Address could not be parsed
    Malformed,
    /// No domain with that name
    UnknownDomain,
    /// Domain ownership not verified
    DomainUnverified,
    /// Inbound config missing or MX not pointing at us
    MxUnverified,
    /// A recipient rule with the drop action matched
    Rule,
    /// Same message already stored for this recipient
    Duplicate,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Malformed => "malformed",
            DropReason::UnknownDomain => "unknown_domain",
            DropReason::DomainUnverified => "domain_unverified",
            DropReason::MxUnverified => "mx_unverified",
            DropReason::Rule => "rule",
            DropReason::Duplicate => "duplicate",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one recipient
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Deliver into the inbox of the domain owner
    Accept(Domain),
    Drop(DropReason),
}

/// Recipient rules loaded during one evaluation pass, keyed by domain.
///
/// Create one per ingestion call; it is never shared between calls.
#[derive(Debug, Default)]
pub struct RuleCache {
    rules: HashMap<DomainId, Vec<InboundRecipientRule>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Layered recipient policy over the domain, inbound config and rule stores
#[derive(Clone)]
pub struct RecipientPolicy {
    domains: Arc<dyn DomainRepository>,
    configs: Arc<dyn InboundDomainConfigRepository>,
    rules: Arc<dyn RecipientRuleRepository>,
}

impl RecipientPolicy {
    pub fn new(
        domains: Arc<dyn DomainRepository>,
        configs: Arc<dyn InboundDomainConfigRepository>,
        rules: Arc<dyn RecipientRuleRepository>,
    ) -> Self {
        Self {
            domains,
            configs,
            rules,
        }
    }

    /// Evaluate a normalized recipient address.
    ///
    /// Checks run in order: domain known, domain verified, MX verified,
    /// recipient rules. Store failures are returned as errors; every policy
    /// outcome is a [`Verdict`].
    pub async fn evaluate(&self, address: &EmailAddress, cache: &mut RuleCache) -> Result<Verdict> {
        let Some(domain) = self.domains.get_by_name(&address.domain).await? else {
            debug!(domain = %address.domain, "recipient domain unknown");
            return Ok(Verdict::Drop(DropReason::UnknownDomain));
        };
        if !domain.verified {
            debug!(domain = %domain.name, "recipient domain not verified");
            return Ok(Verdict::Drop(DropReason::DomainUnverified));
        }

        let mx_verified = self
            .configs
            .get(domain.id)
            .await?
            .is_some_and(|config| config.mx_verified);
        if !mx_verified {
            debug!(domain = %domain.name, "recipient domain MX not verified");
            return Ok(Verdict::Drop(DropReason::MxUnverified));
        }

        if !cache.rules.contains_key(&domain.id) {
            let loaded = self.rules.list_active(domain.id).await?;
            cache.rules.insert(domain.id, loaded);
        }
        let rules = cache
            .rules
            .get(&domain.id)
            .map(Vec::as_slice)
            .unwrap_or_default();

        if !rules_allow(&address.local_lowercase(), rules) {
            debug!(domain = %domain.name, local = %address.local, "recipient dropped by rule");
            return Ok(Verdict::Drop(DropReason::Rule));
        }

        Ok(Verdict::Accept(domain))
    }
}

/// Apply recipient rules to a lower-cased local part.
///
/// Active exact rules are consulted before wildcard rules and the first
/// match decides. A recipient no rule matches is allowed.
pub fn rules_allow(local: &str, rules: &[InboundRecipientRule]) -> bool {
    let local = normalize_local_part(local);
    if local.is_empty() {
        return false;
    }

    let active = || rules.iter().filter(|rule| rule.is_active);

    let exact = active()
        .filter(|rule| rule.kind() == Some(RuleType::Exact))
        .find(|rule| normalize_local_part(&rule.pattern) == local);
    if let Some(rule) = exact {
        return rule.action_enum() != RuleAction::Drop;
    }

    let wildcard = active()
        .filter(|rule| rule.kind() == Some(RuleType::Wildcard))
        .find(|rule| {
            glob_match(&normalize_local_part(&rule.pattern), &local).unwrap_or(false)
        });
    if let Some(rule) = wildcard {
        return rule.action_enum() != RuleAction::Drop;
    }

    true
}

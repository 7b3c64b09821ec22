//! MX verification of inbound domains
//!
//! A domain only receives mail once its MX records point at the configured
//! target host. The result of every check is recorded on the domain's
//! inbound config.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use inlet_common::types::{normalize_host, DomainId};
use inlet_storage::models::{Domain, InboundDomainConfig};
use inlet_storage::repository::{DomainRepository, InboundDomainConfigRepository};
use std::sync::Arc;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;
use tracing::{debug, info, warn};

/// MX host lookup
#[async_trait]
pub trait MxResolver: Send + Sync {
    /// Exchange hosts for `domain`, most preferred first. A domain without
    /// MX records yields an empty list.
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<String>>;
}

/// Resolver backed by the system's upstream DNS
pub struct DnsMxResolver {
    resolver: TokioAsyncResolver,
}

impl DnsMxResolver {
    pub fn new() -> Self {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self { resolver }
    }

    pub fn with_resolver(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }
}

impl Default for DnsMxResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MxResolver for DnsMxResolver {
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<String>> {
        match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => {
                let mut records: Vec<_> = lookup
                    .iter()
                    .map(|mx| (mx.preference(), mx.exchange().to_string()))
                    .collect();
                records.sort();
                Ok(records.into_iter().map(|(_, host)| host).collect())
            }
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(anyhow!("DNS lookup failed: {}", e)),
        }
    }
}

/// Creates inbound configs and verifies their MX records
pub struct InboundDomainService {
    domains: Arc<dyn DomainRepository>,
    configs: Arc<dyn InboundDomainConfigRepository>,
    resolver: Arc<dyn MxResolver>,
    mx_target: String,
}

impl InboundDomainService {
    pub fn new(
        domains: Arc<dyn DomainRepository>,
        configs: Arc<dyn InboundDomainConfigRepository>,
        resolver: Arc<dyn MxResolver>,
        mx_target: &str,
    ) -> Self {
        Self {
            domains,
            configs,
            resolver,
            mx_target: normalize_host(mx_target),
        }
    }

    pub fn mx_target(&self) -> &str {
        &self.mx_target
    }

    /// Get or create the inbound config of a domain
    pub async fn ensure_config(&self, domain_id: DomainId) -> inlet_common::Result<InboundDomainConfig> {
        match self.configs.get(domain_id).await? {
            Some(config) if config.mx_target == self.mx_target => Ok(config),
            _ => self.configs.upsert(domain_id, &self.mx_target).await,
        }
    }

    /// Resolve the domain's MX hosts and record whether one of them is the
    /// configured target. A failed lookup is recorded as unverified.
    pub async fn verify_mx(&self, domain: &Domain) -> inlet_common::Result<bool> {
        self.ensure_config(domain.id).await?;

        let (verified, last_error) = match self.resolver.lookup_mx(&domain.name).await {
            Ok(hosts) => {
                let verified = hosts
                    .iter()
                    .any(|host| normalize_host(host) == self.mx_target);
                debug!(domain = %domain.name, ?hosts, verified, "MX lookup finished");
                if verified {
                    (true, String::new())
                } else {
                    (false, format!("mx record not found; expected {}", self.mx_target))
                }
            }
            Err(e) => {
                warn!(domain = %domain.name, "MX lookup failed: {}", e);
                (false, format!("mx lookup failed: {}", e))
            }
        };

        self.configs
            .record_verification(domain.id, verified, &last_error)
            .await?;
        Ok(verified)
    }

    /// Re-check up to `limit` unverified configs, least recently checked
    /// first. Returns how many became verified.
    pub async fn verify_pending(&self, limit: i64) -> inlet_common::Result<usize> {
        let pending = self.configs.list_unverified(limit).await?;
        let mut verified = 0;
        for config in pending {
            let Some(domain) = self.domains.get(config.domain_id).await? else {
                continue;
            };
            if self.verify_mx(&domain).await? {
                info!(domain = %domain.name, "MX verified");
                verified += 1;
            }
        }
        Ok(verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inlet_storage::models::CreateDomain;
    use inlet_storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use uuid::Uuid;

    #[derive(Default)]
    struct FakeResolver {
        records: HashMap<String, Vec<String>>,
    }

    impl FakeResolver {
        fn with(mut self, domain: &str, hosts: &[&str]) -> Self {
            self.records
                .insert(domain.to_string(), hosts.iter().map(|h| h.to_string()).collect());
            self
        }
    }

    #[async_trait]
    impl MxResolver for FakeResolver {
        async fn lookup_mx(&self, domain: &str) -> Result<Vec<String>> {
            match self.records.get(domain) {
                Some(hosts) => Ok(hosts.clone()),
                None => Err(anyhow!("SERVFAIL")),
            }
        }
    }

    async fn domain(store: &MemoryStore, name: &str) -> Domain {
        DomainRepository::create(
            store,
            CreateDomain {
                user_id: Uuid::now_v7(),
                name: name.to_string(),
                verified: true,
            },
        )
        .await
        .unwrap()
    }

    async fn load_config(store: &MemoryStore, domain_id: DomainId) -> Option<InboundDomainConfig> {
        InboundDomainConfigRepository::get(store, domain_id).await.unwrap()
    }

    fn service(store: &MemoryStore, resolver: FakeResolver) -> InboundDomainService {
        let store = Arc::new(store.clone());
        InboundDomainService::new(store.clone(), store, Arc::new(resolver), "MX.Inlet.Test.")
    }

    #[tokio::test]
    async fn test_verify_mx_records_outcome() {
        let store = MemoryStore::new();
        let good = domain(&store, "good.example").await;
        let wrong = domain(&store, "wrong.example").await;
        let broken = domain(&store, "broken.example").await;

        let service = service(
            &store,
            FakeResolver::default()
                .with("good.example", &["backup.other.example.", "mx.inlet.test."])
                .with("wrong.example", &["mx.other.example."]),
        );
        assert_eq!(service.mx_target(), "mx.inlet.test");

        assert!(service.verify_mx(&good).await.unwrap());
        let config = load_config(&store, good.id).await.unwrap();
        assert!(config.mx_verified);
        assert_eq!(config.last_error, "");
        assert!(config.checked_at.is_some());

        assert!(!service.verify_mx(&wrong).await.unwrap());
        let config = load_config(&store, wrong.id).await.unwrap();
        assert!(!config.mx_verified);
        assert_eq!(config.last_error, "mx record not found; expected mx.inlet.test");

        assert!(!service.verify_mx(&broken).await.unwrap());
        let config = load_config(&store, broken.id).await.unwrap();
        assert_eq!(config.last_error, "mx lookup failed: SERVFAIL");
    }

    #[tokio::test]
    async fn test_ensure_config_uses_target() {
        let store = MemoryStore::new();
        let domain = domain(&store, "y.example").await;
        store.upsert(domain.id, "old.inlet.test").await.unwrap();
        store.record_verification(domain.id, true, "").await.unwrap();

        let service = service(&store, FakeResolver::default());
        let config = service.ensure_config(domain.id).await.unwrap();
        assert_eq!(config.mx_target, "mx.inlet.test");
        assert!(!config.mx_verified);

        let again = service.ensure_config(domain.id).await.unwrap();
        assert_eq!(again.created_at, config.created_at);
    }

    #[tokio::test]
    async fn test_verify_pending_sweeps_unverified() {
        let store = MemoryStore::new();
        let first = domain(&store, "one.example").await;
        let second = domain(&store, "two.example").await;

        let service = service(
            &store,
            FakeResolver::default()
                .with("one.example", &["mx.inlet.test"])
                .with("two.example", &[]),
        );
        service.ensure_config(first.id).await.unwrap();
        service.ensure_config(second.id).await.unwrap();

        assert_eq!(service.verify_pending(10).await.unwrap(), 1);
        assert!(load_config(&store, first.id).await.unwrap().mx_verified);
        assert!(!load_config(&store, second.id).await.unwrap().mx_verified);

        assert_eq!(service.verify_pending(10).await.unwrap(), 0);
    }
}

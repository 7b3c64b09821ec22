//! In-memory storage backend
//!
//! Implements every repository trait over a single mutex-guarded state, so
//! the job claim is trivially exclusive. Intended for tests and
//! single-process deployments; nothing survives a restart.

use crate::blob::BlobStore;
use crate::models::{
    CreateDomain, CreateRecipientRule, Domain, InboundDomainConfig, InboundEmail,
    InboundEmailAttachment, InboundEmailRaw, InboundRecipientRule, IngestJob, NewInboundEmail,
    QueueStats,
};
use crate::repository::domain_configs::InboundDomainConfigRepository;
use crate::repository::domains::DomainRepository;
use crate::repository::inbound_emails::InboundEmailRepository;
use crate::repository::ingest_jobs::{effective_max_attempts, IngestJobRepository};
use crate::repository::recipient_rules::RecipientRuleRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inlet_common::types::{normalize_host, normalize_local_part, DomainId, InboundEmailId, JobId, JobStatus, RuleType};
use inlet_common::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    domains: Vec<Domain>,
    configs: HashMap<DomainId, InboundDomainConfig>,
    rules: Vec<InboundRecipientRule>,
    emails: Vec<InboundEmail>,
    raws: HashMap<InboundEmailId, InboundEmailRaw>,
    attachments: Vec<InboundEmailAttachment>,
    jobs: Vec<IngestJob>,
}

/// In-memory implementation of all repositories
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All persisted inbound emails, oldest first
    pub fn emails(&self) -> Vec<InboundEmail> {
        self.state().emails.clone()
    }

    /// Raw source row of an email
    pub fn raw_for(&self, email_id: InboundEmailId) -> Option<InboundEmailRaw> {
        self.state().raws.get(&email_id).cloned()
    }

    /// Attachment rows of an email
    pub fn attachments_for(&self, email_id: InboundEmailId) -> Vec<InboundEmailAttachment> {
        self.state()
            .attachments
            .iter()
            .filter(|attachment| attachment.inbound_email_id == email_id)
            .cloned()
            .collect()
    }

    /// Make a queued job claimable now regardless of its retry time
    pub fn expedite(&self, id: JobId) {
        if let Some(job) = self.state().jobs.iter_mut().find(|job| job.id == id) {
            job.available_at = Utc::now();
        }
    }
}

#[async_trait]
impl DomainRepository for MemoryStore {
    async fn create(&self, input: CreateDomain) -> Result<Domain> {
        let name = normalize_host(&input.name);
        let mut state = self.state();
        if state.domains.iter().any(|domain| domain.name == name) {
            return Err(Error::Conflict(format!("domain {} already exists", name)));
        }
        let now = Utc::now();
        let domain = Domain {
            id: Uuid::now_v7(),
            user_id: input.user_id,
            name,
            verified: input.verified,
            created_at: now,
            updated_at: now,
        };
        state.domains.push(domain.clone());
        Ok(domain)
    }

    async fn get(&self, id: DomainId) -> Result<Option<Domain>> {
        Ok(self.state().domains.iter().find(|d| d.id == id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Domain>> {
        let name = normalize_host(name);
        Ok(self.state().domains.iter().find(|d| d.name == name).cloned())
    }
}

#[async_trait]
impl InboundDomainConfigRepository for MemoryStore {
    async fn get(&self, domain_id: DomainId) -> Result<Option<InboundDomainConfig>> {
        Ok(self.state().configs.get(&domain_id).cloned())
    }

    async fn upsert(&self, domain_id: DomainId, mx_target: &str) -> Result<InboundDomainConfig> {
        let now = Utc::now();
        let mut state = self.state();
        let config = state
            .configs
            .entry(domain_id)
            .and_modify(|config| {
                if config.mx_target != mx_target {
                    config.mx_verified = false;
                    config.mx_target = mx_target.to_string();
                }
                config.updated_at = now;
            })
            .or_insert_with(|| InboundDomainConfig {
                domain_id,
                mx_target: mx_target.to_string(),
                mx_verified: false,
                last_error: String::new(),
                checked_at: None,
                created_at: now,
                updated_at: now,
            });
        Ok(config.clone())
    }

    async fn record_verification(
        &self,
        domain_id: DomainId,
        mx_verified: bool,
        last_error: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state();
        let config = state
            .configs
            .get_mut(&domain_id)
            .ok_or_else(|| Error::NotFound(format!("inbound config for domain {}", domain_id)))?;
        config.mx_verified = mx_verified;
        config.last_error = last_error.to_string();
        config.checked_at = Some(now);
        config.updated_at = now;
        Ok(())
    }

    async fn list_unverified(&self, limit: i64) -> Result<Vec<InboundDomainConfig>> {
        let mut configs: Vec<_> = self
            .state()
            .configs
            .values()
            .filter(|config| !config.mx_verified)
            .cloned()
            .collect();
        configs.sort_by_key(|config| (config.checked_at, config.domain_id));
        configs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(configs)
    }
}

#[async_trait]
impl RecipientRuleRepository for MemoryStore {
    async fn create(&self, input: CreateRecipientRule) -> Result<InboundRecipientRule> {
        let now = Utc::now();
        let rule = InboundRecipientRule {
            id: Uuid::now_v7(),
            domain_id: input.domain_id,
            rule_type: input.rule_type.as_str().to_string(),
            pattern: normalize_local_part(&input.pattern),
            action: input.action.as_str().to_string(),
            is_active: input.is_active,
            created_at: now,
            updated_at: now,
        };
        self.state().rules.push(rule.clone());
        Ok(rule)
    }

    async fn list_active(&self, domain_id: DomainId) -> Result<Vec<InboundRecipientRule>> {
        let mut rules: Vec<_> = self
            .state()
            .rules
            .iter()
            .filter(|rule| rule.domain_id == domain_id && rule.is_active)
            .cloned()
            .collect();
        rules.sort_by_key(|rule| (rule.kind() != Some(RuleType::Exact), rule.created_at, rule.id));
        Ok(rules)
    }
}

#[async_trait]
impl InboundEmailRepository for MemoryStore {
    async fn create(&self, input: NewInboundEmail) -> Result<InboundEmail> {
        let (email, raw, attachments) = input.into_rows(Utc::now());
        let mut state = self.state();

        let duplicate = !email.message_id.is_empty()
            && state.emails.iter().any(|existing| {
                existing.domain_id == email.domain_id
                    && existing.recipient == email.recipient
                    && existing.message_id == email.message_id
            });
        if duplicate {
            return Err(Error::Conflict(format!(
                "inbound email {} for {} already stored",
                email.message_id, email.recipient
            )));
        }

        state.emails.push(email.clone());
        if let Some(raw) = raw {
            state.raws.insert(email.id, raw);
        }
        state.attachments.extend(attachments);
        Ok(email)
    }

    async fn get(&self, id: InboundEmailId) -> Result<Option<InboundEmail>> {
        Ok(self.state().emails.iter().find(|e| e.id == id).cloned())
    }
}

fn find_job(jobs: &mut [IngestJob], id: JobId) -> Result<&mut IngestJob> {
    jobs.iter_mut()
        .find(|job| job.id == id)
        .ok_or_else(|| Error::NotFound(format!("ingest job {}", id)))
}

#[async_trait]
impl IngestJobRepository for MemoryStore {
    async fn enqueue(&self, payload: Vec<u8>, max_attempts: i32) -> Result<IngestJob> {
        let now = Utc::now();
        let job = IngestJob {
            id: Uuid::now_v7(),
            status: JobStatus::Queued.as_str().to_string(),
            payload,
            attempts: 0,
            max_attempts: effective_max_attempts(max_attempts),
            available_at: now,
            locked_at: None,
            last_error: String::new(),
            accepted: 0,
            dropped: 0,
            created_at: now,
            updated_at: now,
            done_at: None,
        };
        self.state().jobs.push(job.clone());
        Ok(job)
    }

    async fn claim_next(&self) -> Result<Option<IngestJob>> {
        let now = Utc::now();
        let mut state = self.state();
        let next = state
            .jobs
            .iter_mut()
            .filter(|job| {
                job.status_enum() == Some(JobStatus::Queued) && job.available_at <= now
            })
            .min_by_key(|job| (job.available_at, job.id));

        Ok(next.map(|job| {
            job.status = JobStatus::Processing.as_str().to_string();
            job.attempts += 1;
            job.locked_at = Some(now);
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn mark_done(&self, id: JobId, accepted: i32, dropped: i32) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state();
        let job = find_job(&mut state.jobs, id)?;
        job.status = JobStatus::Done.as_str().to_string();
        job.accepted = accepted;
        job.dropped = dropped;
        job.last_error.clear();
        job.locked_at = None;
        job.done_at = Some(now);
        job.updated_at = now;
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: JobId,
        available_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        let mut state = self.state();
        let job = find_job(&mut state.jobs, id)?;
        job.status = JobStatus::Queued.as_str().to_string();
        job.available_at = available_at;
        job.last_error = last_error.to_string();
        job.locked_at = None;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, id: JobId, last_error: &str) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state();
        let job = find_job(&mut state.jobs, id)?;
        job.status = JobStatus::Failed.as_str().to_string();
        job.last_error = last_error.to_string();
        job.locked_at = None;
        job.done_at = Some(now);
        job.updated_at = now;
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<IngestJob>> {
        Ok(self.state().jobs.iter().find(|job| job.id == id).cloned())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut stats = QueueStats::default();
        for job in &self.state().jobs {
            match job.status_enum() {
                Some(JobStatus::Queued) => stats.queued += 1,
                Some(JobStatus::Processing) => stats.processing += 1,
                Some(JobStatus::Done) => stats.done += 1,
                Some(JobStatus::Failed) => stats.failed += 1,
                None => {}
            }
        }
        Ok(stats)
    }
}

/// In-memory blob store
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, (String, Vec<u8>)>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> MutexGuard<'_, HashMap<String, (String, Vec<u8>)>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.blobs().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Content type recorded for a key
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.blobs().get(key).map(|(content_type, _)| content_type.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, content_type: &str, data: &[u8]) -> Result<()> {
        self.blobs()
            .insert(key.to_string(), (content_type.to_string(), data.to_vec()));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs()
            .get(key)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| Error::NotFound(format!("blob {}", key)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs().remove(key);
        Ok(())
    }
}

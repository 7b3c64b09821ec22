//! Ingest service

use super::policy::{DropReason, RecipientPolicy, RuleCache, Verdict};
use super::{IngestError, IngestFailure, IngestOutcome};
use crate::message::InboundMessage;
use crate::metrics;
use crate::notify::{InboundNotifier, NoopNotifier};
use chrono::Utc;
use inlet_common::types::{DomainId, EmailAddress, InboundEmailId};
use inlet_storage::blob::BlobStore;
use inlet_storage::models::{Domain, InboundEmail, NewAttachment, NewInboundEmail, StoredContent};
use inlet_storage::repository::InboundEmailRepository;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const RAW_CONTENT_TYPE: &str = "message/rfc822";

/// Build a blob key of the form
/// `inbound/{kind}/{domain}/{email}/{unix_nanos}-{random}.{ext}`
pub fn blob_key(kind: &str, domain_id: DomainId, email_id: InboundEmailId, extension: &str) -> String {
    let extension = extension.trim().trim_start_matches('.');
    let extension = if extension.is_empty() { "bin" } else { extension };
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!(
        "inbound/{}/{}/{}/{}-{}.{}",
        kind,
        domain_id,
        email_id,
        nanos,
        Uuid::new_v4(),
        extension
    )
}

/// Blob extension for an attachment file name, `bin` when there is none
pub fn blob_extension(file_name: &str) -> &str {
    match file_name.trim().rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => ext,
        _ => "bin",
    }
}

enum Stored {
    Email(InboundEmail),
    Duplicate,
}

/// Applies recipient policy to a message and persists one inbound email per
/// accepted recipient
pub struct IngestService {
    policy: RecipientPolicy,
    emails: Arc<dyn InboundEmailRepository>,
    blobs: Option<Arc<dyn BlobStore>>,
    notifier: Arc<dyn InboundNotifier>,
}

impl IngestService {
    /// Without a blob store, raw sources and attachments are stored inline
    pub fn new(
        policy: RecipientPolicy,
        emails: Arc<dyn InboundEmailRepository>,
        blobs: Option<Arc<dyn BlobStore>>,
    ) -> Self {
        Self {
            policy,
            emails,
            blobs,
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn InboundNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn policy(&self) -> &RecipientPolicy {
        &self.policy
    }

    /// Ingest one message.
    ///
    /// Every recipient is either accepted (email row, raw source and
    /// attachments recorded together) or dropped. A store failure stops the
    /// call; the counters gathered so far travel with the error.
    pub async fn ingest(&self, message: &InboundMessage) -> Result<IngestOutcome, IngestFailure> {
        let sender = message.sender.trim();
        if sender.is_empty() {
            return Err(IngestError::SenderRequired.into());
        }
        let sender = EmailAddress::parse_mailbox(sender)
            .ok_or_else(|| IngestError::InvalidSender(sender.to_string()))?;
        if message.recipients.is_empty() {
            return Err(IngestError::RecipientsRequired.into());
        }
        let sender = sender.to_string().to_lowercase();

        let mut outcome = IngestOutcome::default();
        let mut cache = RuleCache::new();

        for recipient in &message.recipients {
            let Some(address) = EmailAddress::parse_mailbox(recipient) else {
                drop_recipient(&mut outcome, DropReason::Malformed);
                continue;
            };
            let address = address.normalized();

            let domain = match self.policy.evaluate(&address, &mut cache).await {
                Ok(Verdict::Accept(domain)) => domain,
                Ok(Verdict::Drop(reason)) => {
                    drop_recipient(&mut outcome, reason);
                    continue;
                }
                Err(e) => {
                    return Err(IngestFailure {
                        error: IngestError::store("resolve recipient", e),
                        outcome,
                    })
                }
            };

            let recipient = address.to_string();
            match self.store(&domain, &recipient, &sender, message).await {
                Ok(Stored::Email(email)) => {
                    outcome.accepted += 1;
                    metrics::record_recipient("accepted");
                    info!(email_id = %email.id, recipient = %email.recipient, "inbound email accepted");
                    if let Err(e) = self.notifier.notify(&email).await {
                        warn!(email_id = %email.id, "inbound notification failed: {}", e);
                    }
                }
                Ok(Stored::Duplicate) => {
                    debug!(recipient = %recipient, "duplicate delivery ignored");
                    drop_recipient(&mut outcome, DropReason::Duplicate);
                }
                Err(error) => return Err(IngestFailure { error, outcome }),
            }
        }

        Ok(outcome)
    }

    /// Upload blobs, then write all rows in one store call. Uploaded blobs are
    /// removed again if the rows are not written.
    async fn store(
        &self,
        domain: &Domain,
        recipient: &str,
        sender: &str,
        message: &InboundMessage,
    ) -> Result<Stored, IngestError> {
        let email_id = Uuid::now_v7();
        let mut uploaded: Vec<String> = Vec::new();

        let raw = match message.raw.as_deref() {
            Some(raw) if !raw.iter().all(u8::is_ascii_whitespace) => {
                let key = blob_key("raw", domain.id, email_id, "eml");
                match self.put(&key, RAW_CONTENT_TYPE, raw, &mut uploaded).await {
                    Ok(content) => Some(content),
                    Err(e) => {
                        self.discard(&uploaded).await;
                        return Err(IngestError::store("store inbound raw blob", e));
                    }
                }
            }
            _ => None,
        };

        let mut attachments = Vec::with_capacity(message.attachments.len());
        for attachment in message.attachments.iter().filter(|a| !a.content.is_empty()) {
            let key = blob_key(
                "attachments",
                domain.id,
                email_id,
                blob_extension(&attachment.file_name),
            );
            let content = match self
                .put(&key, &attachment.content_type, &attachment.content, &mut uploaded)
                .await
            {
                Ok(content) => content,
                Err(e) => {
                    self.discard(&uploaded).await;
                    return Err(IngestError::store("store inbound attachment blob", e));
                }
            };
            attachments.push(NewAttachment {
                file_name: attachment.file_name.clone(),
                content_type: attachment.content_type.clone(),
                size_bytes: attachment.size() as i64,
                content,
            });
        }

        let input = NewInboundEmail {
            id: email_id,
            user_id: domain.user_id,
            domain_id: domain.id,
            recipient: recipient.to_string(),
            sender: sender.to_string(),
            subject: message.subject.trim().to_string(),
            text_body: message.text_body.trim().to_string(),
            html_body: message.html_body.trim().to_string(),
            message_id: message.message_id.trim().to_string(),
            raw,
            attachments,
        };

        match self.emails.create(input).await {
            Ok(email) => Ok(Stored::Email(email)),
            Err(e) if e.is_conflict() => {
                self.discard(&uploaded).await;
                Ok(Stored::Duplicate)
            }
            Err(e) => {
                self.discard(&uploaded).await;
                Err(IngestError::store("create inbound email", e))
            }
        }
    }

    async fn put(
        &self,
        key: &str,
        content_type: &str,
        data: &[u8],
        uploaded: &mut Vec<String>,
    ) -> inlet_common::Result<StoredContent> {
        let Some(blobs) = &self.blobs else {
            return Ok(StoredContent::Inline(data.to_vec()));
        };
        blobs.put(key, content_type, data).await?;
        uploaded.push(key.to_string());
        Ok(StoredContent::Blob(key.to_string()))
    }

    async fn discard(&self, keys: &[String]) {
        let Some(blobs) = &self.blobs else {
            return;
        };
        for key in keys {
            if let Err(e) = blobs.delete(key).await {
                warn!(key = %key, "failed to remove orphaned blob: {}", e);
            }
        }
    }
}

fn drop_recipient(outcome: &mut IngestOutcome, reason: DropReason) {
    outcome.dropped += 1;
    metrics::record_recipient(reason.as_str());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Attachment;
    use async_trait::async_trait;
    use inlet_common::types::{RuleAction, RuleType};
    use inlet_storage::models::{CreateDomain, CreateRecipientRule};
    use inlet_storage::repository::{
        DomainRepository, InboundDomainConfigRepository, RecipientRuleRepository,
    };
    use inlet_storage::{MemoryBlobStore, MemoryStore};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Fixture {
        store: MemoryStore,
        service: IngestService,
        blobs: MemoryBlobStore,
    }

    async fn add_domain(store: &MemoryStore, name: &str, verified: bool, mx_verified: bool) -> Domain {
        let domain = DomainRepository::create(
            store,
            CreateDomain {
                user_id: Uuid::now_v7(),
                name: name.to_string(),
                verified,
            },
        )
        .await
        .unwrap();
        store.upsert(domain.id, "mx.inlet.test").await.unwrap();
        store
            .record_verification(domain.id, mx_verified, "")
            .await
            .unwrap();
        domain
    }

    fn fixture_with(store: MemoryStore, emails: Arc<dyn InboundEmailRepository>, with_blobs: bool) -> Fixture {
        let shared = Arc::new(store.clone());
        let policy = RecipientPolicy::new(shared.clone(), shared.clone(), shared);
        let blobs = MemoryBlobStore::new();
        let blob_store: Option<Arc<dyn BlobStore>> = if with_blobs {
            Some(Arc::new(blobs.clone()))
        } else {
            None
        };
        Fixture {
            service: IngestService::new(policy, emails, blob_store),
            store,
            blobs,
        }
    }

    fn fixture(with_blobs: bool) -> Fixture {
        let store = MemoryStore::new();
        let emails = Arc::new(store.clone());
        fixture_with(store, emails, with_blobs)
    }

    fn message(recipients: &[&str]) -> InboundMessage {
        InboundMessage {
            sender: "A <A@X.example>".to_string(),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            subject: " Hello ".to_string(),
            text_body: "Body".to_string(),
            message_id: "m1@x.example".to_string(),
            raw: Some(b"From: a@x.example\r\nTo: b@y.example\r\n\r\nBody".to_vec()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_accepts_verified_domain() {
        let fx = fixture(false);
        let domain = add_domain(&fx.store, "y.example", true, true).await;

        let outcome = fx.service.ingest(&message(&["b@Y.example."])).await.unwrap();
        assert_eq!(outcome, IngestOutcome { accepted: 1, dropped: 0 });

        let emails = fx.store.emails();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].user_id, domain.user_id);
        assert_eq!(emails[0].recipient, "b@y.example");
        assert_eq!(emails[0].sender, "a@x.example");
        assert_eq!(emails[0].subject, "Hello");

        let raw = fx.store.raw_for(emails[0].id).unwrap();
        assert!(raw.raw_source.is_some());
        assert_eq!(raw.blob_key, None);
    }

    #[tokio::test]
    async fn test_unverified_domain_drops() {
        let fx = fixture(false);
        add_domain(&fx.store, "y.example", false, true).await;

        let outcome = fx.service.ingest(&message(&["b@y.example"])).await.unwrap();
        assert_eq!(outcome, IngestOutcome { accepted: 0, dropped: 1 });
        assert!(fx.store.emails().is_empty());
    }

    #[tokio::test]
    async fn test_mixed_recipients_are_counted() {
        let fx = fixture(false);
        add_domain(&fx.store, "y.example", true, true).await;
        add_domain(&fx.store, "z.example", true, false).await;

        let outcome = fx
            .service
            .ingest(&message(&[
                "b@y.example",
                "not-an-address",
                "c@z.example",
                "d@unknown.example",
                "e@y.example",
            ]))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome { accepted: 2, dropped: 3 });
        assert_eq!(outcome.considered(), 5);
    }

    #[tokio::test]
    async fn test_exact_drop_rule_beats_wildcard() {
        let fx = fixture(false);
        let domain = add_domain(&fx.store, "y.example", true, true).await;
        for (rule_type, pattern, action) in [
            (RuleType::Wildcard, "*", RuleAction::Inbox),
            (RuleType::Exact, "noreply", RuleAction::Drop),
        ] {
            RecipientRuleRepository::create(
                &fx.store,
                CreateRecipientRule {
                    domain_id: domain.id,
                    rule_type,
                    pattern: pattern.to_string(),
                    action,
                    is_active: true,
                },
            )
            .await
            .unwrap();
        }

        let outcome = fx
            .service
            .ingest(&message(&["noreply@y.example", "hello@y.example"]))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome { accepted: 1, dropped: 1 });
    }

    #[tokio::test]
    async fn test_duplicate_delivery_counts_as_dropped() {
        let fx = fixture(true);
        add_domain(&fx.store, "y.example", true, true).await;
        let mut msg = message(&["b@y.example"]);
        msg.attachments.push(Attachment {
            file_name: "notes.txt".to_string(),
            content_type: "text/plain".to_string(),
            content: b"notes".to_vec(),
        });

        let first = fx.service.ingest(&msg).await.unwrap();
        assert_eq!(first, IngestOutcome { accepted: 1, dropped: 0 });
        let keys_after_first = fx.blobs.keys();
        assert_eq!(keys_after_first.len(), 2);

        let second = fx.service.ingest(&msg).await.unwrap();
        assert_eq!(second, IngestOutcome { accepted: 0, dropped: 1 });
        assert_eq!(fx.store.emails().len(), 1);
        assert_eq!(fx.blobs.keys(), keys_after_first);
    }

    #[tokio::test]
    async fn test_blob_keys_and_inline_fallback() {
        let fx = fixture(true);
        let domain = add_domain(&fx.store, "y.example", true, true).await;
        let mut msg = message(&["b@y.example"]);
        msg.attachments = vec![
            Attachment {
                file_name: "report.PDF".to_string(),
                content_type: "application/pdf".to_string(),
                content: b"%PDF".to_vec(),
            },
            Attachment {
                file_name: "empty.txt".to_string(),
                content_type: "text/plain".to_string(),
                content: Vec::new(),
            },
        ];

        fx.service.ingest(&msg).await.unwrap();
        let email = &fx.store.emails()[0];

        let raw = fx.store.raw_for(email.id).unwrap();
        let raw_key = raw.blob_key.unwrap();
        let raw_prefix = format!("inbound/raw/{}/{}/", domain.id, email.id);
        assert!(raw_key.starts_with(&raw_prefix));
        assert!(raw_key.ends_with(".eml"));
        assert_eq!(raw.raw_source, None);
        assert_eq!(fx.blobs.content_type(&raw_key).as_deref(), Some("message/rfc822"));

        let attachments = fx.store.attachments_for(email.id);
        assert_eq!(attachments.len(), 1);
        let key = attachments[0].blob_key.clone().unwrap();
        assert!(key.starts_with(&format!("inbound/attachments/{}/{}/", domain.id, email.id)));
        assert!(key.ends_with(".PDF"));
        assert_eq!(attachments[0].size_bytes, 4);
        assert_eq!(attachments[0].content, None);
    }

    #[tokio::test]
    async fn test_sender_and_recipient_validation() {
        let fx = fixture(false);

        let mut msg = message(&["b@y.example"]);
        msg.sender = "   ".to_string();
        let err = fx.service.ingest(&msg).await.unwrap_err();
        assert!(matches!(err.error, IngestError::SenderRequired));
        assert!(err.is_permanent());

        msg.sender = "not an address".to_string();
        let err = fx.service.ingest(&msg).await.unwrap_err();
        assert!(matches!(err.error, IngestError::InvalidSender(_)));

        let err = fx.service.ingest(&message(&[])).await.unwrap_err();
        assert!(matches!(err.error, IngestError::RecipientsRequired));
    }

    /// Email store that fails every create after the first `ok` calls
    struct FlakyEmails {
        inner: MemoryStore,
        ok: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InboundEmailRepository for FlakyEmails {
        async fn create(&self, input: NewInboundEmail) -> inlet_common::Result<InboundEmail> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.ok {
                return Err(inlet_common::Error::Database("connection reset".to_string()));
            }
            InboundEmailRepository::create(&self.inner, input).await
        }

        async fn get(&self, id: InboundEmailId) -> inlet_common::Result<Option<InboundEmail>> {
            InboundEmailRepository::get(&self.inner, id).await
        }
    }

    #[tokio::test]
    async fn test_store_failure_reports_partial_progress() {
        let store = MemoryStore::new();
        let emails = Arc::new(FlakyEmails {
            inner: store.clone(),
            ok: 1,
            calls: AtomicUsize::new(0),
        });
        let fx = fixture_with(store, emails, true);
        add_domain(&fx.store, "y.example", true, true).await;

        let failure = fx
            .service
            .ingest(&message(&["x@nowhere.example", "b@y.example", "c@y.example", "d@y.example"]))
            .await
            .unwrap_err();
        assert!(!failure.is_permanent());
        assert_eq!(failure.outcome, IngestOutcome { accepted: 1, dropped: 1 });
        assert!(failure.to_string().starts_with("create inbound email"));

        // Only the accepted recipient's raw blob is left behind
        assert_eq!(fx.blobs.keys().len(), 1);
    }

    /// Notifier recording every email it sees, failing on demand
    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl InboundNotifier for RecordingNotifier {
        async fn notify(&self, email: &InboundEmail) -> anyhow::Result<()> {
            self.seen
                .lock()
                .unwrap()
                .push(email.recipient.clone());
            if self.fail {
                anyhow::bail!("webhook down");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_change_outcome() {
        let store = MemoryStore::new();
        add_domain(&store, "y.example", true, true).await;
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let shared = Arc::new(store.clone());
        let service = IngestService::new(
            RecipientPolicy::new(shared.clone(), shared.clone(), shared.clone()),
            shared,
            None,
        )
        .with_notifier(notifier.clone());

        let outcome = service.ingest(&message(&["b@y.example"])).await.unwrap();
        assert_eq!(outcome, IngestOutcome { accepted: 1, dropped: 0 });
        assert_eq!(*notifier.seen.lock().unwrap(), vec!["b@y.example".to_string()]);
    }

    #[test]
    fn test_blob_extension() {
        assert_eq!(blob_extension("report.pdf"), "pdf");
        assert_eq!(blob_extension("archive.tar.gz"), "gz");
        assert_eq!(blob_extension("README"), "bin");
        assert_eq!(blob_extension("trailing."), "bin");
        assert_eq!(blob_extension("weird.p/df"), "bin");
    }

    #[test]
    fn test_blob_key_shape() {
        let domain_id = Uuid::now_v7();
        let email_id = Uuid::now_v7();
        let key = blob_key("raw", domain_id, email_id, ".eml");
        let prefix = format!("inbound/raw/{}/{}/", domain_id, email_id);
        assert!(key.starts_with(&prefix));
        let file = &key[prefix.len()..];
        let (stamp, rest) = file.split_once('-').unwrap();
        assert!(stamp.parse::<i64>().is_ok());
        assert!(rest.ends_with(".eml"));
        assert!(blob_key("attachments", domain_id, email_id, "").ends_with(".bin"));
    }
}

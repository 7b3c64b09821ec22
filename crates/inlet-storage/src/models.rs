//! Database models

use chrono::{DateTime, Utc};
use inlet_common::types::{
    AttachmentId, DomainId, InboundEmailId, JobId, JobStatus, RuleAction, RuleId, RuleType,
    UserId,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Domain model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    /// Owning user; inbound mail for this domain belongs to them
    pub user_id: UserId,
    pub name: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create domain input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDomain {
    pub user_id: UserId,
    pub name: String,
    pub verified: bool,
}

/// Inbound configuration of a domain (1:1 with [`Domain`])
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InboundDomainConfig {
    pub domain_id: DomainId,
    pub mx_target: String,
    pub mx_verified: bool,
    pub last_error: String,
    pub checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Recipient rule model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InboundRecipientRule {
    pub id: RuleId,
    pub domain_id: DomainId,
    pub rule_type: String,
    pub pattern: String,
    pub action: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InboundRecipientRule {
    /// Parsed rule type; unknown values yield `None`
    pub fn kind(&self) -> Option<RuleType> {
        self.rule_type.parse().ok()
    }

    /// Parsed action; anything but an explicit drop delivers to the inbox
    pub fn action_enum(&self) -> RuleAction {
        self.action.parse().unwrap_or(RuleAction::Inbox)
    }
}

/// Create recipient rule input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRecipientRule {
    pub domain_id: DomainId,
    pub rule_type: RuleType,
    pub pattern: String,
    pub action: RuleAction,
    pub is_active: bool,
}

/// Persisted inbound email: one row per accepted (domain, recipient) pair
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InboundEmail {
    pub id: InboundEmailId,
    pub user_id: UserId,
    pub domain_id: DomainId,
    pub recipient: String,
    pub sender: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub message_id: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Where the bytes of a raw source or attachment live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredContent {
    /// Bytes kept in the relational row
    Inline(Vec<u8>),
    /// Bytes owned by the blob store under this key
    Blob(String),
}

impl StoredContent {
    pub fn blob_key(&self) -> Option<&str> {
        match self {
            StoredContent::Blob(key) => Some(key),
            StoredContent::Inline(_) => None,
        }
    }

    fn into_columns(self) -> (Option<Vec<u8>>, Option<String>) {
        match self {
            StoredContent::Inline(bytes) => (Some(bytes), None),
            StoredContent::Blob(key) => (None, Some(key)),
        }
    }
}

/// Raw RFC822 source row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InboundEmailRaw {
    pub inbound_email_id: InboundEmailId,
    pub raw_source: Option<Vec<u8>>,
    pub blob_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Attachment row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InboundEmailAttachment {
    pub id: AttachmentId,
    pub inbound_email_id: InboundEmailId,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub content: Option<Vec<u8>>,
    pub blob_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// New attachment for [`NewInboundEmail`]
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub content: StoredContent,
}

impl NewAttachment {
    pub(crate) fn into_row(
        self,
        inbound_email_id: InboundEmailId,
        now: DateTime<Utc>,
    ) -> InboundEmailAttachment {
        let (content, blob_key) = self.content.into_columns();
        InboundEmailAttachment {
            id: uuid::Uuid::now_v7(),
            inbound_email_id,
            file_name: self.file_name,
            content_type: self.content_type,
            size_bytes: self.size_bytes,
            content,
            blob_key,
            created_at: now,
        }
    }
}

/// Everything recorded for one accepted recipient, written atomically
#[derive(Debug, Clone)]
pub struct NewInboundEmail {
    /// Pre-assigned so blob keys can embed it
    pub id: InboundEmailId,
    pub user_id: UserId,
    pub domain_id: DomainId,
    pub recipient: String,
    pub sender: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub message_id: String,
    pub raw: Option<StoredContent>,
    pub attachments: Vec<NewAttachment>,
}

impl NewInboundEmail {
    /// Split into the rows the store writes
    pub(crate) fn into_rows(
        self,
        now: DateTime<Utc>,
    ) -> (
        InboundEmail,
        Option<InboundEmailRaw>,
        Vec<InboundEmailAttachment>,
    ) {
        let email = InboundEmail {
            id: self.id,
            user_id: self.user_id,
            domain_id: self.domain_id,
            recipient: self.recipient,
            sender: self.sender,
            subject: self.subject,
            text_body: self.text_body,
            html_body: self.html_body,
            message_id: self.message_id,
            is_read: false,
            created_at: now,
        };
        let raw = self.raw.map(|raw| {
            let (raw_source, blob_key) = raw.into_columns();
            InboundEmailRaw {
                inbound_email_id: self.id,
                raw_source,
                blob_key,
                created_at: now,
            }
        });
        let attachments = self
            .attachments
            .into_iter()
            .map(|attachment| attachment.into_row(self.id, now))
            .collect();
        (email, raw, attachments)
    }
}

/// Ingest job row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IngestJob {
    pub id: JobId,
    pub status: String,
    #[serde(skip)]
    pub payload: Vec<u8>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub available_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: String,
    pub accepted: i32,
    pub dropped: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub done_at: Option<DateTime<Utc>>,
}

impl IngestJob {
    /// Parsed status; unknown values yield `None`
    pub fn status_enum(&self) -> Option<JobStatus> {
        self.status.parse().ok()
    }

    /// Whether another failure exhausts the attempt budget
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: i64,
    pub processing: i64,
    pub done: i64,
    pub failed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_inbound_email_into_rows() {
        let id = uuid::Uuid::now_v7();
        let now = Utc::now();
        let input = NewInboundEmail {
            id,
            user_id: uuid::Uuid::now_v7(),
            domain_id: uuid::Uuid::now_v7(),
            recipient: "hello@y.example".to_string(),
            sender: "a@x.example".to_string(),
            subject: "Hi".to_string(),
            text_body: "body".to_string(),
            html_body: String::new(),
            message_id: "abc@x.example".to_string(),
            raw: Some(StoredContent::Blob("inbound/raw/k.eml".to_string())),
            attachments: vec![NewAttachment {
                file_name: "a.txt".to_string(),
                content_type: "text/plain".to_string(),
                size_bytes: 3,
                content: StoredContent::Inline(b"abc".to_vec()),
            }],
        };

        let (email, raw, attachments) = input.into_rows(now);
        assert_eq!(email.id, id);
        assert!(!email.is_read);

        let raw = raw.unwrap();
        assert_eq!(raw.inbound_email_id, id);
        assert_eq!(raw.raw_source, None);
        assert_eq!(raw.blob_key.as_deref(), Some("inbound/raw/k.eml"));

        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].inbound_email_id, id);
        assert_eq!(attachments[0].content.as_deref(), Some(&b"abc"[..]));
        assert_eq!(attachments[0].blob_key, None);
    }

    #[test]
    fn test_rule_action_defaults_to_inbox() {
        let now = Utc::now();
        let rule = InboundRecipientRule {
            id: uuid::Uuid::now_v7(),
            domain_id: uuid::Uuid::now_v7(),
            rule_type: "wildcard".to_string(),
            pattern: "*".to_string(),
            action: "quarantine".to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(rule.kind(), Some(RuleType::Wildcard));
        assert_eq!(rule.action_enum(), RuleAction::Inbox);
    }
}

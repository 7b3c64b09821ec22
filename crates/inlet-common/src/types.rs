//! Common types for Inlet

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for domains
pub type DomainId = Uuid;

/// Unique identifier for users (domain owners)
pub type UserId = Uuid;

/// Unique identifier for persisted inbound emails
pub type InboundEmailId = Uuid;

/// Unique identifier for inbound attachments
pub type AttachmentId = Uuid;

/// Unique identifier for recipient rules
pub type RuleId = Uuid;

/// Unique identifier for ingest jobs
pub type JobId = Uuid;

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse a bare `local@domain` address.
    ///
    /// The split happens at the last `@` so quoted local parts containing `@`
    /// survive. Whitespace, control characters and list delimiters are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (local, domain) = s.rsplit_once('@')?;
        if local.is_empty() || domain.is_empty() {
            return None;
        }
        if !valid_local(local) || !valid_domain(domain) {
            return None;
        }
        Some(Self::new(local, domain))
    }

    /// Parse a header-style mailbox: either `local@domain` or
    /// `Display Name <local@domain>`.
    pub fn parse_mailbox(s: &str) -> Option<Self> {
        let s = s.trim();
        match s.rfind('<') {
            Some(open) => {
                let rest = &s[open + 1..];
                let close = rest.find('>')?;
                if !rest[close + 1..].trim().is_empty() {
                    return None;
                }
                Self::parse(&rest[..close])
            }
            None => Self::parse(s),
        }
    }

    /// Returns the address with its domain lower-cased and any trailing dot
    /// removed. The local part is kept as given.
    pub fn normalized(&self) -> Self {
        Self {
            local: self.local.clone(),
            domain: normalize_host(&self.domain),
        }
    }

    /// Lower-cased local part, as used for recipient rule matching
    pub fn local_lowercase(&self) -> String {
        normalize_local_part(&self.local)
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_mailbox(s)
            .ok_or_else(|| crate::Error::Validation(format!("Invalid email address: {}", s)))
    }
}

/// Trim and lower-case a local part or recipient rule pattern. Rule
/// patterns and recipients both go through this, so they compare equal
/// regardless of script.
pub fn normalize_local_part(local: &str) -> String {
    local.trim().to_lowercase()
}

/// Lower-case a hostname and strip a single trailing dot.
pub fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

fn valid_local(local: &str) -> bool {
    if local.starts_with('"') && local.ends_with('"') && local.len() >= 2 {
        return !local.chars().any(|c| c.is_control());
    }
    !local.chars().any(|c| {
        c.is_whitespace() || c.is_control() || matches!(c, '<' | '>' | ',' | ';' | '@' | '"')
    })
}

fn valid_domain(domain: &str) -> bool {
    if domain.starts_with('[') && domain.ends_with(']') {
        return domain.len() > 2;
    }
    let trimmed = domain.strip_suffix('.').unwrap_or(domain);
    !trimmed.is_empty()
        && trimmed.split('.').all(|label| {
            !label.is_empty()
                && label
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        })
}

/// Recipient rule kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Exact,
    Wildcard,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Exact => "exact",
            RuleType::Wildcard => "wildcard",
        }
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RuleType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(RuleType::Exact),
            "wildcard" => Ok(RuleType::Wildcard),
            other => Err(crate::Error::Validation(format!("Unknown rule type: {}", other))),
        }
    }
}

/// What happens to a recipient matched by a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Inbox,
    Drop,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Inbox => "inbox",
            RuleAction::Drop => "drop",
        }
    }
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RuleAction {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inbox" => Ok(RuleAction::Inbox),
            "drop" => Ok(RuleAction::Drop),
            other => Err(crate::Error::Validation(format!("Unknown rule action: {}", other))),
        }
    }
}

/// Ingest job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether the job has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(crate::Error::Validation(format!("Unknown job status: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_email_address_parse() {
        let email = EmailAddress::parse("user@example.com").unwrap();
        assert_eq!(email.local, "user");
        assert_eq!(email.domain, "example.com");
        assert_eq!(email.to_string(), "user@example.com");
    }

    #[test]
    fn test_normalize_local_part() {
        assert_eq!(normalize_local_part("  Support "), "support");
        assert_eq!(normalize_local_part("ÉLODIE"), "élodie");
        assert_eq!(
            EmailAddress::new("JÜRGEN", "example.com").local_lowercase(),
            "jürgen"
        );
    }

    #[test]
    fn test_email_address_invalid() {
        assert!(EmailAddress::parse("invalid").is_none());
        assert!(EmailAddress::parse("@example.com").is_none());
        assert!(EmailAddress::parse("user@").is_none());
        assert!(EmailAddress::parse("us er@example.com").is_none());
        assert!(EmailAddress::parse("user@exa mple.com").is_none());
        assert!(EmailAddress::parse("user@example..com").is_none());
    }

    #[test]
    fn test_parse_mailbox_with_display_name() {
        let email = EmailAddress::parse_mailbox("Alice Example <Alice@Example.COM>").unwrap();
        assert_eq!(email, EmailAddress::new("Alice", "Example.COM"));

        let bare = EmailAddress::parse_mailbox("  bob@example.org ").unwrap();
        assert_eq!(bare, EmailAddress::new("bob", "example.org"));

        assert!(EmailAddress::parse_mailbox("Broken <bob@example.org").is_none());
        assert!(EmailAddress::parse_mailbox("<bob@example.org> trailing").is_none());
    }

    #[test]
    fn test_normalized_address() {
        let email = EmailAddress::parse("Support@Example.COM.").unwrap();
        let normalized = email.normalized();
        assert_eq!(normalized.local, "Support");
        assert_eq!(normalized.domain, "example.com");
        assert_eq!(normalized.local_lowercase(), "support");
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("MX.Inlet.Example."), "mx.inlet.example");
        assert_eq!(normalize_host("mx.inlet.example"), "mx.inlet.example");
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Done,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!(JobStatus::Done.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!("paused".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_rule_enums_parse_case_insensitively() {
        assert_eq!("EXACT".parse::<RuleType>().unwrap(), RuleType::Exact);
        assert_eq!(" drop ".parse::<RuleAction>().unwrap(), RuleAction::Drop);
        assert!("forward".parse::<RuleAction>().is_err());
    }
}

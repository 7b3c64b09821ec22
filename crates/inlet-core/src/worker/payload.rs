//! JSON payload of an ingest job

use crate::message::InboundMessage;
use serde::{Deserialize, Deserializer, Serialize};

/// Ingest request as queued by the HTTP and SMTP front doors.
///
/// Every field is optional; `null` reads as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestJobPayload {
    #[serde(deserialize_with = "null_as_default")]
    pub sender: String,
    #[serde(deserialize_with = "null_as_default")]
    pub recipients: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub subject: String,
    #[serde(deserialize_with = "null_as_default")]
    pub text_body: String,
    #[serde(deserialize_with = "null_as_default")]
    pub html_body: String,
    #[serde(deserialize_with = "null_as_default")]
    pub message_id: String,
    #[serde(deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub raw_rfc822: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl IngestJobPayload {
    /// Trim every field
    pub fn normalize(&mut self) {
        for field in [
            &mut self.sender,
            &mut self.subject,
            &mut self.text_body,
            &mut self.html_body,
            &mut self.message_id,
            &mut self.raw_rfc822,
        ] {
            let trimmed = field.trim();
            if trimmed.len() != field.len() {
                *field = trimmed.to_string();
            }
        }
        for recipient in &mut self.recipients {
            *recipient = recipient.trim().to_string();
        }
    }

    /// A payload is usable with a raw message, or with a sender and at least
    /// one non-blank recipient
    pub fn is_usable(&self) -> bool {
        if !self.raw_rfc822.trim().is_empty() {
            return true;
        }
        !self.sender.trim().is_empty() && self.recipients.iter().any(|r| !r.trim().is_empty())
    }

    /// Convert into a message, dropping blank recipients
    pub fn into_message(self) -> InboundMessage {
        let recipients = self
            .recipients
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        let raw = (!self.raw_rfc822.is_empty()).then(|| self.raw_rfc822.into_bytes());

        InboundMessage {
            sender: self.sender,
            sender_name: None,
            recipients,
            subject: self.subject,
            text_body: self.text_body,
            html_body: self.html_body,
            message_id: self.message_id,
            raw,
            attachments: Vec::new(),
        }
    }
}

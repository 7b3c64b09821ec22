//! In-memory inbound message, built fresh for every ingestion attempt

use crate::mime::html_to_text;
use serde::{Deserialize, Serialize};

/// Structured inbound message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Sender mailbox, either `addr@host` or `Name <addr@host>`
    pub sender: String,
    /// Decoded display name of the `From` header, when one was present
    pub sender_name: Option<String>,
    /// Recipients in delivery order
    pub recipients: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub message_id: String,
    /// Raw RFC822 source, kept alongside every accepted recipient
    #[serde(skip)]
    pub raw: Option<Vec<u8>>,
    #[serde(skip)]
    pub attachments: Vec<Attachment>,
}

impl InboundMessage {
    /// Readable body: the text part, or the HTML part converted to text
    pub fn display_text(&self) -> String {
        let text = self.text_body.trim();
        if !text.is_empty() {
            return text.to_string();
        }
        if self.html_body.trim().is_empty() {
            return String::new();
        }
        html_to_text(&self.html_body)
    }
}

/// Decoded attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_text_prefers_text_body() {
        let message = InboundMessage {
            text_body: "  plain  ".to_string(),
            html_body: "<p>rich</p>".to_string(),
            ..Default::default()
        };
        assert_eq!(message.display_text(), "plain");
    }

    #[test]
    fn test_display_text_falls_back_to_html() {
        let message = InboundMessage {
            html_body: "<p>Hello <b>there</b></p>".to_string(),
            ..Default::default()
        };
        assert_eq!(message.display_text(), "Hello there");
        assert_eq!(InboundMessage::default().display_text(), "");
    }
}

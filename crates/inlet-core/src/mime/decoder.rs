//! RFC822/MIME decoder
//!
//! Turns raw message bytes into an [`InboundMessage`]. Transfer encodings,
//! charsets and RFC 2047 encoded words are handled by `mail-parser`; this
//! module walks the resulting part tree, classifies every leaf as body text,
//! HTML or attachment, and applies the attachment byte budget.

use crate::message::{Attachment, InboundMessage};
use mail_parser::{Address, Message, MessageParser, MessagePart, MimeHeaders, PartType};
use thiserror::Error;

/// Attachment budget used when the caller passes zero
pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;

/// Deepest multipart nesting that is walked before giving up
pub const MAX_PART_DEPTH: usize = 16;

const FALLBACK_FILE_NAME: &str = "attachment.bin";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Decoder failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("raw RFC822 payload is empty")]
    Empty,

    #[error("malformed message headers")]
    MalformedHeaders,

    #[error("unreadable multipart boundary")]
    UnreadableBoundary,

    #[error("multipart nesting is too deep")]
    TooDeep,
}

/// Decode a raw RFC822 message.
///
/// Leaves larger than `max_attachment_bytes` are skipped silently; `0`
/// selects [`DEFAULT_MAX_ATTACHMENT_BYTES`]. The returned message carries no
/// raw source; callers attach it when they need it persisted.
pub fn decode_rfc822(raw: &[u8], max_attachment_bytes: usize) -> Result<InboundMessage, DecodeError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::Empty);
    }
    let budget = if max_attachment_bytes == 0 {
        DEFAULT_MAX_ATTACHMENT_BYTES
    } else {
        max_attachment_bytes
    };

    if !check_header_block(raw)? {
        // No header fields at all: the body is identity-encoded text/plain
        return Ok(InboundMessage {
            text_body: String::from_utf8_lossy(body_after_headers(raw)).trim().to_string(),
            ..Default::default()
        });
    }
    let message = MessageParser::default()
        .parse(raw)
        .ok_or(DecodeError::MalformedHeaders)?;

    let (sender, sender_name) = message
        .from()
        .and_then(Address::first)
        .map(|addr| {
            let address = addr.address().unwrap_or_default().trim().to_string();
            let name = addr
                .name()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty());
            (address, name)
        })
        .unwrap_or_default();

    let mut decoded = InboundMessage {
        sender,
        sender_name,
        recipients: collect_recipients(&message),
        subject: message.subject().unwrap_or_default().trim().to_string(),
        message_id: message.message_id().unwrap_or_default().trim().to_string(),
        ..Default::default()
    };

    let root = message.root_part();
    if is_multipart(root) {
        check_boundary(raw, root)?;
        let mut walker = PartWalker {
            message: &message,
            raw,
            budget,
            out: &mut decoded,
        };
        walker.walk(0, 0)?;
    } else {
        match body_kind(root) {
            BodyKind::Html => decoded.html_body = text_of(root),
            BodyKind::Text => decoded.text_body = text_of(root),
            BodyKind::Other => {}
        }
    }

    Ok(decoded)
}

enum BodyKind {
    Text,
    Html,
    Other,
}

struct PartWalker<'a, 'x> {
    message: &'a Message<'x>,
    raw: &'a [u8],
    budget: usize,
    out: &'a mut InboundMessage,
}

impl PartWalker<'_, '_> {
    fn walk(&mut self, part_id: usize, depth: usize) -> Result<(), DecodeError> {
        if depth > MAX_PART_DEPTH {
            return Err(DecodeError::TooDeep);
        }
        let Some(part) = self.message.parts.get(part_id) else {
            return Ok(());
        };

        if let PartType::Multipart(children) = &part.body {
            if depth > 0 {
                check_boundary(self.raw, part)?;
            }
            for &child in children {
                if child != part_id {
                    self.walk(child, depth + 1)?;
                }
            }
            return Ok(());
        }

        let content = part.contents();
        if content.len() > self.budget {
            tracing::debug!(
                size = content.len(),
                budget = self.budget,
                "skipping oversized MIME part"
            );
            return Ok(());
        }

        if is_attachment(part) {
            self.out.attachments.push(Attachment {
                file_name: sanitize_filename(part.attachment_name().unwrap_or_default()),
                content_type: content_type_of(part),
                content: content.to_vec(),
            });
            return Ok(());
        }

        match body_kind(part) {
            BodyKind::Text => append_body(&mut self.out.text_body, &text_of(part), "\n\n"),
            BodyKind::Html => append_body(&mut self.out.html_body, &text_of(part), "\n"),
            BodyKind::Other => {}
        }
        Ok(())
    }
}

fn append_body(body: &mut String, text: &str, separator: &str) {
    if text.is_empty() {
        return;
    }
    if !body.is_empty() {
        body.push_str(separator);
    }
    body.push_str(text);
}

fn is_multipart(part: &MessagePart<'_>) -> bool {
    matches!(part.body, PartType::Multipart(_))
        || part
            .content_type()
            .is_some_and(|ct| ct.ctype().eq_ignore_ascii_case("multipart"))
}

fn check_boundary(raw: &[u8], part: &MessagePart<'_>) -> Result<(), DecodeError> {
    let boundary = part
        .content_type()
        .and_then(|ct| ct.attribute("boundary"))
        .map(str::trim)
        .filter(|boundary| !boundary.is_empty())
        .ok_or(DecodeError::UnreadableBoundary)?;

    let delimiter = format!("--{}", boundary);
    if contains(raw, delimiter.as_bytes()) {
        Ok(())
    } else {
        Err(DecodeError::UnreadableBoundary)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack
            .windows(needle.len())
            .any(|window| window == needle)
}

fn is_attachment(part: &MessagePart<'_>) -> bool {
    let disposition_attachment = part
        .content_disposition()
        .is_some_and(|cd| cd.ctype().trim().eq_ignore_ascii_case("attachment"));
    let has_name = part
        .attachment_name()
        .is_some_and(|name| !name.trim().is_empty());
    disposition_attachment || has_name
}

fn body_kind(part: &MessagePart<'_>) -> BodyKind {
    let Some(ct) = part.content_type() else {
        return BodyKind::Text;
    };
    if !ct.ctype().eq_ignore_ascii_case("text") {
        return BodyKind::Other;
    }
    match ct.subtype().map(str::to_ascii_lowercase).as_deref() {
        Some("html") => BodyKind::Html,
        Some("plain") | None => BodyKind::Text,
        Some(_) => BodyKind::Other,
    }
}

fn text_of(part: &MessagePart<'_>) -> String {
    match &part.body {
        PartType::Text(text) | PartType::Html(text) => text.trim().to_string(),
        _ => String::from_utf8_lossy(part.contents()).trim().to_string(),
    }
}

fn content_type_of(part: &MessagePart<'_>) -> String {
    let Some(ct) = part.content_type() else {
        return FALLBACK_CONTENT_TYPE.to_string();
    };
    let ctype = ct.ctype().trim().to_ascii_lowercase();
    if ctype.is_empty() {
        return FALLBACK_CONTENT_TYPE.to_string();
    }
    match ct.subtype().map(str::trim).filter(|sub| !sub.is_empty()) {
        Some(subtype) => format!("{}/{}", ctype, subtype.to_ascii_lowercase()),
        None => ctype,
    }
}

fn collect_recipients(message: &Message<'_>) -> Vec<String> {
    let mut recipients: Vec<String> = Vec::new();
    for address in [message.to(), message.cc(), message.bcc()].into_iter().flatten() {
        for addr in address.iter() {
            let Some(email) = addr.address() else {
                continue;
            };
            let email = email.trim().to_lowercase();
            if email.is_empty() || recipients.contains(&email) {
                continue;
            }
            recipients.push(email);
        }
    }
    recipients
}

/// Reduce a client supplied file name to a bare basename
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    match base {
        "" | "." | ".." => FALLBACK_FILE_NAME.to_string(),
        base => base.to_string(),
    }
}

/// Reject header blocks that are not `Name: value` lines or folded
/// continuations of one. Returns whether any header field was present; a
/// message may open with the blank line and carry no headers.
fn check_header_block(raw: &[u8]) -> Result<bool, DecodeError> {
    let mut seen_field = false;
    for line in raw.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            break;
        }
        if line[0] == b' ' || line[0] == b'\t' {
            if !seen_field {
                return Err(DecodeError::MalformedHeaders);
            }
            continue;
        }
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(DecodeError::MalformedHeaders)?;
        let name = &line[..colon];
        if name.is_empty() || !name.iter().all(|b| b.is_ascii_graphic()) {
            return Err(DecodeError::MalformedHeaders);
        }
        seen_field = true;
    }
    Ok(seen_field)
}

/// Bytes after the first empty line
fn body_after_headers(raw: &[u8]) -> &[u8] {
    let mut offset = 0;
    for line in raw.split(|&b| b == b'\n') {
        offset += line.len() + 1;
        if line.strip_suffix(b"\r").unwrap_or(line).is_empty() {
            return raw.get(offset..).unwrap_or_default();
        }
    }
    &[]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn crlf(s: &str) -> Vec<u8> {
        s.replace('\n', "\r\n").into_bytes()
    }

    #[test]
    fn test_decode_plain_message() {
        let raw = crlf(
            "From: Alice <alice@x.example>\n\
             To: Bob@Y.example, carol@y.example\n\
             Cc: bob@y.example\n\
             Bcc: dave@z.example\n\
             Subject: Hello\n\
             Message-ID: <abc@x.example>\n\
             Content-Type: text/plain; charset=utf-8\n\
             \n\
             Hi there\n",
        );
        let message = decode_rfc822(&raw, 0).unwrap();

        assert_eq!(message.sender, "alice@x.example");
        assert_eq!(message.sender_name.as_deref(), Some("Alice"));
        assert_eq!(
            message.recipients,
            vec!["bob@y.example", "carol@y.example", "dave@z.example"]
        );
        assert_eq!(message.subject, "Hello");
        assert_eq!(message.message_id, "abc@x.example");
        assert_eq!(message.text_body, "Hi there");
        assert_eq!(message.html_body, "");
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn test_decode_alternative_keeps_text_and_html_apart() {
        let raw = crlf(
            "From: a@x.example\n\
             To: b@y.example\n\
             Subject: Alt\n\
             MIME-Version: 1.0\n\
             Content-Type: multipart/alternative; boundary=\"alt\"\n\
             \n\
             --alt\n\
             Content-Type: text/plain; charset=utf-8\n\
             Content-Transfer-Encoding: quoted-printable\n\
             \n\
             caf=C3=A9 menu\n\
             --alt\n\
             Content-Type: text/html; charset=utf-8\n\
             Content-Transfer-Encoding: base64\n\
             \n\
             PHA+Y2Fmw6kgbWVudTwvcD4=\n\
             --alt--\n",
        );
        let message = decode_rfc822(&raw, 0).unwrap();

        assert_eq!(message.text_body, "café menu");
        assert_eq!(message.html_body, "<p>café menu</p>");
    }

    #[test]
    fn test_decode_nested_multipart_with_attachments() {
        let raw = crlf(
            "From: a@x.example\n\
             To: b@y.example\n\
             Subject: =?UTF-8?B?UmVwb3J0IOKckw==?=\n\
             Content-Type: multipart/mixed; boundary=\"outer\"\n\
             \n\
             --outer\n\
             Content-Type: multipart/alternative; boundary=\"inner\"\n\
             \n\
             --inner\n\
             Content-Type: text/plain\n\
             \n\
             first\n\
             --inner\n\
             Content-Type: text/html\n\
             \n\
             <b>first</b>\n\
             --inner--\n\
             --outer\n\
             Content-Type: text/plain\n\
             \n\
             second\n\
             --outer\n\
             Content-Type: application/PDF; name=\"../../etc/report.pdf\"\n\
             Content-Disposition: attachment; filename=\"../../etc/report.pdf\"\n\
             Content-Transfer-Encoding: base64\n\
             \n\
             JVBERi0xLjQ=\n\
             --outer\n\
             Content-Type: application/octet-stream\n\
             Content-Disposition: attachment\n\
             \n\
             blob\n\
             --outer--\n",
        );
        let message = decode_rfc822(&raw, 0).unwrap();

        assert_eq!(message.subject, "Report ✓");
        assert_eq!(message.text_body, "first\n\nsecond");
        assert_eq!(message.html_body, "<b>first</b>");
        assert_eq!(message.attachments.len(), 2);
        assert_eq!(message.attachments[0].file_name, "report.pdf");
        assert_eq!(message.attachments[0].content_type, "application/pdf");
        assert_eq!(message.attachments[0].content, b"%PDF-1.4".to_vec());
        assert_eq!(message.attachments[1].file_name, "attachment.bin");
        assert_eq!(message.attachments[1].content_type, "application/octet-stream");
    }

    #[test]
    fn test_oversized_parts_are_skipped() {
        let raw = crlf(
            "From: a@x.example\n\
             To: b@y.example\n\
             Content-Type: multipart/mixed; boundary=\"b\"\n\
             \n\
             --b\n\
             Content-Type: text/plain\n\
             \n\
             ok\n\
             --b\n\
             Content-Type: application/zip\n\
             Content-Disposition: attachment; filename=\"big.zip\"\n\
             \n\
             0123456789abcdef\n\
             --b--\n",
        );
        let message = decode_rfc822(&raw, 8).unwrap();

        assert_eq!(message.text_body, "ok");
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn test_html_only_message() {
        let raw = crlf(
            "From: a@x.example\n\
             To: b@y.example\n\
             Content-Type: text/html\n\
             \n\
             <html><body><p>Only html</p></body></html>\n",
        );
        let message = decode_rfc822(&raw, 0).unwrap();

        assert_eq!(message.text_body, "");
        assert!(message.html_body.contains("Only html"));
        assert_eq!(message.display_text(), "Only html");
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode_rfc822(b"", 0), Err(DecodeError::Empty));
        assert_eq!(decode_rfc822(b" \r\n\t", 0), Err(DecodeError::Empty));
        assert_eq!(
            decode_rfc822(b"this is not a header\r\n\r\nbody", 0),
            Err(DecodeError::MalformedHeaders)
        );
        assert_eq!(
            decode_rfc822(b" folded first\r\nFrom: a@x.example\r\n\r\n", 0),
            Err(DecodeError::MalformedHeaders)
        );

        let missing = crlf(
            "From: a@x.example\n\
             Content-Type: multipart/mixed; boundary=\"nowhere\"\n\
             \n\
             --elsewhere\n\
             Content-Type: text/plain\n\
             \n\
             x\n",
        );
        assert_eq!(decode_rfc822(&missing, 0), Err(DecodeError::UnreadableBoundary));

        let no_boundary = crlf(
            "From: a@x.example\n\
             Content-Type: multipart/mixed\n\
             \n\
             body\n",
        );
        assert_eq!(decode_rfc822(&no_boundary, 0), Err(DecodeError::UnreadableBoundary));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("/tmp/../a.txt"), "a.txt");
        assert_eq!(sanitize_filename("C:\\Users\\x\\b.doc"), "b.doc");
        assert_eq!(sanitize_filename("  "), "attachment.bin");
        assert_eq!(sanitize_filename("dir/"), "attachment.bin");
        assert_eq!(sanitize_filename(".."), "attachment.bin");
    }

    #[test]
    fn test_empty_header_block_keeps_body() {
        let message = decode_rfc822(b"\r\nHello from a headerless feed\r\nsecond line\r\n", 0).unwrap();
        assert_eq!(message.text_body, "Hello from a headerless feed\r\nsecond line");
        assert_eq!(message.sender, "");
        assert!(message.recipients.is_empty());

        let message = decode_rfc822(b"\nbare newline body", 0).unwrap();
        assert_eq!(message.text_body, "bare newline body");
    }

    #[test]
    fn test_header_block_check() {
        assert_eq!(check_header_block(b"From: a\r\nX-Long: a\r\n  b\r\n\r\nbody"), Ok(true));
        assert_eq!(check_header_block(b"From: a"), Ok(true));
        assert_eq!(check_header_block(b"\r\nbody"), Ok(false));
        assert_eq!(
            check_header_block(b"Bad Name: a\r\n\r\n"),
            Err(DecodeError::MalformedHeaders)
        );
    }
}

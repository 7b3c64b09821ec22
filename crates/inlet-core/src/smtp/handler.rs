//! SMTP session handler

use super::delivery::{DeliveryError, Envelope, SmtpDelivery};
use super::directory::{RecipientDirectory, RouteLookup};
use crate::metrics;
use anyhow::{anyhow, Result};
use inlet_common::config::SmtpConfig;
use inlet_common::types::EmailAddress;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Longest command line accepted, CRLF included
const MAX_COMMAND_LINE: u64 = 1000;

/// Read granularity for DATA lines; longer lines arrive in several chunks
const DATA_CHUNK: u64 = 64 * 1024;

/// SMTP session state
#[derive(Debug, Clone, Copy, PartialEq)]
enum SessionState {
    Connected,
    Greeted,
    MailFrom,
    RcptTo,
}

/// Per-session limits
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub hostname: String,
    pub max_message_size: usize,
    pub command_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &SmtpConfig) -> Self {
        Self {
            hostname: config.hostname.clone(),
            max_message_size: config.max_message_size,
            command_timeout: config.connection_timeout(),
        }
    }
}

/// One command line read from the client
enum Line {
    Command(String),
    TooLong,
    Closed,
}

/// SMTP session handler; one instance serves every connection
pub struct SmtpHandler {
    settings: SessionSettings,
    directory: Arc<dyn RecipientDirectory>,
    delivery: Arc<dyn SmtpDelivery>,
}

impl SmtpHandler {
    pub fn new(
        settings: SessionSettings,
        directory: Arc<dyn RecipientDirectory>,
        delivery: Arc<dyn SmtpDelivery>,
    ) -> Self {
        Self {
            settings,
            directory,
            delivery,
        }
    }

    /// Serve a TCP connection
    pub async fn handle_stream(&self, stream: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        let (reader, writer) = stream.into_split();
        self.handle(BufReader::new(reader), writer, peer_addr).await
    }

    /// Serve one SMTP session over any byte stream
    pub async fn handle<R, W>(&self, mut reader: R, writer: W, peer_addr: SocketAddr) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut writer = BufWriter::new(writer);
        let mut state = SessionState::Connected;
        let mut sender: Option<EmailAddress> = None;
        let mut recipient: Option<EmailAddress> = None;

        self.send_response(
            &mut writer,
            220,
            &format!("{} ESMTP Inlet", self.settings.hostname),
        )
        .await?;

        loop {
            let line = match tokio::time::timeout(
                self.settings.command_timeout,
                read_command(&mut reader),
            )
            .await
            {
                Ok(line) => line?,
                Err(_) => {
                    debug!("Client {} timed out", peer_addr);
                    self.send_response(&mut writer, 421, "4.4.2 Timeout, closing connection")
                        .await?;
                    break;
                }
            };

            let line = match line {
                Line::Command(line) => line,
                Line::TooLong => {
                    self.send_response(&mut writer, 500, "5.5.2 Line too long")
                        .await?;
                    continue;
                }
                Line::Closed => {
                    debug!("Client {} disconnected", peer_addr);
                    break;
                }
            };
            debug!("SMTP from {}: {}", peer_addr, line);

            let (command, args) = parse_command(&line);

            match command.to_ascii_uppercase().as_str() {
                "HELO" => {
                    state = SessionState::Greeted;
                    sender = None;
                    recipient = None;
                    self.send_response(&mut writer, 250, &format!("Hello {}", args))
                        .await?;
                }

                "EHLO" => {
                    state = SessionState::Greeted;
                    sender = None;
                    recipient = None;
                    let responses = [
                        format!("{} Hello {}", self.settings.hostname, args),
                        format!("SIZE {}", self.settings.max_message_size),
                        "8BITMIME".to_string(),
                        "PIPELINING".to_string(),
                        "ENHANCEDSTATUSCODES".to_string(),
                    ];
                    for (i, resp) in responses.iter().enumerate() {
                        if i == responses.len() - 1 {
                            self.send_response(&mut writer, 250, resp).await?;
                        } else {
                            self.send_response_continue(&mut writer, 250, resp).await?;
                        }
                    }
                }

                "MAIL" => {
                    if state != SessionState::Greeted {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    match parse_mail_from(args) {
                        Some(from) => {
                            sender = from;
                            recipient = None;
                            state = SessionState::MailFrom;
                            self.send_response(&mut writer, 250, "2.1.0 OK").await?;
                        }
                        None => {
                            self.send_response(&mut writer, 501, "5.1.7 Bad sender address syntax")
                                .await?;
                        }
                    }
                }

                "RCPT" => {
                    if state != SessionState::MailFrom && state != SessionState::RcptTo {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }
                    if recipient.is_some() {
                        self.send_response(&mut writer, 452, "4.5.3 Too many recipients")
                            .await?;
                        continue;
                    }

                    let Some(to_addr) = parse_rcpt_to(args) else {
                        self.send_response(&mut writer, 501, "5.1.3 Bad recipient address syntax")
                            .await?;
                        continue;
                    };

                    let to_addr = to_addr.normalized();
                    match self.directory.lookup(&to_addr).await {
                        Ok(RouteLookup::Deliver(domain)) => {
                            debug!(domain_id = %domain.id, recipient = %to_addr, "recipient accepted");
                            recipient = Some(to_addr);
                            state = SessionState::RcptTo;
                            self.send_response(&mut writer, 250, "2.1.5 OK").await?;
                        }
                        Ok(RouteLookup::Disabled(reason)) => {
                            debug!(recipient = %to_addr, %reason, "recipient disabled");
                            self.send_response(&mut writer, 550, "5.1.1 recipient disabled")
                                .await?;
                        }
                        Ok(RouteLookup::Unknown) => {
                            self.send_response(&mut writer, 550, "5.1.1 no such recipient")
                                .await?;
                        }
                        Err(e) => {
                            warn!("Recipient lookup failed for {}: {}", to_addr, e);
                            self.send_response(&mut writer, 451, "4.3.0 Temporary error")
                                .await?;
                        }
                    }
                }

                "DATA" => {
                    let Some(rcpt) = recipient.take().filter(|_| state == SessionState::RcptTo)
                    else {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    };

                    self.send_response(&mut writer, 354, "Start mail input; end with <CRLF>.<CRLF>")
                        .await?;

                    let (data, truncated) = self.read_data(&mut reader).await?;
                    if truncated {
                        warn!(
                            "Message from {} truncated at {} bytes",
                            peer_addr, self.settings.max_message_size
                        );
                    }

                    let envelope = Envelope {
                        sender: sender.take(),
                        recipient: rcpt,
                    };
                    match self.delivery.deliver(&envelope, &data).await {
                        Ok(reference) => {
                            info!(
                                "Message accepted from {} for {} ({})",
                                peer_addr, envelope.recipient, reference
                            );
                            metrics::record_smtp_transaction("accepted");
                            self.send_response(
                                &mut writer,
                                250,
                                &format!("2.0.0 OK: queued as {}", reference),
                            )
                            .await?;
                        }
                        Err(DeliveryError::Permanent(e)) => {
                            warn!("Message from {} rejected: {}", peer_addr, e);
                            metrics::record_smtp_transaction("rejected");
                            self.send_response(&mut writer, 554, "5.6.0 Message rejected")
                                .await?;
                        }
                        Err(DeliveryError::Transient(e)) => {
                            warn!("Failed to hand off message from {}: {}", peer_addr, e);
                            metrics::record_smtp_transaction("deferred");
                            self.send_response(&mut writer, 451, "4.3.0 Temporary error")
                                .await?;
                        }
                    }

                    state = SessionState::Greeted;
                }

                "RSET" => {
                    sender = None;
                    recipient = None;
                    if state != SessionState::Connected {
                        state = SessionState::Greeted;
                    }
                    self.send_response(&mut writer, 250, "2.0.0 OK").await?;
                }

                "NOOP" => {
                    self.send_response(&mut writer, 250, "2.0.0 OK").await?;
                }

                "QUIT" => {
                    self.send_response(&mut writer, 221, "2.0.0 Bye").await?;
                    break;
                }

                "VRFY" => {
                    self.send_response(&mut writer, 252, "2.5.2 Cannot VRFY user")
                        .await?;
                }

                _ => {
                    self.send_response(&mut writer, 500, "5.5.2 Command not recognized")
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Read message data until <CRLF>.<CRLF>.
    ///
    /// Bytes past the size cap are discarded, not rejected; the returned flag
    /// tells whether that happened.
    async fn read_data<R: AsyncBufRead + Unpin>(&self, reader: &mut R) -> Result<(Vec<u8>, bool)> {
        let max_size = self.settings.max_message_size;
        let mut data = Vec::new();
        let mut truncated = false;
        let mut line = Vec::new();
        let mut line_start = true;

        loop {
            line.clear();
            let bytes_read = tokio::time::timeout(
                self.settings.command_timeout,
                (&mut *reader).take(DATA_CHUNK).read_until(b'\n', &mut line),
            )
            .await
            .map_err(|_| anyhow!("Timed out during DATA"))??;

            if bytes_read == 0 {
                return Err(anyhow!("Connection closed during DATA"));
            }

            if line_start && (line == b".\r\n" || line == b".\n") {
                break;
            }

            // Dot-stuffing
            let chunk = if line_start && line.starts_with(b".") {
                &line[1..]
            } else {
                &line[..]
            };
            line_start = line.ends_with(b"\n");

            let room = max_size.saturating_sub(data.len());
            if chunk.len() > room {
                data.extend_from_slice(&chunk[..room]);
                truncated = true;
            } else {
                data.extend_from_slice(chunk);
            }
        }

        Ok((data, truncated))
    }

    /// Send an SMTP response
    async fn send_response<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut BufWriter<W>,
        code: u16,
        message: &str,
    ) -> Result<()> {
        let response = format!("{} {}\r\n", code, message);
        writer.write_all(response.as_bytes()).await?;
        writer.flush().await?;
        debug!("SMTP reply: {}", response.trim());
        Ok(())
    }

    /// Send a multi-line response (intermediate line)
    async fn send_response_continue<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut BufWriter<W>,
        code: u16,
        message: &str,
    ) -> Result<()> {
        let response = format!("{}-{}\r\n", code, message);
        writer.write_all(response.as_bytes()).await?;
        Ok(())
    }
}

/// Read one command line, discarding the remainder of overlong lines
async fn read_command<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Line> {
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(MAX_COMMAND_LINE)
        .read_until(b'\n', &mut buf)
        .await?;
    if read == 0 {
        return Ok(Line::Closed);
    }

    if !buf.ends_with(b"\n") && read as u64 == MAX_COMMAND_LINE {
        loop {
            buf.clear();
            let read = (&mut *reader)
                .take(MAX_COMMAND_LINE)
                .read_until(b'\n', &mut buf)
                .await?;
            if read == 0 || buf.ends_with(b"\n") {
                break;
            }
        }
        return Ok(Line::TooLong);
    }

    Ok(Line::Command(String::from_utf8_lossy(&buf).trim().to_string()))
}

/// Parse an SMTP command line into command and arguments
fn parse_command(line: &str) -> (&str, &str) {
    match line.split_once(' ') {
        Some((command, args)) => (command, args.trim()),
        None => (line, ""),
    }
}

/// Address between angle brackets, or the first word
fn path_argument<'a>(args: &'a str, prefix: &str) -> Option<&'a str> {
    let head = args.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = args[prefix.len()..].trim();

    if let Some(stripped) = rest.strip_prefix('<') {
        let end = stripped.find('>')?;
        Some(&stripped[..end])
    } else {
        rest.split_whitespace().next()
    }
}

/// Parse `MAIL FROM:<address>`. `Some(None)` is the null sender.
fn parse_mail_from(args: &str) -> Option<Option<EmailAddress>> {
    let address = path_argument(args.trim(), "FROM:")?;
    if address.is_empty() {
        return Some(None);
    }
    EmailAddress::parse(address).map(Some)
}

/// Parse `RCPT TO:<address>`
fn parse_rcpt_to(args: &str) -> Option<EmailAddress> {
    EmailAddress::parse(path_argument(args.trim(), "TO:")?)
}

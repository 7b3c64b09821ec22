//! Notification of newly accepted inbound emails
//!
//! The notifier is chosen once at startup and injected into the ingest
//! service. It runs synchronously after a recipient's rows are durable; a
//! failure is logged by the caller and never changes the ingest outcome.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use inlet_common::config::NotifyConfig;
use inlet_common::types::{DomainId, InboundEmailId, UserId};
use inlet_storage::models::InboundEmail;
use reqwest::{Client, Url};
use serde::Serialize;
use sha2::Sha256;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the `sha256=<hex>` HMAC of the request body
pub const SIGNATURE_HEADER: &str = "X-Inlet-Signature";

/// Capability invoked for every accepted recipient
#[async_trait]
pub trait InboundNotifier: Send + Sync {
    async fn notify(&self, email: &InboundEmail) -> Result<()>;
}

/// Notifier that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl InboundNotifier for NoopNotifier {
    async fn notify(&self, _email: &InboundEmail) -> Result<()> {
        Ok(())
    }
}

/// Webhook event body
#[derive(Debug, Clone, Serialize)]
pub struct InboundEmailEvent {
    pub event: &'static str,
    pub email_id: InboundEmailId,
    pub user_id: UserId,
    pub domain_id: DomainId,
    pub recipient: String,
    pub sender: String,
    pub subject: String,
    pub message_id: String,
    pub received_at: DateTime<Utc>,
}

impl From<&InboundEmail> for InboundEmailEvent {
    fn from(email: &InboundEmail) -> Self {
        Self {
            event: "inbound_email.received",
            email_id: email.id,
            user_id: email.user_id,
            domain_id: email.domain_id,
            recipient: email.recipient.clone(),
            sender: email.sender.clone(),
            subject: email.subject.clone(),
            message_id: email.message_id.clone(),
            received_at: email.created_at,
        }
    }
}

/// Posts a signed JSON event to a fixed URL
pub struct WebhookNotifier {
    client: Client,
    url: Url,
    secret: Option<String>,
}

impl WebhookNotifier {
    /// Create a notifier for a public http(s) endpoint
    pub fn new(url: &str, secret: Option<String>, timeout: Duration) -> Result<Self> {
        validate_webhook_url(url)?;
        Self::unchecked(url, secret, timeout)
    }

    fn unchecked(url: &str, secret: Option<String>, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| anyhow!("Invalid webhook URL: {}", e))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            secret: secret.filter(|secret| !secret.is_empty()),
        })
    }

    fn sign(&self, body: &[u8]) -> Result<Option<String>> {
        let Some(secret) = &self.secret else {
            return Ok(None);
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| anyhow!("Invalid HMAC key: {}", e))?;
        mac.update(body);
        Ok(Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes()))))
    }
}

#[async_trait]
impl InboundNotifier for WebhookNotifier {
    async fn notify(&self, email: &InboundEmail) -> Result<()> {
        let body = serde_json::to_vec(&InboundEmailEvent::from(email))?;

        let mut request = self
            .client
            .post(self.url.clone())
            .header("Content-Type", "application/json");
        if let Some(signature) = self.sign(&body)? {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request.body(body).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Webhook returned status {}", response.status()));
        }
        debug!(email_id = %email.id, "inbound webhook delivered");
        Ok(())
    }
}

/// Pick the notifier for this process
pub fn from_config(config: &NotifyConfig) -> Result<Arc<dyn InboundNotifier>> {
    match config.webhook_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => {
            info!("Inbound webhook notifications enabled");
            Ok(Arc::new(WebhookNotifier::new(
                url,
                config.webhook_secret.clone(),
                config.timeout(),
            )?))
        }
        _ => Ok(Arc::new(NoopNotifier)),
    }
}

/// Reject webhook URLs that point at internal infrastructure
fn validate_webhook_url(url: &str) -> Result<()> {
    let url = Url::parse(url).map_err(|e| anyhow!("Invalid webhook URL: {}", e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!(
            "Webhook URL scheme '{}' is not allowed; use http or https",
            url.scheme()
        ));
    }

    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("Webhook URL has no host"))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase();

    let internal_name = host == "localhost"
        || host.ends_with(".localhost")
        || host.ends_with(".local")
        || host.ends_with(".internal");
    if internal_name {
        return Err(anyhow!("Webhook URL host '{}' is internal", host));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_ip(&ip) {
            return Err(anyhow!("Webhook URL address '{}' is private", ip));
        }
    }
    Ok(())
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10
                || (a == 100 && (b & 0xc0) == 64)
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7
                || (first & 0xfe00) == 0xfc00
                // fe80::/10
                || (first & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(&IpAddr::V4(v4)))
        }
    }
}

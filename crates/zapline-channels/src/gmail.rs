//! Mailbox Search Adapter: Gmail REST search + raw message fetch.
//!
//! Lists messages matching a provider-native query, downloads each one in
//! RFC 822 form, and parses sender/subject/body with `mail-parser`. Marking a
//! message read is a separate call so the caller can do it only after the
//! message has been turned into a signal.

use async_trait::async_trait;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use zapline_core::config::MailboxConfig;
use zapline_core::error::{Result, ZaplineError};
use zapline_core::types::{Credentials, MailMessage};

/// Body text kept per message.
const MAX_BODY_CHARS: usize = 4000;

/// Gmail `raw` is URL-safe base64, padding not guaranteed either way.
const RAW_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Mailbox provider operations used by the mailbox monitor.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Ids of messages matching `query`, newest first.
    async fn search(&self, credentials: &Credentials, query: &str) -> Result<Vec<String>>;

    async fn fetch(&self, credentials: &Credentials, id: &str) -> Result<MailMessage>;

    async fn mark_read(&self, credentials: &Credentials, id: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: String,
    raw: String,
    #[serde(default)]
    internal_date: Option<String>,
}

/// Gmail API client.
pub struct GmailMailbox {
    client: reqwest::Client,
    api_base: String,
    max_results: u32,
}

impl GmailMailbox {
    pub fn new(config: &MailboxConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            max_results: config.max_results,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/users/me/messages", self.api_base)
    }
}

/// Turn a non-2xx response into an adapter error carrying the body.
async fn check_status(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(ZaplineError::Adapter(format!("Gmail {what} error {status}: {body}")))
}

#[async_trait]
impl Mailbox for GmailMailbox {
    async fn search(&self, credentials: &Credentials, query: &str) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(self.messages_url())
            .bearer_auth(&credentials.access_token)
            .query(&[("q", query.to_string()), ("maxResults", self.max_results.to_string())])
            .send()
            .await
            .map_err(|e| ZaplineError::Adapter(format!("Gmail search failed: {e}")))?;

        let list: ListResponse = check_status(resp, "search").await?.json().await?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    async fn fetch(&self, credentials: &Credentials, id: &str) -> Result<MailMessage> {
        let resp = self
            .client
            .get(format!("{}/{id}", self.messages_url()))
            .bearer_auth(&credentials.access_token)
            .query(&[("format", "raw")])
            .send()
            .await
            .map_err(|e| ZaplineError::Adapter(format!("Gmail fetch failed: {e}")))?;

        let message: RawMessage = check_status(resp, "fetch").await?.json().await?;
        let bytes = decode_raw(&message.raw)?;
        let fallback_time = message
            .internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis);

        parse_email_bytes(&message.id, &bytes, fallback_time).ok_or_else(|| {
            ZaplineError::Adapter(format!("message {} is not a parseable email", message.id))
        })
    }

    async fn mark_read(&self, credentials: &Credentials, id: &str) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/{id}/modify", self.messages_url()))
            .bearer_auth(&credentials.access_token)
            .json(&serde_json::json!({ "removeLabelIds": ["UNREAD"] }))
            .send()
            .await
            .map_err(|e| ZaplineError::Adapter(format!("Gmail modify failed: {e}")))?;
        check_status(resp, "modify").await?;
        tracing::debug!("📭 Marked message {id} as read");
        Ok(())
    }
}

/// Decode Gmail's URL-safe base64 `raw` field.
pub fn decode_raw(raw: &str) -> Result<Vec<u8>> {
    RAW_ENGINE
        .decode(raw.trim())
        .map_err(|e| ZaplineError::Adapter(format!("invalid raw message encoding: {e}")))
}

/// Parse raw email bytes into a [`MailMessage`].
pub fn parse_email_bytes(
    id: &str,
    raw: &[u8],
    fallback_time: Option<DateTime<Utc>>,
) -> Option<MailMessage> {
    use mail_parser::MessageParser;
    let parsed = MessageParser::default().parse(raw)?;

    let sender = parsed.from().and_then(|a| a.first());
    let address = sender
        .and_then(|a| a.address())
        .unwrap_or_default()
        .to_string();
    let from = match sender.and_then(|a| a.name()) {
        Some(name) if !address.is_empty() => format!("{name} <{address}>"),
        Some(name) => name.to_string(),
        None if address.is_empty() => "Unknown".to_string(),
        None => address,
    };

    let subject = parsed.subject().unwrap_or("No Subject").to_string();

    // HTML-only parts come back already converted to text.
    let body = parsed
        .body_text(0)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let timestamp = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .or(fallback_time)
        .unwrap_or_else(Utc::now);

    Some(MailMessage {
        id: id.to_string(),
        from,
        subject,
        body: body.chars().take(MAX_BODY_CHARS).collect(),
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "From: Alice Example <alice@example.com>\r\n\
To: bob@example.com\r\n\
Subject: Invoice #42\r\n\
Date: Sat, 21 Feb 2026 10:00:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Please find the invoice attached.\r\n";

    #[test]
    fn test_parse_email() {
        let msg = parse_email_bytes("m-1", SAMPLE.as_bytes(), None).unwrap();
        assert_eq!(msg.id, "m-1");
        assert_eq!(msg.from, "Alice Example <alice@example.com>");
        assert_eq!(msg.subject, "Invoice #42");
        assert!(msg.body.contains("invoice attached"));
        assert_eq!(msg.timestamp.to_rfc3339(), "2026-02-21T10:00:00+00:00");
    }

    #[test]
    fn test_parse_html_only_email_with_defaults() {
        let raw = "To: bob@example.com\r\nContent-Type: text/html\r\n\r\n<p>Hello <b>there</b></p>\r\n";
        let fallback = DateTime::from_timestamp(1_700_000_000, 0);
        let msg = parse_email_bytes("m-2", raw.as_bytes(), fallback).unwrap();
        assert_eq!(msg.from, "Unknown");
        assert_eq!(msg.subject, "No Subject");
        assert_eq!(msg.body, "Hello there");
        assert_eq!(Some(msg.timestamp), fallback);
    }

    #[test]
    fn test_decode_raw_with_and_without_padding() {
        let encoded_padded = base64::engine::general_purpose::URL_SAFE.encode(SAMPLE);
        let encoded_bare = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(SAMPLE);
        assert_eq!(decode_raw(&encoded_padded).unwrap(), SAMPLE.as_bytes());
        assert_eq!(decode_raw(&encoded_bare).unwrap(), SAMPLE.as_bytes());
        assert!(decode_raw("not base64 !!").is_err());
    }

    #[test]
    fn test_list_response_without_messages() {
        let list: ListResponse = serde_json::from_str(r#"{"resultSizeEstimate": 0}"#).unwrap();
        assert!(list.messages.is_empty());
    }
}

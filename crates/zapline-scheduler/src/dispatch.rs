//! Action dispatch: one entry point per action type tag.
//!
//! Recognized tags are EMAIL, WEBHOOK and SLACK (case-insensitive). Anything
//! else is an `Unknown` outcome: a failed action, never an error.
//!
//! Two executors share the dispatch: [`SimulatedExecutor`] describes what would
//! be sent, [`LiveExecutor`] actually sends it.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::time::Duration;
use zapline_core::config::SmtpConfig;
use zapline_core::error::Result;
use zapline_core::traits::ActionExecutor;
use zapline_core::types::ActionOutcome;

/// Characters of the email body kept in a simulated preview.
const BODY_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Email,
    Webhook,
    Slack,
    Unknown(String),
}

impl ActionKind {
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_uppercase().as_str() {
            "EMAIL" => ActionKind::Email,
            "WEBHOOK" => ActionKind::Webhook,
            "SLACK" => ActionKind::Slack,
            _ => ActionKind::Unknown(tag.to_string()),
        }
    }
}

fn text<'a>(metadata: &'a Value, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(Value::as_str)
}

fn or_unset(value: Option<&str>) -> &str {
    value.unwrap_or("(unset)")
}

/// First 100 characters of the body, with `...` when cut.
pub fn body_preview(body: &str) -> String {
    let mut preview: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
    if body.chars().count() > BODY_PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}

/// A side effect that could not be completed.
fn failed(message: String, error: impl std::fmt::Display) -> ActionOutcome {
    tracing::warn!("❌ {message}");
    ActionOutcome::failure(message, json!({ "error": error.to_string() }))
}

/// The designed outcome for an unrecognized action tag.
pub fn unimplemented(tag: &str) -> ActionOutcome {
    tracing::warn!("⚠️ Unhandled action type: {tag}");
    ActionOutcome::failure(
        format!("Action type '{tag}' is not implemented yet"),
        json!({ "type": tag }),
    )
}

/// Describe an action without performing it.
pub fn simulate(kind: &ActionKind, metadata: &Value) -> ActionOutcome {
    match kind {
        ActionKind::Email => {
            let to = text(metadata, "to");
            tracing::info!("📧 Would send email to: {}", or_unset(to));
            ActionOutcome::success(
                format!("Email would be sent to {}", or_unset(to)),
                json!({
                    "to": to,
                    "subject": text(metadata, "subject"),
                    "bodyPreview": body_preview(text(metadata, "body").unwrap_or_default()),
                }),
            )
        }
        ActionKind::Webhook => {
            let url = text(metadata, "url");
            tracing::info!("🌐 Would call webhook: {}", or_unset(url));
            ActionOutcome::success(
                format!("Webhook would be called: {}", or_unset(url)),
                json!({
                    "url": url,
                    "method": text(metadata, "method").unwrap_or("POST"),
                    "headers": metadata.get("headers").cloned().unwrap_or_else(|| json!({})),
                    "payload": metadata.get("payload").cloned().unwrap_or_else(|| json!({})),
                }),
            )
        }
        ActionKind::Slack => {
            let channel = text(metadata, "channel");
            tracing::info!("💬 Would send Slack message to #{}", or_unset(channel));
            ActionOutcome::success(
                format!("Slack message would be sent to #{}", or_unset(channel)),
                json!({
                    "channel": channel,
                    "message": text(metadata, "message"),
                }),
            )
        }
        ActionKind::Unknown(tag) => unimplemented(tag),
    }
}

/// Describes every recognized action as a successful dry run.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedExecutor;

#[async_trait]
impl ActionExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        action_type: &str,
        metadata: &Value,
        _trigger_payload: &Value,
    ) -> Result<ActionOutcome> {
        Ok(simulate(&ActionKind::parse(action_type), metadata))
    }
}

/// Performs webhook, Slack and (with SMTP configured) email actions.
pub struct LiveExecutor {
    client: reqwest::Client,
    smtp: Option<SmtpConfig>,
}

impl LiveExecutor {
    pub fn new(timeout: Duration, smtp: Option<SmtpConfig>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, smtp })
    }

    /// HTTP call described by the action. The trigger payload is sent when
    /// the action carries no `payload` of its own.
    async fn call_webhook(&self, metadata: &Value, trigger_payload: &Value) -> ActionOutcome {
        let Some(url) = text(metadata, "url") else {
            return ActionOutcome::failure(
                "Webhook action has no url",
                json!({ "error": "missing url" }),
            );
        };
        let method = text(metadata, "method").unwrap_or("POST").to_ascii_uppercase();

        let mut req = match method.as_str() {
            "GET" => self.client.get(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            _ => self.client.post(url),
        };
        if let Some(headers) = metadata.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(v) = value.as_str() {
                    req = req.header(key.as_str(), v);
                }
            }
        }
        if method != "GET" {
            req = req.json(metadata.get("payload").unwrap_or(trigger_payload));
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => return failed(format!("Webhook call failed: {url}"), e),
        };
        let status = resp.status();
        let details = json!({ "url": url, "method": method, "status": status.as_u16() });
        if status.is_success() {
            tracing::info!("✅ Webhook {method} {url} → {status}");
            ActionOutcome::success(format!("Webhook called: {url}"), details)
        } else {
            ActionOutcome::failure(format!("Webhook {url} returned {status}"), details)
        }
    }

    /// Post `{channel, text}` to the incoming-webhook URL in the metadata.
    async fn post_slack(&self, metadata: &Value) -> ActionOutcome {
        let Some(webhook_url) = text(metadata, "webhookUrl") else {
            return ActionOutcome::failure(
                "Slack action has no webhookUrl",
                json!({ "error": "missing webhookUrl" }),
            );
        };
        let channel = text(metadata, "channel");
        let mut body = Map::new();
        if let Some(c) = channel {
            body.insert("channel".into(), json!(c));
        }
        body.insert("text".into(), json!(text(metadata, "message").unwrap_or_default()));

        let resp = match self.client.post(webhook_url).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) => return failed("Slack send failed".into(), e),
        };
        let status = resp.status();
        let details = json!({ "channel": channel, "status": status.as_u16() });
        if status.is_success() {
            tracing::info!("💬 Slack message sent to #{}", or_unset(channel));
            ActionOutcome::success(format!("Slack message sent to #{}", or_unset(channel)), details)
        } else {
            ActionOutcome::failure(format!("Slack returned {status}"), details)
        }
    }

    async fn send_email(&self, metadata: &Value) -> ActionOutcome {
        use lettre::{
            AsyncSmtpTransport, AsyncTransport, Message, message::Mailbox,
            message::header::ContentType, transport::smtp::authentication::Credentials,
        };

        let Some(smtp) = &self.smtp else {
            return ActionOutcome::failure(
                "SMTP is not configured",
                json!({ "error": "missing [executor.smtp]" }),
            );
        };
        let Some(to) = text(metadata, "to") else {
            return ActionOutcome::failure(
                "Email action has no recipient",
                json!({ "error": "missing to" }),
            );
        };
        let subject = text(metadata, "subject").unwrap_or_default();
        let body = text(metadata, "body").unwrap_or_default();

        let from: Mailbox = match smtp.from.parse() {
            Ok(from) => from,
            Err(e) => return failed(format!("Invalid SMTP from '{}'", smtp.from), e),
        };
        let to_mailbox: Mailbox = match to.parse() {
            Ok(to) => to,
            Err(e) => return failed(format!("Invalid recipient '{to}'"), e),
        };

        let email = match Message::builder()
            .from(from)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
        {
            Ok(email) => email,
            Err(e) => return failed("Could not build email".into(), e),
        };

        let mailer = match AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&smtp.host) {
            Ok(builder) => builder
                .port(smtp.port)
                .credentials(Credentials::new(smtp.username.clone(), smtp.password.clone()))
                .build(),
            Err(e) => return failed(format!("SMTP relay {}", smtp.host), e),
        };

        if let Err(e) = mailer.send(email).await {
            return failed(format!("SMTP send to {to} failed"), e);
        }

        tracing::info!("📤 Email sent to: {to}");
        ActionOutcome::success(
            format!("Email sent to {to}"),
            json!({
                "to": to,
                "subject": subject,
                "bodyPreview": body_preview(body),
            }),
        )
    }
}

#[async_trait]
impl ActionExecutor for LiveExecutor {
    async fn execute(
        &self,
        action_type: &str,
        metadata: &Value,
        trigger_payload: &Value,
    ) -> Result<ActionOutcome> {
        Ok(match ActionKind::parse(action_type) {
            ActionKind::Email => self.send_email(metadata).await,
            ActionKind::Webhook => self.call_webhook(metadata, trigger_payload).await,
            ActionKind::Slack => self.post_slack(metadata).await,
            ActionKind::Unknown(tag) => unimplemented(&tag),
        })
    }
}

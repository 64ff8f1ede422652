//! Webhook Receiver: turns an inbound request into a trigger payload.
//!
//! Webhooks are not polled and skip edge detection; the gateway hands the
//! payload straight to the execution engine.

use serde_json::{Map, Value, json};

/// An inbound call to `/webhook/{webhookId}`.
#[derive(Debug, Clone)]
pub struct InboundWebhook {
    pub webhook_id: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl InboundWebhook {
    pub fn new(webhook_id: impl Into<String>, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            webhook_id: webhook_id.into(),
            headers,
            body,
        }
    }

    /// Body as JSON when it parses, the raw text otherwise, `null` when empty.
    pub fn body_value(&self) -> Value {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Value::Null;
        }
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&self.body).into_owned()))
    }

    /// `{webhook: {id, headers, payload}}`. Repeated header names keep the last value.
    pub fn trigger_payload(&self) -> Value {
        let headers: Map<String, Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), Value::String(v.clone())))
            .collect();
        json!({
            "webhook": {
                "id": self.webhook_id,
                "headers": headers,
                "payload": self.body_value(),
            }
        })
    }
}

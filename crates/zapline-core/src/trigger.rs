//! Typed views over trigger metadata.
//!
//! Trigger metadata is stored as opaque JSON. Before a Zap is scanned its
//! metadata must pass the structural check for its type, which yields one of
//! the specs below.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ZaplineError};
use crate::types::{Trigger, TriggerKind};

/// Which part of a message the mailbox search matches on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MailCriteria {
    Subject,
    From,
    Body,
}

/// `{criteria, value, label}` metadata of a mailbox trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct MailboxQuery {
    pub criteria: MailCriteria,
    pub value: String,
    pub label: String,
}

impl MailboxQuery {
    /// Gmail search syntax: label filter, unread filter, criteria term.
    pub fn to_search_query(&self) -> String {
        let mut query = format!("label:{} is:unread", self.label);
        match self.criteria {
            MailCriteria::Subject => query.push_str(&format!(" subject:{}", self.value)),
            MailCriteria::From => query.push_str(&format!(" from:{}", self.value)),
            MailCriteria::Body => {
                if !self.value.is_empty() {
                    query.push(' ');
                    query.push_str(&self.value);
                }
            }
        }
        query
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PriceCondition {
    Above,
    Below,
}

impl PriceCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceCondition::Above => "above",
            PriceCondition::Below => "below",
        }
    }

    /// Strict comparison: a price equal to the target satisfies neither side.
    pub fn is_met(&self, price: f64, target: f64) -> bool {
        match self {
            PriceCondition::Above => price > target,
            PriceCondition::Below => price < target,
        }
    }
}

/// `{symbol, targetPrice, condition}` metadata of a price trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceWatch {
    pub symbol: String,
    pub target_price: f64,
    pub condition: PriceCondition,
}

/// Validated trigger metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSpec {
    Mailbox(MailboxQuery),
    Price(PriceWatch),
    Webhook { webhook_id: String },
}

impl TriggerSpec {
    /// Structural check of a trigger's metadata against its type.
    pub fn parse(trigger: &Trigger) -> Result<Self> {
        let kind = TriggerKind::parse(&trigger.trigger_type).ok_or_else(|| {
            ZaplineError::InvalidTrigger(format!("unknown trigger type '{}'", trigger.trigger_type))
        })?;
        let meta = metadata_object(&trigger.metadata)?;

        match kind {
            TriggerKind::Mailbox => {
                let criteria = match meta.get("criteria").and_then(Value::as_str) {
                    None => MailCriteria::Subject,
                    Some(c) => match c.to_ascii_lowercase().as_str() {
                        "subject" => MailCriteria::Subject,
                        "from" => MailCriteria::From,
                        "body" => MailCriteria::Body,
                        other => {
                            return Err(ZaplineError::InvalidTrigger(format!(
                                "unknown mailbox criteria '{other}'"
                            )));
                        }
                    },
                };
                let value = required_str(meta, "value")?;
                let label = meta
                    .get("label")
                    .and_then(Value::as_str)
                    .filter(|l| !l.is_empty())
                    .unwrap_or("INBOX")
                    .to_string();
                Ok(TriggerSpec::Mailbox(MailboxQuery {
                    criteria,
                    value,
                    label,
                }))
            }
            TriggerKind::Price => {
                let symbol = required_str(meta, "symbol")?;
                if symbol.is_empty() {
                    return Err(ZaplineError::InvalidTrigger("empty symbol".into()));
                }
                let target_price = match meta.get("targetPrice") {
                    Some(Value::Number(n)) => n.as_f64(),
                    Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
                    _ => None,
                }
                .filter(|p| p.is_finite())
                .ok_or_else(|| {
                    ZaplineError::InvalidTrigger("missing or non-numeric targetPrice".into())
                })?;
                let condition = match meta.get("condition").and_then(Value::as_str) {
                    None => PriceCondition::Above,
                    Some(c) => match c.to_ascii_lowercase().as_str() {
                        "above" => PriceCondition::Above,
                        "below" => PriceCondition::Below,
                        other => {
                            return Err(ZaplineError::InvalidTrigger(format!(
                                "unknown price condition '{other}'"
                            )));
                        }
                    },
                };
                Ok(TriggerSpec::Price(PriceWatch {
                    symbol,
                    target_price,
                    condition,
                }))
            }
            TriggerKind::Webhook => {
                let webhook_id = required_str(meta, "webhookId")?;
                if webhook_id.is_empty() {
                    return Err(ZaplineError::InvalidTrigger("empty webhookId".into()));
                }
                Ok(TriggerSpec::Webhook { webhook_id })
            }
        }
    }

    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerSpec::Mailbox(_) => TriggerKind::Mailbox,
            TriggerSpec::Price(_) => TriggerKind::Price,
            TriggerSpec::Webhook { .. } => TriggerKind::Webhook,
        }
    }
}

fn metadata_object(metadata: &Value) -> Result<&serde_json::Map<String, Value>> {
    metadata
        .as_object()
        .ok_or_else(|| ZaplineError::InvalidTrigger("metadata is not an object".into()))
}

fn required_str(meta: &serde_json::Map<String, Value>, key: &str) -> Result<String> {
    meta.get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| ZaplineError::InvalidTrigger(format!("missing '{key}'")))
}

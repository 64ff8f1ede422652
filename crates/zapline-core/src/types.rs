//! Zap data model: definitions, runs and the events that connect them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Zap lifecycle. Zaps are never hard-deleted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ZapStatus {
    Active,
    Deleted,
}

impl ZapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZapStatus::Active => "active",
            ZapStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "deleted" => ZapStatus::Deleted,
            _ => ZapStatus::Active,
        }
    }
}

/// The condition that starts a Zap. Metadata shape depends on `trigger_type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub id: String,
    #[serde(rename = "type")]
    pub trigger_type: String,
    #[serde(default)]
    pub metadata: Value,
}

/// One step of a Zap. `sorting_order` is unique within the Zap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub metadata: Value,
    pub sorting_order: i64,
}

/// A user automation: one trigger plus ordered actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Zap {
    pub id: String,
    pub name: String,
    pub status: ZapStatus,
    pub owner_id: String,
    pub trigger: Trigger,
    /// Always sorted by `sorting_order`.
    pub actions: Vec<Action>,
    pub created_at: DateTime<Utc>,
}

impl Zap {
    pub fn is_active(&self) -> bool {
        self.status == ZapStatus::Active
    }
}

/// Input for creating or replacing a Zap definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewZap {
    pub name: String,
    pub owner_id: String,
    pub trigger: NewTrigger,
    #[serde(default)]
    pub actions: Vec<NewAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrigger {
    #[serde(rename = "type")]
    pub trigger_type: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub metadata: Value,
    /// Defaults to the action's position in the list.
    #[serde(default)]
    pub sorting_order: Option<i64>,
}

/// Partial edit of a Zap. Present `actions` replace the whole list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZapUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub trigger: Option<NewTrigger>,
    #[serde(default)]
    pub actions: Option<Vec<NewAction>>,
}

/// ZapRun status. `Failed` is only reachable when a run cannot proceed at all.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    PartiallyCompleted,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::PartiallyCompleted => "partially_completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            "partially_completed" => RunStatus::PartiallyCompleted,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// One execution attempt of a Zap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZapRun {
    pub id: String,
    pub zap_id: String,
    pub status: RunStatus,
    /// Trigger payload at creation; the action results are added at the end.
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionRunStatus {
    Running,
    Success,
    Failed,
}

impl ActionRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionRunStatus::Running => "running",
            ActionRunStatus::Success => "success",
            ActionRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "success" => ActionRunStatus::Success,
            "failed" => ActionRunStatus::Failed,
            _ => ActionRunStatus::Running,
        }
    }
}

/// The record of one action's outcome within a ZapRun.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionRun {
    pub id: String,
    pub action_id: String,
    pub zap_run_id: String,
    pub status: ActionRunStatus,
    pub message: Option<String>,
    pub details: Value,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// What an action executor reports back. Failures are values, not errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    pub details: Value,
}

impl ActionOutcome {
    pub fn success(message: impl Into<String>, details: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            details,
        }
    }

    pub fn failure(message: impl Into<String>, details: Value) -> Self {
        Self {
            success: false,
            message: message.into(),
            details,
        }
    }
}

/// Per-action entry of a run summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub action_id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub success: bool,
    pub message: String,
    pub details: Value,
}

/// Summary returned by the execution engine and the HTTP boundaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZapRunResult {
    pub zap_id: String,
    pub zap_name: String,
    pub run_id: String,
    pub status: RunStatus,
    pub action_results: Vec<ActionResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ZapRunResult {
    pub fn all_succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Trigger types with a signal source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Mailbox search (stored as `gmail`).
    #[serde(rename = "gmail")]
    Mailbox,
    Price,
    Webhook,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Mailbox => "gmail",
            TriggerKind::Price => "price",
            TriggerKind::Webhook => "webhook",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gmail" | "email" | "mailbox" => Some(TriggerKind::Mailbox),
            "price" => Some(TriggerKind::Price),
            "webhook" => Some(TriggerKind::Webhook),
            _ => None,
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message returned by a mailbox search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MailMessage {
    pub id: String,
    pub from: String,
    pub subject: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// A single reading from a price feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSample {
    pub symbol: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Adapter output before edge detection.
#[derive(Debug, Clone, PartialEq)]
pub enum RawSignal {
    Message(MailMessage),
    Sample(PriceSample),
}

impl RawSignal {
    /// Stable external identifier of the signal.
    pub fn source_id(&self) -> &str {
        match self {
            RawSignal::Message(m) => &m.id,
            RawSignal::Sample(s) => &s.symbol,
        }
    }
}

/// A newly fired trigger, ready to be executed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    pub zap_id: String,
    pub kind: TriggerKind,
    pub payload: Value,
    pub observed_at: DateTime<Utc>,
}

/// OAuth tokens for a Zap owner's mailbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        for status in [
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::PartiallyCompleted,
            RunStatus::Failed,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), status);
        }
        assert_eq!(
            serde_json::to_value(RunStatus::PartiallyCompleted).unwrap(),
            "partially_completed"
        );
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_trigger_kind_parse() {
        assert_eq!(TriggerKind::parse("GMAIL"), Some(TriggerKind::Mailbox));
        assert_eq!(TriggerKind::parse("WEBHOOK"), Some(TriggerKind::Webhook));
        assert_eq!(TriggerKind::parse("price"), Some(TriggerKind::Price));
        assert_eq!(TriggerKind::parse("sms"), None);
        assert_eq!(serde_json::to_value(TriggerKind::Mailbox).unwrap(), "gmail");
    }

    #[test]
    fn test_new_zap_wire_format() {
        let body = serde_json::json!({
            "name": "ETH alert",
            "ownerId": "user-1",
            "trigger": {"type": "price", "metadata": {"symbol": "ETH", "targetPrice": 2000}},
            "actions": [{"type": "email", "metadata": {"to": "a@b.c"}}]
        });
        let zap: NewZap = serde_json::from_value(body).unwrap();
        assert_eq!(zap.trigger.trigger_type, "price");
        assert_eq!(zap.actions.len(), 1);
        assert!(zap.actions[0].sorting_order.is_none());
    }
}

//! Edge detector: turns raw adapter signals into edge-triggered events.
//!
//! State lives for the process lifetime and is shared by handle between the
//! scheduler and the monitors:
//! - a seen set of external ids per adapter (mail message ids), never evicted
//! - the last observed value per `(zap, symbol)` for price triggers

use chrono::Utc;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use zapline_core::config::FirstObservation;
use zapline_core::trigger::{PriceWatch, TriggerSpec};
use zapline_core::types::{MailMessage, PriceSample, RawSignal, TriggerEvent, TriggerKind};

#[derive(Debug, Default)]
pub struct EdgeDetector {
    first_observation: FirstObservation,
    seen: Mutex<HashMap<TriggerKind, HashSet<String>>>,
    last_values: Mutex<HashMap<(String, String), f64>>,
}

impl EdgeDetector {
    pub fn new(first_observation: FirstObservation) -> Self {
        Self {
            first_observation,
            ..Self::default()
        }
    }

    pub fn first_observation(&self) -> FirstObservation {
        self.first_observation
    }

    /// Whether `id` was already emitted by the `kind` adapter.
    pub fn has_seen(&self, kind: TriggerKind, id: &str) -> bool {
        self.seen
            .lock()
            .map(|seen| seen.get(&kind).is_some_and(|ids| ids.contains(id)))
            .unwrap_or(false)
    }

    /// Last cached price for a Zap's symbol.
    pub fn last_value(&self, zap_id: &str, symbol: &str) -> Option<f64> {
        self.last_values
            .lock()
            .ok()?
            .get(&(zap_id.to_string(), symbol.to_string()))
            .copied()
    }

    /// Classify a signal for a Zap. `None` means suppressed.
    pub fn classify(&self, zap_id: &str, spec: &TriggerSpec, signal: RawSignal) -> Option<TriggerEvent> {
        match (spec, signal) {
            (TriggerSpec::Mailbox(_), RawSignal::Message(message)) => {
                self.classify_message(zap_id, message)
            }
            (TriggerSpec::Price(watch), RawSignal::Sample(sample)) => {
                self.classify_price(zap_id, watch, &sample)
            }
            (spec, signal) => {
                tracing::warn!(
                    "🔀 Signal '{}' does not match {} trigger of zap {zap_id}",
                    signal.source_id(),
                    spec.kind()
                );
                None
            }
        }
    }

    /// Emit once per message id. Check and insert happen under one lock.
    pub fn classify_message(&self, zap_id: &str, message: MailMessage) -> Option<TriggerEvent> {
        let fresh = match self.seen.lock() {
            Ok(mut seen) => seen
                .entry(TriggerKind::Mailbox)
                .or_default()
                .insert(message.id.clone()),
            Err(e) => {
                tracing::error!("Seen-set lock poisoned: {e}");
                false
            }
        };
        if !fresh {
            tracing::debug!("📭 Message {} already seen, suppressed", message.id);
            return None;
        }

        Some(TriggerEvent {
            zap_id: zap_id.to_string(),
            kind: TriggerKind::Mailbox,
            payload: mail_payload(&message),
            observed_at: Utc::now(),
        })
    }

    /// Emit when the condition becomes true: no prior value (under the `Fire`
    /// policy) or a prior value that did not satisfy it. The cache is always updated.
    pub fn classify_price(
        &self,
        zap_id: &str,
        watch: &PriceWatch,
        sample: &PriceSample,
    ) -> Option<TriggerEvent> {
        let key = (zap_id.to_string(), watch.symbol.clone());
        let prior = match self.last_values.lock() {
            Ok(mut values) => values.insert(key, sample.price),
            Err(e) => {
                tracing::error!("Price cache lock poisoned: {e}");
                return None;
            }
        };

        let condition_met = watch.condition.is_met(sample.price, watch.target_price);
        let crossed = match prior {
            None => self.first_observation == FirstObservation::Fire,
            Some(prev) => !watch.condition.is_met(prev, watch.target_price),
        };

        if !(condition_met && crossed) {
            tracing::debug!(
                "💤 {} at {} ({} {}), prior {:?}: no edge",
                watch.symbol,
                sample.price,
                watch.condition.as_str(),
                watch.target_price,
                prior
            );
            return None;
        }

        tracing::info!(
            "🚨 Price alert: {} is {} {} (current {})",
            watch.symbol,
            watch.condition.as_str(),
            watch.target_price,
            sample.price
        );
        Some(TriggerEvent {
            zap_id: zap_id.to_string(),
            kind: TriggerKind::Price,
            payload: price_payload(watch, sample),
            observed_at: sample.timestamp,
        })
    }
}

/// `{email: {id, from, subject, body, timestamp}}`
pub fn mail_payload(message: &MailMessage) -> Value {
    json!({
        "email": {
            "id": message.id,
            "from": message.from,
            "subject": message.subject,
            "body": message.body,
            "timestamp": message.timestamp.to_rfc3339(),
        }
    })
}

/// `{price, symbol, targetPrice, condition, timestamp}`
pub fn price_payload(watch: &PriceWatch, sample: &PriceSample) -> Value {
    json!({
        "price": sample.price,
        "symbol": watch.symbol,
        "targetPrice": watch.target_price,
        "condition": watch.condition.as_str(),
        "timestamp": sample.timestamp.to_rfc3339(),
    })
}

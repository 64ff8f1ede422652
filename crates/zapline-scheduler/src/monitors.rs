//! Trigger monitors: bind a signal adapter to the Zaps of one trigger type.

use async_trait::async_trait;
use std::sync::Arc;
use zapline_channels::gmail::Mailbox;
use zapline_channels::price::PriceFeed;
use zapline_core::error::{Result, ZaplineError};
use zapline_core::traits::ZapRegistry;
use zapline_core::trigger::TriggerSpec;
use zapline_core::types::{RawSignal, TriggerKind, Zap};

use crate::detector::EdgeDetector;

/// One polled adapter type.
#[async_trait]
pub trait TriggerMonitor: Send + Sync {
    fn kind(&self) -> TriggerKind;

    /// Probe the external source for one Zap. Errors skip only that Zap.
    async fn scan(&self, zap: &Zap, spec: &TriggerSpec) -> Result<Vec<RawSignal>>;
}

/// Mailbox search on behalf of each Zap owner.
pub struct MailboxMonitor {
    mailbox: Arc<dyn Mailbox>,
    registry: Arc<dyn ZapRegistry>,
    detector: Arc<EdgeDetector>,
    mark_as_read: bool,
}

impl MailboxMonitor {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        registry: Arc<dyn ZapRegistry>,
        detector: Arc<EdgeDetector>,
        mark_as_read: bool,
    ) -> Self {
        Self {
            mailbox,
            registry,
            detector,
            mark_as_read,
        }
    }
}

#[async_trait]
impl TriggerMonitor for MailboxMonitor {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Mailbox
    }

    async fn scan(&self, zap: &Zap, spec: &TriggerSpec) -> Result<Vec<RawSignal>> {
        let TriggerSpec::Mailbox(query) = spec else {
            return Err(ZaplineError::InvalidTrigger(format!(
                "zap {} is not a mailbox trigger",
                zap.id
            )));
        };
        let credentials = self.registry.credentials_for(&zap.owner_id)?.ok_or_else(|| {
            ZaplineError::Adapter(format!("owner {} has no mailbox credentials", zap.owner_id))
        })?;

        let search = query.to_search_query();
        let ids = self.mailbox.search(&credentials, &search).await?;
        tracing::debug!("📬 '{search}' matched {} message(s) for zap {}", ids.len(), zap.id);

        let mut signals = Vec::new();
        for id in ids {
            if self.detector.has_seen(TriggerKind::Mailbox, &id) {
                continue;
            }
            let message = match self.mailbox.fetch(&credentials, &id).await {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!("📧 Could not fetch message {id} for zap {}: {e}", zap.id);
                    continue;
                }
            };
            tracing::info!("📧 New email from {}: {}", message.from, message.subject);
            signals.push(RawSignal::Message(message));

            if self.mark_as_read
                && let Err(e) = self.mailbox.mark_read(&credentials, &id).await
            {
                tracing::warn!("📭 Could not mark message {id} as read: {e}");
            }
        }
        Ok(signals)
    }
}

/// Spot price lookup for each price Zap.
pub struct PriceMonitor {
    feed: Arc<dyn PriceFeed>,
}

impl PriceMonitor {
    pub fn new(feed: Arc<dyn PriceFeed>) -> Self {
        Self { feed }
    }
}

#[async_trait]
impl TriggerMonitor for PriceMonitor {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Price
    }

    async fn scan(&self, zap: &Zap, spec: &TriggerSpec) -> Result<Vec<RawSignal>> {
        let TriggerSpec::Price(watch) = spec else {
            return Err(ZaplineError::InvalidTrigger(format!(
                "zap {} is not a price trigger",
                zap.id
            )));
        };
        Ok(self
            .feed
            .latest(&watch.symbol)
            .await
            .map(RawSignal::Sample)
            .into_iter()
            .collect())
    }
}

//! Trigger scheduler: one independent timer per polled adapter type.
//!
//! Each tick lists the active Zaps of its trigger type, scans them through the
//! monitor, runs the edge detector and hands every fired event to the
//! execution engine. A tick that is still running when the next one is due
//! makes the new tick a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use zapline_core::traits::ZapRegistry;
use zapline_core::trigger::TriggerSpec;
use zapline_core::types::{TriggerKind, Zap};

use crate::detector::EdgeDetector;
use crate::handoff::RunHandoff;
use crate::monitors::TriggerMonitor;

/// Counters for one completed tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Zaps whose trigger passed the structural check and were scanned.
    pub zaps: usize,
    /// Zaps skipped for malformed trigger metadata.
    pub invalid: usize,
    pub events: usize,
    pub runs: usize,
    /// Contained failures: registry, adapter or hand-off errors.
    pub failures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Previous tick of the same type still in progress, or no monitor registered.
    Skipped,
    Completed(TickReport),
}

struct MonitorSlot {
    monitor: Arc<dyn TriggerMonitor>,
    period: Duration,
    in_progress: Mutex<()>,
    skipped: AtomicUsize,
}

pub struct TriggerScheduler {
    registry: Arc<dyn ZapRegistry>,
    detector: Arc<EdgeDetector>,
    handoff: Arc<dyn RunHandoff>,
    slots: HashMap<TriggerKind, MonitorSlot>,
}

impl TriggerScheduler {
    pub fn new(
        registry: Arc<dyn ZapRegistry>,
        detector: Arc<EdgeDetector>,
        handoff: Arc<dyn RunHandoff>,
    ) -> Self {
        Self {
            registry,
            detector,
            handoff,
            slots: HashMap::new(),
        }
    }

    /// Register a monitor polled every `period`. Replaces any monitor of the same kind.
    pub fn with_monitor(mut self, monitor: Arc<dyn TriggerMonitor>, period: Duration) -> Self {
        self.slots.insert(
            monitor.kind(),
            MonitorSlot {
                monitor,
                period,
                in_progress: Mutex::new(()),
                skipped: AtomicUsize::new(0),
            },
        );
        self
    }

    pub fn kinds(&self) -> Vec<TriggerKind> {
        self.slots.keys().copied().collect()
    }

    /// Ticks of `kind` dropped because the previous one was still running.
    pub fn skipped_ticks(&self, kind: TriggerKind) -> usize {
        self.slots
            .get(&kind)
            .map_or(0, |slot| slot.skipped.load(Ordering::Relaxed))
    }

    /// Run one scan of `kind`. Never fails: problems are logged and counted.
    pub async fn tick(&self, kind: TriggerKind) -> TickOutcome {
        let Some(slot) = self.slots.get(&kind) else {
            tracing::warn!("No {kind} monitor registered");
            return TickOutcome::Skipped;
        };
        let Ok(_guard) = slot.in_progress.try_lock() else {
            slot.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("⏭️ {kind} tick still running, skipping");
            return TickOutcome::Skipped;
        };

        let mut report = TickReport::default();
        let zaps = match self.registry.list_active_zaps_by_trigger_type(kind.as_str()) {
            Ok(zaps) => zaps,
            Err(e) => {
                tracing::error!("❌ Could not list {kind} zaps: {e}");
                report.failures += 1;
                return TickOutcome::Completed(report);
            }
        };
        tracing::debug!("🔎 Monitoring {} {kind} zap(s)", zaps.len());

        for zap in &zaps {
            self.process_zap(slot, kind, zap, &mut report).await;
        }

        if report.events > 0 || report.failures > 0 {
            tracing::info!(
                "⏰ {kind} tick: {} zap(s), {} event(s), {} run(s), {} failure(s)",
                report.zaps,
                report.events,
                report.runs,
                report.failures
            );
        }
        TickOutcome::Completed(report)
    }

    async fn process_zap(&self, slot: &MonitorSlot, kind: TriggerKind, zap: &Zap, report: &mut TickReport) {
        let spec = match TriggerSpec::parse(&zap.trigger) {
            Ok(spec) if spec.kind() == kind => spec,
            Ok(spec) => {
                tracing::warn!("⚠️ Zap {} listed as {kind} but is {}", zap.id, spec.kind());
                report.invalid += 1;
                return;
            }
            Err(e) => {
                tracing::warn!("⚠️ Skipping zap {}: {e}", zap.id);
                report.invalid += 1;
                return;
            }
        };
        report.zaps += 1;

        let signals = match slot.monitor.scan(zap, &spec).await {
            Ok(signals) => signals,
            Err(e) => {
                tracing::warn!("⚠️ {kind} scan failed for zap {}: {e}", zap.id);
                report.failures += 1;
                return;
            }
        };

        for signal in signals {
            let Some(event) = self.detector.classify(&zap.id, &spec, signal) else {
                continue;
            };
            report.events += 1;
            match self.handoff.hand_off(event).await {
                Ok(result) => {
                    report.runs += 1;
                    tracing::info!(
                        "🚀 Zap '{}' run {} finished: {}",
                        result.zap_name,
                        result.run_id,
                        result.status.as_str()
                    );
                }
                Err(e) => {
                    tracing::warn!("⚠️ Hand-off failed for zap {}: {e}", zap.id);
                    report.failures += 1;
                }
            }
        }
    }

    /// Start one timer loop per registered monitor. The first tick runs after
    /// `startup_delay`; later ticks every monitor period.
    pub fn spawn(self: Arc<Self>, startup_delay: Duration) -> Vec<JoinHandle<()>> {
        self.kinds()
            .into_iter()
            .map(|kind| {
                let scheduler = self.clone();
                tokio::spawn(async move { scheduler.run_loop(kind, startup_delay).await })
            })
            .collect()
    }

    async fn run_loop(self: Arc<Self>, kind: TriggerKind, startup_delay: Duration) {
        let Some(period) = self.slots.get(&kind).map(|s| s.period) else {
            return;
        };
        tracing::info!("⏰ {kind} monitor started (every {}s)", period.as_secs());

        tokio::time::sleep(startup_delay).await;
        self.spawn_tick(kind);

        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.spawn_tick(kind);
        }
    }

    /// Ticks run detached so an overrunning scan trips the guard instead of delaying the timer.
    fn spawn_tick(self: &Arc<Self>, kind: TriggerKind) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.tick(kind).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::SimulatedExecutor;
    use crate::execution::ExecutionEngine;
    use crate::handoff::LocalHandoff;
    use crate::monitors::PriceMonitor;
    use crate::persistence::ZapDb;
    use crate::persistence::tests::new_zap;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::sync::Notify;
    use zapline_channels::price::PriceFeed;
    use zapline_core::error::{Result, ZaplineError};
    use zapline_core::types::{
        ActionRunStatus, NewAction, NewTrigger, NewZap, PriceSample, RawSignal, RunStatus,
    };

    /// Price feed double replaying a fixed sequence per symbol.
    #[derive(Default)]
    struct ReplayFeed {
        prices: std::sync::Mutex<HashMap<String, VecDeque<f64>>>,
    }

    impl ReplayFeed {
        fn with(symbol: &str, prices: &[f64]) -> Self {
            let feed = Self::default();
            feed.prices
                .lock()
                .unwrap()
                .insert(symbol.into(), prices.iter().copied().collect());
            feed
        }
    }

    #[async_trait]
    impl PriceFeed for ReplayFeed {
        async fn latest(&self, symbol: &str) -> Option<PriceSample> {
            let price = self.prices.lock().unwrap().get_mut(symbol)?.pop_front()?;
            Some(PriceSample {
                symbol: symbol.into(),
                price,
                timestamp: Utc::now(),
            })
        }
    }

    /// Monitor that parks inside `scan` until released.
    #[derive(Default)]
    struct BlockingMonitor {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl TriggerMonitor for BlockingMonitor {
        fn kind(&self) -> TriggerKind {
            TriggerKind::Price
        }

        async fn scan(&self, _: &Zap, _: &TriggerSpec) -> Result<Vec<RawSignal>> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Vec::new())
        }
    }

    /// Monitor failing for one symbol.
    struct FlakyMonitor;

    #[async_trait]
    impl TriggerMonitor for FlakyMonitor {
        fn kind(&self) -> TriggerKind {
            TriggerKind::Price
        }

        async fn scan(&self, _: &Zap, spec: &TriggerSpec) -> Result<Vec<RawSignal>> {
            let TriggerSpec::Price(watch) = spec else {
                return Ok(Vec::new());
            };
            if watch.symbol == "BAD" {
                return Err(ZaplineError::Adapter("feed down".into()));
            }
            Ok(vec![RawSignal::Sample(PriceSample {
                symbol: watch.symbol.clone(),
                price: 10_000.0,
                timestamp: Utc::now(),
            })])
        }
    }

    fn price_zap(db: &ZapDb, symbol: &str, target: f64) -> Zap {
        db.create_zap(&NewZap {
            name: format!("{symbol} alert"),
            owner_id: "u1".into(),
            trigger: NewTrigger {
                trigger_type: "price".into(),
                metadata: json!({"symbol": symbol, "targetPrice": target, "condition": "above"}),
            },
            actions: vec![
                NewAction {
                    action_type: "email".into(),
                    metadata: json!({
                        "to": "trader@example.com",
                        "subject": "ETH is up",
                        "body": "ETH crossed your target. ".repeat(6),
                    }),
                    sorting_order: None,
                },
                NewAction {
                    action_type: "webhook".into(),
                    metadata: json!({"url": "https://hooks.example.com/eth"}),
                    sorting_order: None,
                },
            ],
        })
        .unwrap()
    }

    fn scheduler(db: &Arc<ZapDb>, monitor: Arc<dyn TriggerMonitor>) -> Arc<TriggerScheduler> {
        let engine = Arc::new(ExecutionEngine::new(
            db.clone(),
            db.clone(),
            Arc::new(SimulatedExecutor),
            Duration::from_secs(5),
        ));
        Arc::new(
            TriggerScheduler::new(
                db.clone(),
                Arc::new(EdgeDetector::default()),
                Arc::new(LocalHandoff::new(engine)),
            )
            .with_monitor(monitor, Duration::from_secs(60)),
        )
    }

    #[tokio::test]
    async fn test_eth_crossing_scenario() {
        let db = Arc::new(ZapDb::open(":memory:").unwrap());
        let zap = price_zap(&db, "ETH", 2000.0);
        let feed = Arc::new(ReplayFeed::with("ETH", &[1900.0, 2100.0]));
        let scheduler = scheduler(&db, Arc::new(PriceMonitor::new(feed)));

        let TickOutcome::Completed(first) = scheduler.tick(TriggerKind::Price).await else {
            panic!("first tick skipped");
        };
        assert_eq!(first.events, 0);
        assert!(db.list_runs(&zap.id, 10, 0).unwrap().is_empty());

        let TickOutcome::Completed(second) = scheduler.tick(TriggerKind::Price).await else {
            panic!("second tick skipped");
        };
        assert_eq!((second.events, second.runs), (1, 1));

        let runs = db.list_runs(&zap.id, 10, 0).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(runs[0].metadata["price"], 2100.0);

        let action_runs = db.list_action_runs(&runs[0].id).unwrap();
        assert_eq!(action_runs.len(), 2);
        assert!(action_runs.iter().all(|a| a.status == ActionRunStatus::Success));

        let email = &action_runs[0].details;
        assert_eq!(email["to"], "trader@example.com");
        let preview = email["bodyPreview"].as_str().unwrap();
        assert_eq!(preview.chars().count(), 103);
        assert!(preview.ends_with("..."));
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let db = Arc::new(ZapDb::open(":memory:").unwrap());
        price_zap(&db, "ETH", 2000.0);
        let monitor = Arc::new(BlockingMonitor::default());
        let scheduler = scheduler(&db, monitor.clone());

        let running = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.tick(TriggerKind::Price).await }
        });
        monitor.entered.notified().await;

        assert_eq!(scheduler.tick(TriggerKind::Price).await, TickOutcome::Skipped);

        monitor.release.notify_one();
        assert!(matches!(running.await.unwrap(), TickOutcome::Completed(_)));

        // guard released: the next tick runs again
        monitor.release.notify_one();
        assert!(matches!(
            scheduler.tick(TriggerKind::Price).await,
            TickOutcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_failures_are_contained_per_zap() {
        let db = Arc::new(ZapDb::open(":memory:").unwrap());
        price_zap(&db, "BAD", 1.0);
        let good = price_zap(&db, "BTC", 1.0);
        db.create_zap(&NewZap {
            name: "broken".into(),
            owner_id: "u1".into(),
            trigger: NewTrigger {
                trigger_type: "price".into(),
                metadata: json!({"symbol": "ETH"}),
            },
            actions: vec![],
        })
        .unwrap();
        let scheduler = scheduler(&db, Arc::new(FlakyMonitor));

        let TickOutcome::Completed(report) = scheduler.tick(TriggerKind::Price).await else {
            panic!("tick skipped");
        };
        assert_eq!(report.zaps, 2);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.failures, 1);
        assert_eq!(report.runs, 1);
        assert_eq!(db.list_runs(&good.id, 10, 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_skipped() {
        let db = Arc::new(ZapDb::open(":memory:").unwrap());
        let scheduler = scheduler(&db, Arc::new(FlakyMonitor));
        assert_eq!(scheduler.tick(TriggerKind::Mailbox).await, TickOutcome::Skipped);
        assert_eq!(scheduler.kinds(), [TriggerKind::Price]);
    }

    /// Monitor recording when each scan starts, optionally holding it open.
    struct ClockedMonitor {
        kind: TriggerKind,
        hold: Duration,
        scans: std::sync::Mutex<Vec<u64>>,
        origin: Instant,
    }

    impl ClockedMonitor {
        fn new(kind: TriggerKind, hold: Duration, origin: Instant) -> Arc<Self> {
            Arc::new(Self {
                kind,
                hold,
                scans: std::sync::Mutex::new(Vec::new()),
                origin,
            })
        }

        fn scans(&self) -> Vec<u64> {
            self.scans.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TriggerMonitor for ClockedMonitor {
        fn kind(&self) -> TriggerKind {
            self.kind
        }

        async fn scan(&self, _: &Zap, _: &TriggerSpec) -> Result<Vec<RawSignal>> {
            self.scans
                .lock()
                .unwrap()
                .push(self.origin.elapsed().as_secs());
            tokio::time::sleep(self.hold).await;
            Ok(Vec::new())
        }
    }

    fn timed_scheduler(db: &Arc<ZapDb>, monitors: Vec<(Arc<ClockedMonitor>, u64)>) -> Arc<TriggerScheduler> {
        let engine = Arc::new(ExecutionEngine::new(
            db.clone(),
            db.clone(),
            Arc::new(SimulatedExecutor),
            Duration::from_secs(5),
        ));
        let mut scheduler = TriggerScheduler::new(
            db.clone(),
            Arc::new(EdgeDetector::default()),
            Arc::new(LocalHandoff::new(engine)),
        );
        for (monitor, period) in monitors {
            scheduler = scheduler.with_monitor(monitor, Duration::from_secs(period));
        }
        Arc::new(scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_start_after_delay_and_keep_their_own_period() {
        let db = Arc::new(ZapDb::open(":memory:").unwrap());
        db.create_zap(&new_zap("u1", "price", json!({"symbol": "ETH", "targetPrice": 1}), &[]))
            .unwrap();
        db.create_zap(&new_zap("u1", "mailbox", json!({"criteria": "subject", "value": "x"}), &[]))
            .unwrap();

        let origin = Instant::now();
        let price = ClockedMonitor::new(TriggerKind::Price, Duration::ZERO, origin);
        let mailbox = ClockedMonitor::new(TriggerKind::Mailbox, Duration::ZERO, origin);
        let scheduler = timed_scheduler(&db, vec![(price.clone(), 60), (mailbox.clone(), 30)]);
        let handles = scheduler.clone().spawn(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(price.scans().is_empty());
        assert!(mailbox.scans().is_empty());

        tokio::time::sleep(Duration::from_secs(126)).await;
        assert_eq!(price.scans(), [5, 65, 125]);
        assert_eq!(mailbox.scans(), [5, 35, 65, 95, 125]);
        assert_eq!(scheduler.skipped_ticks(TriggerKind::Price), 0);

        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tick_makes_later_firings_skip() {
        let db = Arc::new(ZapDb::open(":memory:").unwrap());
        db.create_zap(&new_zap("u1", "price", json!({"symbol": "ETH", "targetPrice": 1}), &[]))
            .unwrap();

        let origin = Instant::now();
        let slow = ClockedMonitor::new(TriggerKind::Price, Duration::from_secs(150), origin);
        let scheduler = timed_scheduler(&db, vec![(slow.clone(), 60)]);
        let handles = scheduler.clone().spawn(Duration::from_secs(5));

        // first scan holds until 155s: the firings at 65s and 125s find it running
        tokio::time::sleep(Duration::from_secs(130)).await;
        assert_eq!(slow.scans(), [5]);
        assert_eq!(scheduler.skipped_ticks(TriggerKind::Price), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(slow.scans(), [5, 185]);
        assert_eq!(scheduler.skipped_ticks(TriggerKind::Price), 2);

        for handle in handles {
            handle.abort();
        }
    }
}

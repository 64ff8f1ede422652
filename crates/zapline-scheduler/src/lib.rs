//! # Zapline Scheduler
//!
//! Trigger monitoring and Zap execution.
//!
//! ## Architecture
//! ```text
//! TriggerScheduler (one tokio interval per adapter type)
//!   ├── gmail  → MailboxMonitor ─┐
//!   └── price  → PriceMonitor  ──┤
//!                                ▼
//!                          EdgeDetector (seen ids, last prices)
//!                                ▼
//!                          RunHandoff ── local ──► ExecutionEngine
//!                                     └─ http ──► POST /execute/{zapId}
//!
//! ExecutionEngine
//!   ├── ZapRun (running → completed | partially_completed)
//!   └── per action: ActionRun → ActionExecutor (simulated | live)
//! ```

pub mod detector;
pub mod dispatch;
pub mod engine;
pub mod execution;
pub mod handoff;
pub mod monitors;
pub mod persistence;

pub use detector::EdgeDetector;
pub use dispatch::{ActionKind, LiveExecutor, SimulatedExecutor};
pub use engine::{TickOutcome, TickReport, TriggerScheduler};
pub use execution::ExecutionEngine;
pub use handoff::{HttpHandoff, LocalHandoff, RunHandoff};
pub use monitors::{MailboxMonitor, PriceMonitor, TriggerMonitor};
pub use persistence::ZapDb;

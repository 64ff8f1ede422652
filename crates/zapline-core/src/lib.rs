//! # Zapline Core
//!
//! Shared configuration, error type, Zap data model and the contracts the
//! scheduler, execution engine and gateway talk through.

pub mod config;
pub mod error;
pub mod traits;
pub mod trigger;
pub mod types;

pub use config::ZaplineConfig;
pub use error::{Result, ZaplineError};
pub use traits::{ActionExecutor, RunStore, ZapRegistry};
pub use trigger::{MailCriteria, MailboxQuery, PriceCondition, PriceWatch, TriggerSpec};
pub use types::*;

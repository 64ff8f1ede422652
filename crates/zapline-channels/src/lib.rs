//! # Zapline Channels
//! Signal adapters that feed the trigger scheduler.

pub mod gmail;
pub mod price;
pub mod webhook;

pub use gmail::{GmailMailbox, Mailbox};
pub use price::{CoinGeckoFeed, PriceFeed};
pub use webhook::InboundWebhook;

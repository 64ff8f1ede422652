//! # Zapline Gateway
//! HTTP boundaries of the pipeline: inbound webhooks, direct execution and
//! Zap management.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};

//! Error type shared by every Zapline crate.

use thiserror::Error;

/// Errors raised across the trigger/execution pipeline.
#[derive(Debug, Error)]
pub enum ZaplineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    /// External signal source unreachable or returned something unusable.
    #[error("adapter error: {0}")]
    Adapter(String),

    /// Trigger metadata failed the structural check for its type.
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("action error: {0}")]
    Action(String),

    /// Scheduler could not hand a trigger event to the execution engine.
    #[error("handoff error: {0}")]
    Handoff(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ZaplineError {
    /// Build a `NotFound` for a Zap id.
    pub fn zap_not_found(id: &str) -> Self {
        Self::NotFound(format!("zap '{id}'"))
    }
}

pub type Result<T> = std::result::Result<T, ZaplineError>;

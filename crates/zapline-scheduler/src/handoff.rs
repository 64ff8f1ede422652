//! Scheduler → execution engine hand-off.
//!
//! Co-located deployments call the engine in-process; split deployments POST
//! the event to the executor's `/execute/{zapId}` endpoint.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use zapline_core::error::{Result, ZaplineError};
use zapline_core::types::{TriggerEvent, ZapRunResult};

use crate::execution::ExecutionEngine;

#[async_trait]
pub trait RunHandoff: Send + Sync {
    async fn hand_off(&self, event: TriggerEvent) -> Result<ZapRunResult>;
}

/// In-process hand-off.
pub struct LocalHandoff {
    engine: Arc<ExecutionEngine>,
}

impl LocalHandoff {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl RunHandoff for LocalHandoff {
    async fn hand_off(&self, event: TriggerEvent) -> Result<ZapRunResult> {
        self.engine.execute_by_id(&event.zap_id, event.payload).await
    }
}

/// HTTP hand-off to a remote executor.
pub struct HttpHandoff {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHandoff {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn execute_url(&self, zap_id: &str) -> String {
        format!("{}/execute/{zap_id}", self.base_url)
    }
}

#[async_trait]
impl RunHandoff for HttpHandoff {
    async fn hand_off(&self, event: TriggerEvent) -> Result<ZapRunResult> {
        let url = self.execute_url(&event.zap_id);
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "triggerPayload": event.payload }))
            .send()
            .await
            .map_err(|e| ZaplineError::Handoff(format!("POST {url} failed: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ZaplineError::zap_not_found(&event.zap_id));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ZaplineError::Handoff(format!("POST {url} returned {status}: {body}")));
        }
        resp.json::<ZapRunResult>()
            .await
            .map_err(|e| ZaplineError::Handoff(format!("Invalid run summary from {url}: {e}")))
    }
}

//! Execution engine: runs a Zap's actions in order and records every outcome.
//!
//! A failing action never stops the run: it is recorded as a failed ActionRun
//! and the next action still executes. The run ends `completed` when every
//! action succeeded and `partially_completed` otherwise. `failed` is reserved
//! for runs the store could not carry to the end.

use chrono::Utc;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use zapline_core::error::{Result, ZaplineError};
use zapline_core::traits::{ActionExecutor, RunStore, ZapRegistry};
use zapline_core::types::{
    Action, ActionOutcome, ActionResult, ActionRunStatus, RunStatus, Zap, ZapRunResult,
};

pub struct ExecutionEngine {
    registry: Arc<dyn ZapRegistry>,
    store: Arc<dyn RunStore>,
    executor: Arc<dyn ActionExecutor>,
    action_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<dyn ZapRegistry>,
        store: Arc<dyn RunStore>,
        executor: Arc<dyn ActionExecutor>,
        action_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            executor,
            action_timeout,
        }
    }

    /// Resolve an active Zap and execute it. Unknown or deleted Zaps fail
    /// with `NotFound` before any ZapRun exists.
    pub async fn execute_by_id(&self, zap_id: &str, trigger_payload: Value) -> Result<ZapRunResult> {
        let zap = self
            .registry
            .get_zap(zap_id)?
            .filter(Zap::is_active)
            .ok_or_else(|| ZaplineError::zap_not_found(zap_id))?;
        self.execute(&zap, trigger_payload).await
    }

    pub async fn execute(&self, zap: &Zap, trigger_payload: Value) -> Result<ZapRunResult> {
        let run = self.store.create_zap_run(&zap.id, &trigger_payload)?;
        tracing::info!("⚡ Running zap '{}' ({}) as run {}", zap.name, zap.id, run.id);

        let mut actions: Vec<&Action> = zap.actions.iter().collect();
        actions.sort_by_key(|a| a.sorting_order);

        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            match self.run_action(&run.id, action, &trigger_payload).await {
                Ok(result) => results.push(result),
                Err(e) => return Err(self.abandon(&run.id, &trigger_payload, results, e)),
            }
        }

        let status = if results.iter().all(|r| r.success) {
            RunStatus::Completed
        } else {
            RunStatus::PartiallyCompleted
        };
        let metadata = run_metadata(&trigger_payload, &results, None);
        if let Err(e) = self.store.update_zap_run(&run.id, status, &metadata) {
            return Err(self.abandon(&run.id, &trigger_payload, results, e));
        }

        let failed = results.iter().filter(|r| !r.success).count();
        if failed == 0 {
            tracing::info!("✅ Zap '{}' completed ({} action(s))", zap.name, results.len());
        } else {
            tracing::warn!(
                "⚠️ Zap '{}' partially completed: {failed}/{} action(s) failed",
                zap.name,
                results.len()
            );
        }

        Ok(ZapRunResult {
            zap_id: zap.id.clone(),
            zap_name: zap.name.clone(),
            run_id: run.id,
            status,
            action_results: results,
            started_at: run.created_at,
            finished_at: Utc::now(),
        })
    }

    /// One action: ActionRun `running`, dispatch under the timeout, terminal update.
    /// Only store failures escape as `Err`.
    async fn run_action(
        &self,
        run_id: &str,
        action: &Action,
        trigger_payload: &Value,
    ) -> Result<ActionResult> {
        let action_run = self.store.create_action_run(&action.id, run_id)?;

        let outcome = match tokio::time::timeout(
            self.action_timeout,
            self.executor
                .execute(&action.action_type, &action.metadata, trigger_payload),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::warn!("❌ Action {} ({}) failed: {e}", action.id, action.action_type);
                ActionOutcome::failure(
                    format!("Action failed: {e}"),
                    json!({ "error": e.to_string() }),
                )
            }
            Err(_) => {
                let secs = self.action_timeout.as_secs();
                tracing::warn!("⏱️ Action {} ({}) timed out after {secs}s", action.id, action.action_type);
                ActionOutcome::failure(
                    format!("Action timed out after {secs}s"),
                    json!({ "error": "timeout", "timeoutSecs": secs }),
                )
            }
        };

        let status = if outcome.success {
            ActionRunStatus::Success
        } else {
            ActionRunStatus::Failed
        };
        self.store
            .update_action_run(&action_run.id, status, &outcome.message, &outcome.details)?;

        Ok(ActionResult {
            action_id: action.id.clone(),
            action_type: action.action_type.clone(),
            success: outcome.success,
            message: outcome.message,
            details: outcome.details,
        })
    }

    /// Best-effort `failed` mark for a run the store could not finish.
    fn abandon(
        &self,
        run_id: &str,
        trigger_payload: &Value,
        results: Vec<ActionResult>,
        error: ZaplineError,
    ) -> ZaplineError {
        tracing::error!("❌ Run {run_id} aborted: {error}");
        let metadata = run_metadata(trigger_payload, &results, Some(&error.to_string()));
        if let Err(e) = self.store.update_zap_run(run_id, RunStatus::Failed, &metadata) {
            tracing::error!("❌ Could not mark run {run_id} failed: {e}");
        }
        error
    }
}

/// Trigger payload fields plus `actionResults` (and `error` for aborted runs).
fn run_metadata(trigger_payload: &Value, results: &[ActionResult], error: Option<&str>) -> Value {
    let mut metadata = match trigger_payload {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("triggerPayload".into(), other.clone());
            map
        }
    };
    metadata.insert("actionResults".into(), json!(results));
    if let Some(error) = error {
        metadata.insert("error".into(), json!(error));
    }
    Value::Object(metadata)
}

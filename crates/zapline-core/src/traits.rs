//! Contracts between the pipeline and its collaborators.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::{
    ActionOutcome, ActionRun, ActionRunStatus, Credentials, RunStatus, Zap, ZapRun,
};

/// Read-only view over persisted Zap definitions.
pub trait ZapRegistry: Send + Sync {
    /// Active Zaps whose trigger type matches, actions in `sorting_order`.
    fn list_active_zaps_by_trigger_type(&self, trigger_type: &str) -> Result<Vec<Zap>>;

    fn get_zap(&self, id: &str) -> Result<Option<Zap>>;

    /// Active Zap whose webhook trigger carries this `webhookId`.
    fn find_zap_by_webhook(&self, webhook_id: &str) -> Result<Option<Zap>>;

    /// Mailbox tokens of a Zap owner, if they connected one.
    fn credentials_for(&self, owner_id: &str) -> Result<Option<Credentials>>;
}

/// Persistence of ZapRuns and ActionRuns.
pub trait RunStore: Send + Sync {
    fn create_zap_run(&self, zap_id: &str, metadata: &Value) -> Result<ZapRun>;

    /// Terminal update of a run; sets `finished_at`.
    fn update_zap_run(&self, id: &str, status: RunStatus, metadata: &Value) -> Result<()>;

    fn create_action_run(&self, action_id: &str, zap_run_id: &str) -> Result<ActionRun>;

    /// Terminal update of an action run; sets `finished_at`.
    fn update_action_run(
        &self,
        id: &str,
        status: ActionRunStatus,
        message: &str,
        details: &Value,
    ) -> Result<()>;
}

/// Side-effecting leaf that performs (or describes) one action.
///
/// Every failure of the side effect, transport errors included, comes back as
/// [`ActionOutcome::failure`]. `Err` is reserved for faults outside the action
/// and is recorded by the engine as a failed action.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        action_type: &str,
        metadata: &Value,
        trigger_payload: &Value,
    ) -> Result<ActionOutcome>;
}

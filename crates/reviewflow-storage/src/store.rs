// WorkflowStore trait definition

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use reviewflow_core::Environment;

use crate::error::StoreError;
use crate::models::*;

/// Masked health snapshot of the store.
///
/// `masked_url` never carries userinfo; see `reviewflow_core::mask_url`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub status: HealthStatus,
    pub masked_url: String,
    pub pool_size: u32,
    pub in_use: u32,
    pub checked_in: u32,
    pub overflow: u32,
}

/// Persistence surface for every entity in the data model.
///
/// Implementations must be thread-safe and enforce the same invariants:
/// unique names and dedup keys, monotonic execution timestamps, and
/// immutability of terminal execution rows.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    // =========================================================================
    // Workflows
    // =========================================================================

    async fn create_workflow(&self, input: CreateWorkflow) -> Result<WorkflowRow, StoreError>;

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, StoreError>;

    async fn get_workflow_by_name(&self, name: &str)
        -> Result<Option<WorkflowRow>, StoreError>;

    async fn update_workflow(
        &self,
        id: Uuid,
        input: UpdateWorkflow,
    ) -> Result<WorkflowRow, StoreError>;

    /// Delete a workflow; actions, triggers, executions, and their logs
    /// cascade.
    async fn delete_workflow(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowRow>, StoreError>;

    // =========================================================================
    // Actions and triggers
    // =========================================================================

    async fn create_action(&self, input: CreateAction) -> Result<WorkflowActionRow, StoreError>;

    /// Actions of a workflow ordered by `order_index` ascending
    async fn list_actions(&self, workflow_id: Uuid)
        -> Result<Vec<WorkflowActionRow>, StoreError>;

    async fn create_trigger(&self, input: CreateTrigger)
        -> Result<WorkflowTriggerRow, StoreError>;

    /// Enabled triggers of the given type, across all workflows
    async fn list_enabled_triggers(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<WorkflowTriggerRow>, StoreError>;

    // =========================================================================
    // Executions
    // =========================================================================

    /// Insert an execution row. A duplicate `execution_id` is a
    /// `Conflict`; this single atomic insert is the dedup gate.
    async fn create_execution(
        &self,
        input: CreateExecution,
    ) -> Result<WorkflowExecutionRow, StoreError>;

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecutionRow, StoreError>;

    async fn get_execution_by_key(
        &self,
        execution_id: &str,
    ) -> Result<Option<WorkflowExecutionRow>, StoreError>;

    /// Whether an execution with this dedup key started within `window`
    async fn recent_execution_exists(
        &self,
        execution_id: &str,
        window: Duration,
    ) -> Result<bool, StoreError>;

    /// Transition an execution's status.
    ///
    /// Sets `completed_at` exactly on terminal transitions. Refuses to
    /// touch a row already terminal (`Conflict`): the retry edge inserts
    /// a child row instead.
    async fn update_execution_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        result: Option<Value>,
        error_message: Option<String>,
    ) -> Result<WorkflowExecutionRow, StoreError>;

    async fn count_running_executions(&self, workflow_id: Uuid) -> Result<u64, StoreError>;

    async fn list_executions(
        &self,
        workflow_id: Uuid,
        status: Option<ExecutionStatus>,
        limit: i64,
    ) -> Result<Vec<WorkflowExecutionRow>, StoreError>;

    // =========================================================================
    // Execution logs (append-only)
    // =========================================================================

    async fn append_log(&self, input: CreateLog) -> Result<ExecutionLogRow, StoreError>;

    /// Logs of an execution ordered by creation time ascending
    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<ExecutionLogRow>, StoreError>;

    // =========================================================================
    // Integrations
    // =========================================================================

    async fn create_integration(
        &self,
        input: CreateIntegration,
    ) -> Result<IntegrationRow, StoreError>;

    async fn get_integration(&self, id: Uuid) -> Result<IntegrationRow, StoreError>;

    async fn list_integrations(&self, enabled_only: bool)
        -> Result<Vec<IntegrationRow>, StoreError>;

    async fn record_integration_health(
        &self,
        id: Uuid,
        status: HealthStatus,
    ) -> Result<(), StoreError>;

    async fn create_integration_event(
        &self,
        input: CreateIntegrationEvent,
    ) -> Result<IntegrationEventRow, StoreError>;

    /// Move an integration event through its lifecycle; settled states
    /// stamp `processed_at`.
    async fn update_integration_event_status(
        &self,
        id: Uuid,
        status: EventStatus,
        error_message: Option<String>,
    ) -> Result<IntegrationEventRow, StoreError>;

    /// Oldest-first scan of events awaiting processing
    async fn list_pending_integration_events(
        &self,
        limit: i64,
    ) -> Result<Vec<IntegrationEventRow>, StoreError>;

    // =========================================================================
    // Commenter admission
    // =========================================================================

    async fn get_commenter(
        &self,
        username: &str,
    ) -> Result<Option<AllowedCommenterRow>, StoreError>;

    /// Insert or update a commenter; re-enables a disabled row
    async fn upsert_commenter(
        &self,
        input: UpsertCommenter,
    ) -> Result<AllowedCommenterRow, StoreError>;

    /// Soft-disable; returns false when the row does not exist
    async fn disable_commenter(&self, username: &str) -> Result<bool, StoreError>;

    /// Update `last_comment_at` and optionally bump `comment_count`
    async fn record_commenter_activity(
        &self,
        username: &str,
        increment: bool,
    ) -> Result<Option<AllowedCommenterRow>, StoreError>;

    /// Newest-first page of commenters
    async fn list_commenters(
        &self,
        enabled_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AllowedCommenterRow>, StoreError>;

    async fn get_filter_settings(
        &self,
    ) -> Result<Option<CommentFilterSettingsRow>, StoreError>;

    /// Update the singleton settings row, creating it on first write
    async fn update_filter_settings(
        &self,
        input: UpdateFilterSettings,
    ) -> Result<CommentFilterSettingsRow, StoreError>;

    // =========================================================================
    // Health and maintenance
    // =========================================================================

    async fn health(&self) -> StoreHealth;

    /// Destroy all data. Forbidden when the environment is production.
    async fn drop_all(&self, environment: Environment) -> Result<(), StoreError>;
}

//! In-memory implementation of WorkflowStore for testing
//!
//! Provides the same semantics as the PostgreSQL implementation: unique
//! constraints, cascade deletes, the terminal-execution guard, and the
//! settings singleton.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use reviewflow_core::Environment;

use crate::error::StoreError;
use crate::models::*;
use crate::store::{StoreHealth, WorkflowStore};

#[derive(Default)]
struct Inner {
    workflows: HashMap<Uuid, WorkflowRow>,
    actions: HashMap<Uuid, WorkflowActionRow>,
    triggers: HashMap<Uuid, WorkflowTriggerRow>,
    executions: HashMap<Uuid, WorkflowExecutionRow>,
    logs: Vec<ExecutionLogRow>,
    integrations: HashMap<Uuid, IntegrationRow>,
    integration_events: HashMap<Uuid, IntegrationEventRow>,
    commenters: HashMap<Uuid, AllowedCommenterRow>,
    filter_settings: Option<CommentFilterSettingsRow>,
}

/// In-memory store used by unit and scenario tests.
pub struct InMemoryWorkflowStore {
    inner: RwLock<Inner>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Number of executions across all workflows (test helper)
    pub fn execution_count(&self) -> usize {
        self.inner.read().executions.len()
    }

    /// Number of log rows across all executions (test helper)
    pub fn log_count(&self) -> usize {
        self.inner.read().logs.len()
    }
}

impl Default for InMemoryWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn create_workflow(&self, input: CreateWorkflow) -> Result<WorkflowRow, StoreError> {
        if input.name.is_empty() || input.name.len() > 255 {
            return Err(StoreError::InvariantViolation(
                "workflow name must be non-empty and at most 255 chars".to_string(),
            ));
        }

        let mut inner = self.inner.write();
        if inner.workflows.values().any(|w| w.name == input.name) {
            return Err(StoreError::conflict(format!(
                "workflow name already exists: {}",
                input.name
            )));
        }

        let now = Utc::now();
        let row = WorkflowRow {
            id: Uuid::now_v7(),
            name: input.name,
            description: input.description,
            status: input.status,
            config: input.config,
            created_by: input.created_by,
            created_at: now,
            updated_at: now,
        };
        inner.workflows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, StoreError> {
        self.inner
            .read()
            .workflows
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("workflow {id}")))
    }

    async fn get_workflow_by_name(
        &self,
        name: &str,
    ) -> Result<Option<WorkflowRow>, StoreError> {
        Ok(self
            .inner
            .read()
            .workflows
            .values()
            .find(|w| w.name == name)
            .cloned())
    }

    async fn update_workflow(
        &self,
        id: Uuid,
        input: UpdateWorkflow,
    ) -> Result<WorkflowRow, StoreError> {
        let mut inner = self.inner.write();

        if let Some(name) = &input.name {
            if inner.workflows.values().any(|w| w.id != id && &w.name == name) {
                return Err(StoreError::conflict(format!(
                    "workflow name already exists: {name}"
                )));
            }
        }

        let row = inner
            .workflows
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(format!("workflow {id}")))?;

        if let Some(name) = input.name {
            row.name = name;
        }
        if let Some(description) = input.description {
            row.description = Some(description);
        }
        if let Some(status) = input.status {
            row.status = status;
        }
        if let Some(config) = input.config {
            row.config = config;
        }
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        if inner.workflows.remove(&id).is_none() {
            return Ok(false);
        }

        inner.actions.retain(|_, a| a.workflow_id != id);
        inner.triggers.retain(|_, t| t.workflow_id != id);
        let execution_ids: Vec<Uuid> = inner
            .executions
            .values()
            .filter(|e| e.workflow_id == id)
            .map(|e| e.id)
            .collect();
        inner.executions.retain(|_, e| e.workflow_id != id);
        inner
            .logs
            .retain(|log| !execution_ids.contains(&log.execution_id));
        Ok(true)
    }

    async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowRow>, StoreError> {
        let mut rows: Vec<WorkflowRow> = self
            .inner
            .read()
            .workflows
            .values()
            .filter(|w| status.is_none_or(|s| w.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn create_action(&self, input: CreateAction) -> Result<WorkflowActionRow, StoreError> {
        if input.order_index < 0 {
            return Err(StoreError::InvariantViolation(
                "order_index must be non-negative".to_string(),
            ));
        }

        let mut inner = self.inner.write();
        if !inner.workflows.contains_key(&input.workflow_id) {
            return Err(StoreError::not_found(format!(
                "workflow {}",
                input.workflow_id
            )));
        }
        if inner
            .actions
            .values()
            .any(|a| a.workflow_id == input.workflow_id && a.order_index == input.order_index)
        {
            return Err(StoreError::conflict(format!(
                "order_index {} already used in workflow",
                input.order_index
            )));
        }

        let now = Utc::now();
        let row = WorkflowActionRow {
            id: Uuid::now_v7(),
            workflow_id: input.workflow_id,
            action_type: input.action_type,
            action_name: input.action_name,
            config: input.config,
            order_index: input.order_index,
            conditions: input.conditions,
            created_at: now,
            updated_at: now,
        };
        inner.actions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list_actions(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowActionRow>, StoreError> {
        let mut rows: Vec<WorkflowActionRow> = self
            .inner
            .read()
            .actions
            .values()
            .filter(|a| a.workflow_id == workflow_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.order_index);
        Ok(rows)
    }

    async fn create_trigger(
        &self,
        input: CreateTrigger,
    ) -> Result<WorkflowTriggerRow, StoreError> {
        let mut inner = self.inner.write();
        if !inner.workflows.contains_key(&input.workflow_id) {
            return Err(StoreError::not_found(format!(
                "workflow {}",
                input.workflow_id
            )));
        }

        let now = Utc::now();
        let row = WorkflowTriggerRow {
            id: Uuid::now_v7(),
            workflow_id: input.workflow_id,
            trigger_type: input.trigger_type,
            conditions: input.conditions,
            enabled: input.enabled,
            created_at: now,
            updated_at: now,
        };
        inner.triggers.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list_enabled_triggers(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<WorkflowTriggerRow>, StoreError> {
        let mut rows: Vec<WorkflowTriggerRow> = self
            .inner
            .read()
            .triggers
            .values()
            .filter(|t| t.enabled && t.trigger_type == trigger_type)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.created_at);
        Ok(rows)
    }

    async fn create_execution(
        &self,
        input: CreateExecution,
    ) -> Result<WorkflowExecutionRow, StoreError> {
        let mut inner = self.inner.write();
        if !inner.workflows.contains_key(&input.workflow_id) {
            return Err(StoreError::not_found(format!(
                "workflow {}",
                input.workflow_id
            )));
        }
        if inner
            .executions
            .values()
            .any(|e| e.execution_id == input.execution_id)
        {
            return Err(StoreError::conflict(format!(
                "execution_id already exists: {}",
                input.execution_id
            )));
        }

        let row = WorkflowExecutionRow {
            id: Uuid::now_v7(),
            workflow_id: input.workflow_id,
            execution_id: input.execution_id,
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
            error_message: None,
            retry_count: input.retry_count,
            parent_execution_id: input.parent_execution_id,
            trigger_type: input.trigger_type,
            trigger_data: input.trigger_data,
        };
        inner.executions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecutionRow, StoreError> {
        self.inner
            .read()
            .executions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("execution {id}")))
    }

    async fn get_execution_by_key(
        &self,
        execution_id: &str,
    ) -> Result<Option<WorkflowExecutionRow>, StoreError> {
        Ok(self
            .inner
            .read()
            .executions
            .values()
            .find(|e| e.execution_id == execution_id)
            .cloned())
    }

    async fn recent_execution_exists(
        &self,
        execution_id: &str,
        window: Duration,
    ) -> Result<bool, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        Ok(self
            .inner
            .read()
            .executions
            .values()
            .any(|e| e.execution_id == execution_id && e.started_at > cutoff))
    }

    async fn update_execution_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        result: Option<Value>,
        error_message: Option<String>,
    ) -> Result<WorkflowExecutionRow, StoreError> {
        let mut inner = self.inner.write();
        let row = inner
            .executions
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(format!("execution {id}")))?;

        if row.status.is_terminal() {
            return Err(StoreError::conflict(format!(
                "execution {id} is already terminal ({})",
                row.status
            )));
        }

        row.status = status;
        if let Some(result) = result {
            row.result = Some(result);
        }
        if let Some(message) = error_message {
            row.error_message = Some(message);
        }
        if status.is_terminal() {
            row.completed_at = Some(Utc::now().max(row.started_at));
        }
        Ok(row.clone())
    }

    async fn count_running_executions(&self, workflow_id: Uuid) -> Result<u64, StoreError> {
        Ok(self
            .inner
            .read()
            .executions
            .values()
            .filter(|e| e.workflow_id == workflow_id && e.status == ExecutionStatus::Running)
            .count() as u64)
    }

    async fn list_executions(
        &self,
        workflow_id: Uuid,
        status: Option<ExecutionStatus>,
        limit: i64,
    ) -> Result<Vec<WorkflowExecutionRow>, StoreError> {
        let mut rows: Vec<WorkflowExecutionRow> = self
            .inner
            .read()
            .executions
            .values()
            .filter(|e| e.workflow_id == workflow_id && status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn append_log(&self, input: CreateLog) -> Result<ExecutionLogRow, StoreError> {
        let mut inner = self.inner.write();
        if !inner.executions.contains_key(&input.execution_id) {
            return Err(StoreError::not_found(format!(
                "execution {}",
                input.execution_id
            )));
        }

        let row = ExecutionLogRow {
            id: Uuid::now_v7(),
            execution_id: input.execution_id,
            level: input.level,
            message: input.message,
            metadata: input.metadata,
            action_id: input.action_id,
            step_name: input.step_name,
            created_at: Utc::now(),
        };
        inner.logs.push(row.clone());
        Ok(row)
    }

    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<ExecutionLogRow>, StoreError> {
        Ok(self
            .inner
            .read()
            .logs
            .iter()
            .filter(|log| log.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn create_integration(
        &self,
        input: CreateIntegration,
    ) -> Result<IntegrationRow, StoreError> {
        let mut inner = self.inner.write();
        if inner.integrations.values().any(|i| i.name == input.name) {
            return Err(StoreError::conflict(format!(
                "integration name already exists: {}",
                input.name
            )));
        }

        let now = Utc::now();
        let row = IntegrationRow {
            id: Uuid::now_v7(),
            name: input.name,
            integration_type: input.integration_type,
            config: input.config,
            enabled: input.enabled,
            health_status: HealthStatus::Unknown,
            last_health_check: None,
            credentials_encrypted: input.credentials_encrypted,
            created_at: now,
            updated_at: now,
        };
        inner.integrations.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_integration(&self, id: Uuid) -> Result<IntegrationRow, StoreError> {
        self.inner
            .read()
            .integrations
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("integration {id}")))
    }

    async fn list_integrations(
        &self,
        enabled_only: bool,
    ) -> Result<Vec<IntegrationRow>, StoreError> {
        Ok(self
            .inner
            .read()
            .integrations
            .values()
            .filter(|i| !enabled_only || i.enabled)
            .cloned()
            .collect())
    }

    async fn record_integration_health(
        &self,
        id: Uuid,
        status: HealthStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let row = inner
            .integrations
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(format!("integration {id}")))?;
        row.health_status = status;
        row.last_health_check = Some(Utc::now());
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn create_integration_event(
        &self,
        input: CreateIntegrationEvent,
    ) -> Result<IntegrationEventRow, StoreError> {
        let mut inner = self.inner.write();
        if !inner.integrations.contains_key(&input.integration_id) {
            return Err(StoreError::not_found(format!(
                "integration {}",
                input.integration_id
            )));
        }

        let row = IntegrationEventRow {
            id: Uuid::now_v7(),
            integration_id: input.integration_id,
            event_type: input.event_type,
            event_id: input.event_id,
            payload: input.payload,
            status: EventStatus::Pending,
            processed_at: None,
            error_message: None,
            retry_count: 0,
            created_at: Utc::now(),
        };
        inner.integration_events.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_integration_event_status(
        &self,
        id: Uuid,
        status: EventStatus,
        error_message: Option<String>,
    ) -> Result<IntegrationEventRow, StoreError> {
        let mut inner = self.inner.write();
        let row = inner
            .integration_events
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(format!("integration event {id}")))?;

        row.status = status;
        if let Some(message) = error_message {
            row.error_message = Some(message);
        }
        if status.is_settled() {
            row.processed_at = Some(Utc::now());
        }
        Ok(row.clone())
    }

    async fn list_pending_integration_events(
        &self,
        limit: i64,
    ) -> Result<Vec<IntegrationEventRow>, StoreError> {
        let mut rows: Vec<IntegrationEventRow> = self
            .inner
            .read()
            .integration_events
            .values()
            .filter(|e| matches!(e.status, EventStatus::Pending | EventStatus::Processing))
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.created_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn get_commenter(
        &self,
        username: &str,
    ) -> Result<Option<AllowedCommenterRow>, StoreError> {
        Ok(self
            .inner
            .read()
            .commenters
            .values()
            .find(|c| c.external_username == username)
            .cloned())
    }

    async fn upsert_commenter(
        &self,
        input: UpsertCommenter,
    ) -> Result<AllowedCommenterRow, StoreError> {
        let mut inner = self.inner.write();
        let now = Utc::now();

        if let Some(row) = inner
            .commenters
            .values_mut()
            .find(|c| c.external_username == input.external_username)
        {
            if input.external_user_id.is_some() {
                row.external_user_id = input.external_user_id;
            }
            if input.notes.is_some() {
                row.notes = input.notes;
            }
            row.enabled = true;
            row.updated_at = now;
            return Ok(row.clone());
        }

        let row = AllowedCommenterRow {
            id: Uuid::now_v7(),
            external_username: input.external_username,
            external_user_id: input.external_user_id,
            enabled: true,
            added_by: input.added_by,
            notes: input.notes,
            last_comment_at: None,
            comment_count: 0,
            created_at: now,
            updated_at: now,
        };
        inner.commenters.insert(row.id, row.clone());
        Ok(row)
    }

    async fn disable_commenter(&self, username: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        match inner
            .commenters
            .values_mut()
            .find(|c| c.external_username == username)
        {
            Some(row) => {
                row.enabled = false;
                row.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_commenter_activity(
        &self,
        username: &str,
        increment: bool,
    ) -> Result<Option<AllowedCommenterRow>, StoreError> {
        let mut inner = self.inner.write();
        match inner
            .commenters
            .values_mut()
            .find(|c| c.external_username == username)
        {
            Some(row) => {
                row.last_comment_at = Some(Utc::now());
                if increment {
                    row.comment_count += 1;
                }
                row.updated_at = Utc::now();
                Ok(Some(row.clone()))
            }
            None => Ok(None),
        }
    }

    async fn list_commenters(
        &self,
        enabled_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AllowedCommenterRow>, StoreError> {
        let mut rows: Vec<AllowedCommenterRow> = self
            .inner
            .read()
            .commenters
            .values()
            .filter(|c| !enabled_only || c.enabled)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn get_filter_settings(
        &self,
    ) -> Result<Option<CommentFilterSettingsRow>, StoreError> {
        Ok(self.inner.read().filter_settings.clone())
    }

    async fn update_filter_settings(
        &self,
        input: UpdateFilterSettings,
    ) -> Result<CommentFilterSettingsRow, StoreError> {
        let mut inner = self.inner.write();
        let now = Utc::now();

        let row = inner.filter_settings.get_or_insert_with(|| {
            CommentFilterSettingsRow {
                id: Uuid::now_v7(),
                enabled: true,
                auto_add_commenters: false,
                auto_reply_enabled: false,
                auto_reply_message: DEFAULT_AUTO_REPLY_MESSAGE.to_string(),
                whitelist_mode: true,
                created_at: now,
                updated_at: now,
            }
        });

        if let Some(enabled) = input.enabled {
            row.enabled = enabled;
        }
        if let Some(auto_add) = input.auto_add_commenters {
            row.auto_add_commenters = auto_add;
        }
        if let Some(auto_reply) = input.auto_reply_enabled {
            row.auto_reply_enabled = auto_reply;
        }
        if let Some(message) = input.auto_reply_message {
            row.auto_reply_message = message;
        }
        if let Some(whitelist) = input.whitelist_mode {
            row.whitelist_mode = whitelist;
        }
        row.updated_at = now;
        Ok(row.clone())
    }

    async fn health(&self) -> StoreHealth {
        StoreHealth {
            status: HealthStatus::Healthy,
            masked_url: "memory://".to_string(),
            pool_size: 0,
            in_use: 0,
            checked_in: 0,
            overflow: 0,
        }
    }

    async fn drop_all(&self, environment: Environment) -> Result<(), StoreError> {
        if environment == Environment::Production {
            return Err(StoreError::OperationForbidden(
                "drop_all is forbidden in production".to_string(),
            ));
        }
        *self.inner.write() = Inner::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> InMemoryWorkflowStore {
        InMemoryWorkflowStore::new()
    }

    fn workflow_input(name: &str) -> CreateWorkflow {
        CreateWorkflow {
            name: name.to_string(),
            description: None,
            status: WorkflowStatus::Active,
            config: json!({}),
            created_by: None,
        }
    }

    #[tokio::test]
    async fn test_workflow_name_uniqueness() {
        let store = store();
        store.create_workflow(workflow_input("review")).await.unwrap();
        let err = store
            .create_workflow(workflow_input("review"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_action_order_uniqueness() {
        let store = store();
        let workflow = store.create_workflow(workflow_input("w")).await.unwrap();

        let action = CreateAction {
            workflow_id: workflow.id,
            action_type: "echo".to_string(),
            action_name: "first".to_string(),
            config: json!({}),
            order_index: 0,
            conditions: None,
        };
        store.create_action(action.clone()).await.unwrap();
        let err = store.create_action(action).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_execution_dedup_key_conflict() {
        let store = store();
        let workflow = store.create_workflow(workflow_input("w")).await.unwrap();

        let input = CreateExecution {
            workflow_id: workflow.id,
            execution_id: "int-1:e1".to_string(),
            trigger_type: Some(TriggerType::Webhook),
            trigger_data: None,
            parent_execution_id: None,
            retry_count: 0,
        };
        store.create_execution(input.clone()).await.unwrap();
        let err = store.create_execution(input).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_terminal_execution_is_immutable() {
        let store = store();
        let workflow = store.create_workflow(workflow_input("w")).await.unwrap();
        let execution = store
            .create_execution(CreateExecution {
                workflow_id: workflow.id,
                execution_id: "run-1".to_string(),
                trigger_type: None,
                trigger_data: None,
                parent_execution_id: None,
                retry_count: 0,
            })
            .await
            .unwrap();

        let updated = store
            .update_execution_status(execution.id, ExecutionStatus::Completed, None, None)
            .await
            .unwrap();
        assert!(updated.completed_at.is_some());
        assert!(updated.completed_at.unwrap() >= updated.started_at);

        let err = store
            .update_execution_status(execution.id, ExecutionStatus::Failed, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_recent_execution_window() {
        let store = store();
        let workflow = store.create_workflow(workflow_input("w")).await.unwrap();
        store
            .create_execution(CreateExecution {
                workflow_id: workflow.id,
                execution_id: "int:e9".to_string(),
                trigger_type: None,
                trigger_data: None,
                parent_execution_id: None,
                retry_count: 0,
            })
            .await
            .unwrap();

        assert!(store
            .recent_execution_exists("int:e9", Duration::from_secs(86_400))
            .await
            .unwrap());
        assert!(!store
            .recent_execution_exists("int:other", Duration::from_secs(86_400))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_cascade_delete() {
        let store = store();
        let workflow = store.create_workflow(workflow_input("w")).await.unwrap();
        store
            .create_action(CreateAction {
                workflow_id: workflow.id,
                action_type: "echo".to_string(),
                action_name: "a".to_string(),
                config: json!({}),
                order_index: 0,
                conditions: None,
            })
            .await
            .unwrap();
        let execution = store
            .create_execution(CreateExecution {
                workflow_id: workflow.id,
                execution_id: "run-1".to_string(),
                trigger_type: None,
                trigger_data: None,
                parent_execution_id: None,
                retry_count: 0,
            })
            .await
            .unwrap();
        store
            .append_log(CreateLog::new(execution.id, LogLevel::Info, "started"))
            .await
            .unwrap();

        assert!(store.delete_workflow(workflow.id).await.unwrap());
        assert_eq!(store.execution_count(), 0);
        assert_eq!(store.log_count(), 0);
        assert!(store.list_actions(workflow.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commenter_upsert_reenables() {
        let store = store();
        store
            .upsert_commenter(UpsertCommenter {
                external_username: "alice".to_string(),
                external_user_id: Some(42),
                added_by: Some("admin".to_string()),
                notes: None,
            })
            .await
            .unwrap();
        assert!(store.disable_commenter("alice").await.unwrap());
        assert!(!store.get_commenter("alice").await.unwrap().unwrap().enabled);

        let row = store
            .upsert_commenter(UpsertCommenter {
                external_username: "alice".to_string(),
                external_user_id: None,
                added_by: None,
                notes: None,
            })
            .await
            .unwrap();
        assert!(row.enabled);
        assert_eq!(row.external_user_id, Some(42));
    }

    #[tokio::test]
    async fn test_settings_singleton_created_on_first_write() {
        let store = store();
        assert!(store.get_filter_settings().await.unwrap().is_none());

        let settings = store
            .update_filter_settings(UpdateFilterSettings {
                auto_add_commenters: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(settings.enabled);
        assert!(settings.auto_add_commenters);
        assert!(settings.whitelist_mode);
        assert_eq!(settings.auto_reply_message, DEFAULT_AUTO_REPLY_MESSAGE);

        let second = store
            .update_filter_settings(UpdateFilterSettings {
                whitelist_mode: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second.id, settings.id);
        assert!(!second.whitelist_mode);
    }

    #[tokio::test]
    async fn test_integration_event_lifecycle() {
        let store = store();
        let integration = store
            .create_integration(CreateIntegration {
                name: "gh".to_string(),
                integration_type: "github".to_string(),
                config: json!({}),
                enabled: true,
                credentials_encrypted: None,
            })
            .await
            .unwrap();
        assert_eq!(integration.health_status, HealthStatus::Unknown);

        let event = store
            .create_integration_event(CreateIntegrationEvent {
                integration_id: integration.id,
                event_type: "issue_comment".to_string(),
                event_id: Some("e1".to_string()),
                payload: json!({ "action": "created" }),
            })
            .await
            .unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        assert!(event.processed_at.is_none());

        let pending = store.list_pending_integration_events(10).await.unwrap();
        assert_eq!(pending.len(), 1);

        store
            .update_integration_event_status(event.id, EventStatus::Processing, None)
            .await
            .unwrap();
        let settled = store
            .update_integration_event_status(event.id, EventStatus::Completed, None)
            .await
            .unwrap();
        assert!(settled.processed_at.is_some());
        assert!(store
            .list_pending_integration_events(10)
            .await
            .unwrap()
            .is_empty());

        store
            .record_integration_health(integration.id, HealthStatus::Healthy)
            .await
            .unwrap();
        let refreshed = store.get_integration(integration.id).await.unwrap();
        assert_eq!(refreshed.health_status, HealthStatus::Healthy);
        assert!(refreshed.last_health_check.is_some());
    }

    #[tokio::test]
    async fn test_drop_all_forbidden_in_production() {
        let store = store();
        let err = store.drop_all(Environment::Production).await.unwrap_err();
        assert!(matches!(err, StoreError::OperationForbidden(_)));

        store.drop_all(Environment::Testing).await.unwrap();
    }
}

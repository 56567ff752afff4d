// Database models
//
// Rows mirror the schema in migrations/0001_initial.sql. Status columns
// are TEXT guarded by CHECK constraints; the enums here are the closed
// sets those constraints admit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

// ============================================
// Status enumerations
// ============================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Active,
    Inactive,
    Archived,
    Draft,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Archived => write!(f, "archived"),
            Self::Draft => write!(f, "draft"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal states never transition again; only the retry edge may
    /// follow, and it inserts a new row.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum TriggerType {
    Event,
    Schedule,
    Webhook,
    Manual,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Event => write!(f, "event"),
            Self::Schedule => write!(f, "schedule"),
            Self::Webhook => write!(f, "webhook"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Ignored,
}

impl EventStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Ignored)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Ignored => write!(f, "ignored"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    #[default]
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

// ============================================
// Workflow definition models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: WorkflowStatus,
    pub config: Value,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    /// Per-workflow execution timeout from config, when set
    pub fn timeout_secs(&self) -> Option<u64> {
        self.config.get("timeout_secs").and_then(Value::as_u64)
    }

    /// Bound on concurrently running executions of this workflow
    pub fn max_concurrent(&self) -> Option<u64> {
        self.config.get("max_concurrent").and_then(Value::as_u64)
    }

    /// Work item priority for this workflow's executions (1-10)
    pub fn priority(&self) -> Option<u8> {
        self.config
            .get("priority")
            .and_then(Value::as_u64)
            .map(|p| p.clamp(1, 10) as u8)
    }
}

#[derive(Debug, Clone)]
pub struct CreateWorkflow {
    pub name: String,
    pub description: Option<String>,
    pub status: WorkflowStatus,
    pub config: Value,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateWorkflow {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<WorkflowStatus>,
    pub config: Option<Value>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowActionRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub action_type: String,
    pub action_name: String,
    pub config: Value,
    pub order_index: i32,
    pub conditions: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowActionRow {
    pub fn timeout_secs(&self) -> Option<u64> {
        self.config.get("timeout_secs").and_then(Value::as_u64)
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.config
            .get("max_retries")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
    }

    pub fn continue_on_error(&self) -> bool {
        self.config
            .get("continue_on_error")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct CreateAction {
    pub workflow_id: Uuid,
    pub action_type: String,
    pub action_name: String,
    pub config: Value,
    pub order_index: i32,
    pub conditions: Option<Value>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowTriggerRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub trigger_type: TriggerType,
    pub conditions: Value,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTrigger {
    pub workflow_id: Uuid,
    pub trigger_type: TriggerType,
    pub conditions: Value,
    pub enabled: bool,
}

// ============================================
// Execution models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowExecutionRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Externally unique key; the dedup key for event-triggered runs
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub parent_execution_id: Option<Uuid>,
    pub trigger_type: Option<TriggerType>,
    pub trigger_data: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct CreateExecution {
    pub workflow_id: Uuid,
    pub execution_id: String,
    pub trigger_type: Option<TriggerType>,
    pub trigger_data: Option<Value>,
    pub parent_execution_id: Option<Uuid>,
    pub retry_count: i32,
}

#[derive(Debug, Clone, FromRow)]
pub struct ExecutionLogRow {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    pub metadata: Option<Value>,
    pub action_id: Option<Uuid>,
    pub step_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateLog {
    pub execution_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    pub metadata: Option<Value>,
    pub action_id: Option<Uuid>,
    pub step_name: Option<String>,
}

impl CreateLog {
    pub fn new(execution_id: Uuid, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            execution_id,
            level,
            message: message.into(),
            metadata: None,
            action_id: None,
            step_name: None,
        }
    }

    pub fn for_action(mut self, action_id: Uuid, step_name: impl Into<String>) -> Self {
        self.action_id = Some(action_id);
        self.step_name = Some(step_name.into());
        self
    }
}

// ============================================
// Integration models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct IntegrationRow {
    pub id: Uuid,
    pub name: String,
    pub integration_type: String,
    pub config: Value,
    pub enabled: bool,
    pub health_status: HealthStatus,
    pub last_health_check: Option<DateTime<Utc>>,
    /// Opaque ciphertext; never decrypted by the core
    pub credentials_encrypted: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateIntegration {
    pub name: String,
    pub integration_type: String,
    pub config: Value,
    pub enabled: bool,
    pub credentials_encrypted: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct IntegrationEventRow {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub event_type: String,
    pub event_id: Option<String>,
    pub payload: Value,
    pub status: EventStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateIntegrationEvent {
    pub integration_id: Uuid,
    pub event_type: String,
    pub event_id: Option<String>,
    pub payload: Value,
}

// ============================================
// Commenter admission models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct AllowedCommenterRow {
    pub id: Uuid,
    pub external_username: String,
    pub external_user_id: Option<i64>,
    pub enabled: bool,
    pub added_by: Option<String>,
    pub notes: Option<String>,
    pub last_comment_at: Option<DateTime<Utc>>,
    pub comment_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UpsertCommenter {
    pub external_username: String,
    pub external_user_id: Option<i64>,
    pub added_by: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CommentFilterSettingsRow {
    pub id: Uuid,
    pub enabled: bool,
    pub auto_add_commenters: bool,
    pub auto_reply_enabled: bool,
    pub auto_reply_message: String,
    pub whitelist_mode: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Default auto-reply template; `{username}` is substituted literally.
pub const DEFAULT_AUTO_REPLY_MESSAGE: &str = "Thank you for your comment! User @{username} has \
been added to the allowed commenters list. Comments from this user will now be processed.";

#[derive(Debug, Clone, Default)]
pub struct UpdateFilterSettings {
    pub enabled: Option<bool>,
    pub auto_add_commenters: Option<bool>,
    pub auto_reply_enabled: Option<bool>,
    pub auto_reply_message: Option<String>,
    pub whitelist_mode: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_statuses() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Timeout.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_log_level_display_is_uppercase() {
        assert_eq!(LogLevel::Warning.to_string(), "WARNING");
        assert_eq!(LogLevel::Info.to_string(), "INFO");
    }

    #[test]
    fn test_workflow_config_accessors() {
        let row = WorkflowRow {
            id: Uuid::now_v7(),
            name: "review".to_string(),
            description: None,
            status: WorkflowStatus::Active,
            config: json!({ "timeout_secs": 120, "max_concurrent": 3, "priority": 99 }),
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(row.timeout_secs(), Some(120));
        assert_eq!(row.max_concurrent(), Some(3));
        // Priority clamps into the valid range
        assert_eq!(row.priority(), Some(10));
    }

    #[test]
    fn test_action_config_accessors() {
        let row = WorkflowActionRow {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            action_type: "echo".to_string(),
            action_name: "echo input".to_string(),
            config: json!({ "max_retries": 2, "continue_on_error": true }),
            order_index: 0,
            conditions: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(row.max_retries(), Some(2));
        assert!(row.continue_on_error());
        assert_eq!(row.timeout_secs(), None);
    }
}

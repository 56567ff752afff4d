// PostgreSQL implementation of WorkflowStore
//
// Runtime-checked sqlx queries with RETURNING, COALESCE-style partial
// updates, and pool settings mapped from the DB_* environment knobs.
// The schema lives in migrations/ and is applied with sqlx::migrate!.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use reviewflow_core::{mask_url, DbConfig, Environment};

use crate::error::StoreError;
use crate::models::*;
use crate::store::{StoreHealth, WorkflowStore};

const WORKFLOW_COLUMNS: &str =
    "id, name, description, status, config, created_by, created_at, updated_at";
const ACTION_COLUMNS: &str =
    "id, workflow_id, action_type, action_name, config, order_index, conditions, created_at, updated_at";
const TRIGGER_COLUMNS: &str =
    "id, workflow_id, trigger_type, conditions, enabled, created_at, updated_at";
const EXECUTION_COLUMNS: &str = "id, workflow_id, execution_id, status, started_at, completed_at, \
     result, error_message, retry_count, parent_execution_id, trigger_type, trigger_data";
const LOG_COLUMNS: &str =
    "id, execution_id, level, message, metadata, action_id, step_name, created_at";
const INTEGRATION_COLUMNS: &str = "id, name, integration_type, config, enabled, health_status, \
     last_health_check, credentials_encrypted, created_at, updated_at";
const INTEGRATION_EVENT_COLUMNS: &str = "id, integration_id, event_type, event_id, payload, \
     status, processed_at, error_message, retry_count, created_at";
const COMMENTER_COLUMNS: &str = "id, external_username, external_user_id, enabled, added_by, \
     notes, last_comment_at, comment_count, created_at, updated_at";
const SETTINGS_COLUMNS: &str = "id, enabled, auto_add_commenters, auto_reply_enabled, \
     auto_reply_message, whitelist_mode, created_at, updated_at";

/// PostgreSQL-backed store.
pub struct PostgresWorkflowStore {
    pool: PgPool,
    masked_url: String,
    pool_size: u32,
    max_overflow: u32,
}

impl PostgresWorkflowStore {
    /// Open a connection pool.
    ///
    /// Failure leaves no store behind; callers treat the error as
    /// "unavailable" and every later operation would fail the same way.
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections())
            .acquire_timeout(config.pool_timeout)
            .max_lifetime(config.pool_recycle)
            .test_before_acquire(true)
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::info!(url = %mask_url(&config.url), "store pool opened");
        Ok(Self {
            pool,
            masked_url: mask_url(&config.url),
            pool_size: config.pool_size,
            max_overflow: config.max_overflow,
        })
    }

    /// Wrap an existing pool (used by tests with their own setup).
    /// The pool's configured size is not recoverable from sqlx, so the
    /// caller supplies it for health reporting.
    pub fn from_pool(pool: PgPool, url: &str, pool_size: u32) -> Self {
        Self {
            pool,
            masked_url: mask_url(url),
            pool_size,
            max_overflow: 0,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    async fn create_workflow(&self, input: CreateWorkflow) -> Result<WorkflowRow, StoreError> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            r#"
            INSERT INTO workflows (id, name, description, status, config, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {WORKFLOW_COLUMNS}
            "#,
        ))
        .bind(Uuid::now_v7())
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.status)
        .bind(&input.config)
        .bind(&input.created_by)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, StoreError> {
        sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("workflow {id}")))
    }

    async fn get_workflow_by_name(
        &self,
        name: &str,
    ) -> Result<Option<WorkflowRow>, StoreError> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_workflow(
        &self,
        id: Uuid,
        input: UpdateWorkflow,
    ) -> Result<WorkflowRow, StoreError> {
        sqlx::query_as::<_, WorkflowRow>(&format!(
            r#"
            UPDATE workflows
            SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                status = COALESCE($4, status),
                config = COALESCE($5, config),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {WORKFLOW_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.status)
        .bind(&input.config)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("workflow {id}")))
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowRow>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, WorkflowRow>(&format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE status = $1 ORDER BY created_at DESC"
                ))
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, WorkflowRow>(&format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows ORDER BY created_at DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn create_action(&self, input: CreateAction) -> Result<WorkflowActionRow, StoreError> {
        let row = sqlx::query_as::<_, WorkflowActionRow>(&format!(
            r#"
            INSERT INTO workflow_actions
                (id, workflow_id, action_type, action_name, config, order_index, conditions)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {ACTION_COLUMNS}
            "#,
        ))
        .bind(Uuid::now_v7())
        .bind(input.workflow_id)
        .bind(&input.action_type)
        .bind(&input.action_name)
        .bind(&input.config)
        .bind(input.order_index)
        .bind(&input.conditions)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_actions(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowActionRow>, StoreError> {
        let rows = sqlx::query_as::<_, WorkflowActionRow>(&format!(
            "SELECT {ACTION_COLUMNS} FROM workflow_actions WHERE workflow_id = $1 ORDER BY order_index ASC"
        ))
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create_trigger(
        &self,
        input: CreateTrigger,
    ) -> Result<WorkflowTriggerRow, StoreError> {
        let row = sqlx::query_as::<_, WorkflowTriggerRow>(&format!(
            r#"
            INSERT INTO workflow_triggers (id, workflow_id, trigger_type, conditions, enabled)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {TRIGGER_COLUMNS}
            "#,
        ))
        .bind(Uuid::now_v7())
        .bind(input.workflow_id)
        .bind(input.trigger_type)
        .bind(&input.conditions)
        .bind(input.enabled)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_enabled_triggers(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<WorkflowTriggerRow>, StoreError> {
        let rows = sqlx::query_as::<_, WorkflowTriggerRow>(&format!(
            r#"
            SELECT {TRIGGER_COLUMNS} FROM workflow_triggers
            WHERE enabled = TRUE AND trigger_type = $1
            ORDER BY created_at ASC
            "#,
        ))
        .bind(trigger_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create_execution(
        &self,
        input: CreateExecution,
    ) -> Result<WorkflowExecutionRow, StoreError> {
        let row = sqlx::query_as::<_, WorkflowExecutionRow>(&format!(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, execution_id, status, retry_count,
                 parent_execution_id, trigger_type, trigger_data)
            VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7)
            RETURNING {EXECUTION_COLUMNS}
            "#,
        ))
        .bind(Uuid::now_v7())
        .bind(input.workflow_id)
        .bind(&input.execution_id)
        .bind(input.retry_count)
        .bind(input.parent_execution_id)
        .bind(input.trigger_type)
        .bind(&input.trigger_data)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecutionRow, StoreError> {
        sqlx::query_as::<_, WorkflowExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("execution {id}")))
    }

    async fn get_execution_by_key(
        &self,
        execution_id: &str,
    ) -> Result<Option<WorkflowExecutionRow>, StoreError> {
        let row = sqlx::query_as::<_, WorkflowExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE execution_id = $1"
        ))
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn recent_execution_exists(
        &self,
        execution_id: &str,
        window: Duration,
    ) -> Result<bool, StoreError> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM workflow_executions
                WHERE execution_id = $1
                  AND started_at > NOW() - ($2 * INTERVAL '1 second')
            )
            "#,
        )
        .bind(execution_id)
        .bind(window.as_secs() as f64)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists.0)
    }

    async fn update_execution_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        result: Option<Value>,
        error_message: Option<String>,
    ) -> Result<WorkflowExecutionRow, StoreError> {
        // The WHERE clause is the terminal guard: a row already in a
        // terminal status matches nothing and the update is rejected.
        let row = sqlx::query_as::<_, WorkflowExecutionRow>(&format!(
            r#"
            UPDATE workflow_executions
            SET
                status = $2,
                result = COALESCE($3, result),
                error_message = COALESCE($4, error_message),
                completed_at = CASE
                    WHEN $2 IN ('completed', 'failed', 'timeout', 'cancelled')
                    THEN GREATEST(NOW(), started_at)
                    ELSE completed_at
                END
            WHERE id = $1
              AND status NOT IN ('completed', 'failed', 'timeout', 'cancelled')
            RETURNING {EXECUTION_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(status)
        .bind(&result)
        .bind(&error_message)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row),
            None => {
                // Distinguish "missing" from "already terminal"
                let current = self.get_execution(id).await?;
                Err(StoreError::conflict(format!(
                    "execution {id} is already terminal ({})",
                    current.status
                )))
            }
        }
    }

    async fn count_running_executions(&self, workflow_id: Uuid) -> Result<u64, StoreError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM workflow_executions WHERE workflow_id = $1 AND status = 'running'",
        )
        .bind(workflow_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0 as u64)
    }

    async fn list_executions(
        &self,
        workflow_id: Uuid,
        status: Option<ExecutionStatus>,
        limit: i64,
    ) -> Result<Vec<WorkflowExecutionRow>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, WorkflowExecutionRow>(&format!(
                    r#"
                    SELECT {EXECUTION_COLUMNS} FROM workflow_executions
                    WHERE workflow_id = $1 AND status = $2
                    ORDER BY started_at DESC LIMIT $3
                    "#,
                ))
                .bind(workflow_id)
                .bind(status)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, WorkflowExecutionRow>(&format!(
                    r#"
                    SELECT {EXECUTION_COLUMNS} FROM workflow_executions
                    WHERE workflow_id = $1
                    ORDER BY started_at DESC LIMIT $2
                    "#,
                ))
                .bind(workflow_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn append_log(&self, input: CreateLog) -> Result<ExecutionLogRow, StoreError> {
        let row = sqlx::query_as::<_, ExecutionLogRow>(&format!(
            r#"
            INSERT INTO execution_logs
                (id, execution_id, level, message, metadata, action_id, step_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {LOG_COLUMNS}
            "#,
        ))
        .bind(Uuid::now_v7())
        .bind(input.execution_id)
        .bind(input.level)
        .bind(&input.message)
        .bind(&input.metadata)
        .bind(input.action_id)
        .bind(&input.step_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<ExecutionLogRow>, StoreError> {
        let rows = sqlx::query_as::<_, ExecutionLogRow>(&format!(
            "SELECT {LOG_COLUMNS} FROM execution_logs WHERE execution_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create_integration(
        &self,
        input: CreateIntegration,
    ) -> Result<IntegrationRow, StoreError> {
        let row = sqlx::query_as::<_, IntegrationRow>(&format!(
            r#"
            INSERT INTO integrations
                (id, name, integration_type, config, enabled, credentials_encrypted)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {INTEGRATION_COLUMNS}
            "#,
        ))
        .bind(Uuid::now_v7())
        .bind(&input.name)
        .bind(&input.integration_type)
        .bind(&input.config)
        .bind(input.enabled)
        .bind(&input.credentials_encrypted)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_integration(&self, id: Uuid) -> Result<IntegrationRow, StoreError> {
        sqlx::query_as::<_, IntegrationRow>(&format!(
            "SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("integration {id}")))
    }

    async fn list_integrations(
        &self,
        enabled_only: bool,
    ) -> Result<Vec<IntegrationRow>, StoreError> {
        let rows = if enabled_only {
            sqlx::query_as::<_, IntegrationRow>(&format!(
                "SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE enabled = TRUE ORDER BY created_at DESC"
            ))
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, IntegrationRow>(&format!(
                "SELECT {INTEGRATION_COLUMNS} FROM integrations ORDER BY created_at DESC"
            ))
            .fetch_all(&self.pool)
            .await?
        };
        Ok(rows)
    }

    async fn record_integration_health(
        &self,
        id: Uuid,
        status: HealthStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE integrations
            SET health_status = $2, last_health_check = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("integration {id}")));
        }
        Ok(())
    }

    async fn create_integration_event(
        &self,
        input: CreateIntegrationEvent,
    ) -> Result<IntegrationEventRow, StoreError> {
        let row = sqlx::query_as::<_, IntegrationEventRow>(&format!(
            r#"
            INSERT INTO integration_events (id, integration_id, event_type, event_id, payload)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {INTEGRATION_EVENT_COLUMNS}
            "#,
        ))
        .bind(Uuid::now_v7())
        .bind(input.integration_id)
        .bind(&input.event_type)
        .bind(&input.event_id)
        .bind(&input.payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_integration_event_status(
        &self,
        id: Uuid,
        status: EventStatus,
        error_message: Option<String>,
    ) -> Result<IntegrationEventRow, StoreError> {
        sqlx::query_as::<_, IntegrationEventRow>(&format!(
            r#"
            UPDATE integration_events
            SET
                status = $2,
                error_message = COALESCE($3, error_message),
                processed_at = CASE
                    WHEN $2 IN ('completed', 'failed', 'ignored') THEN NOW()
                    ELSE processed_at
                END
            WHERE id = $1
            RETURNING {INTEGRATION_EVENT_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(status)
        .bind(&error_message)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("integration event {id}")))
    }

    async fn list_pending_integration_events(
        &self,
        limit: i64,
    ) -> Result<Vec<IntegrationEventRow>, StoreError> {
        let rows = sqlx::query_as::<_, IntegrationEventRow>(&format!(
            r#"
            SELECT {INTEGRATION_EVENT_COLUMNS} FROM integration_events
            WHERE status IN ('pending', 'processing')
            ORDER BY created_at ASC LIMIT $1
            "#,
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_commenter(
        &self,
        username: &str,
    ) -> Result<Option<AllowedCommenterRow>, StoreError> {
        let row = sqlx::query_as::<_, AllowedCommenterRow>(&format!(
            "SELECT {COMMENTER_COLUMNS} FROM allowed_commenters WHERE external_username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn upsert_commenter(
        &self,
        input: UpsertCommenter,
    ) -> Result<AllowedCommenterRow, StoreError> {
        let row = sqlx::query_as::<_, AllowedCommenterRow>(&format!(
            r#"
            INSERT INTO allowed_commenters
                (id, external_username, external_user_id, enabled, added_by, notes)
            VALUES ($1, $2, $3, TRUE, $4, $5)
            ON CONFLICT (external_username) DO UPDATE SET
                external_user_id = COALESCE(EXCLUDED.external_user_id, allowed_commenters.external_user_id),
                notes = COALESCE(EXCLUDED.notes, allowed_commenters.notes),
                enabled = TRUE,
                updated_at = NOW()
            RETURNING {COMMENTER_COLUMNS}
            "#,
        ))
        .bind(Uuid::now_v7())
        .bind(&input.external_username)
        .bind(input.external_user_id)
        .bind(&input.added_by)
        .bind(&input.notes)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn disable_commenter(&self, username: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE allowed_commenters SET enabled = FALSE, updated_at = NOW() WHERE external_username = $1",
        )
        .bind(username)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_commenter_activity(
        &self,
        username: &str,
        increment: bool,
    ) -> Result<Option<AllowedCommenterRow>, StoreError> {
        let row = sqlx::query_as::<_, AllowedCommenterRow>(&format!(
            r#"
            UPDATE allowed_commenters
            SET
                last_comment_at = NOW(),
                comment_count = comment_count + CASE WHEN $2 THEN 1 ELSE 0 END,
                updated_at = NOW()
            WHERE external_username = $1
            RETURNING {COMMENTER_COLUMNS}
            "#,
        ))
        .bind(username)
        .bind(increment)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_commenters(
        &self,
        enabled_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AllowedCommenterRow>, StoreError> {
        let rows = if enabled_only {
            sqlx::query_as::<_, AllowedCommenterRow>(&format!(
                r#"
                SELECT {COMMENTER_COLUMNS} FROM allowed_commenters
                WHERE enabled = TRUE
                ORDER BY created_at DESC LIMIT $1 OFFSET $2
                "#,
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, AllowedCommenterRow>(&format!(
                r#"
                SELECT {COMMENTER_COLUMNS} FROM allowed_commenters
                ORDER BY created_at DESC LIMIT $1 OFFSET $2
                "#,
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        };
        Ok(rows)
    }

    async fn get_filter_settings(
        &self,
    ) -> Result<Option<CommentFilterSettingsRow>, StoreError> {
        let row = sqlx::query_as::<_, CommentFilterSettingsRow>(&format!(
            "SELECT {SETTINGS_COLUMNS} FROM comment_filter_settings LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_filter_settings(
        &self,
        input: UpdateFilterSettings,
    ) -> Result<CommentFilterSettingsRow, StoreError> {
        // Singleton row, created on first write
        if self.get_filter_settings().await?.is_none() {
            sqlx::query(
                r#"
                INSERT INTO comment_filter_settings (id, auto_reply_message)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(DEFAULT_AUTO_REPLY_MESSAGE)
            .execute(&self.pool)
            .await?;
        }

        let row = sqlx::query_as::<_, CommentFilterSettingsRow>(&format!(
            r#"
            UPDATE comment_filter_settings
            SET
                enabled = COALESCE($1, enabled),
                auto_add_commenters = COALESCE($2, auto_add_commenters),
                auto_reply_enabled = COALESCE($3, auto_reply_enabled),
                auto_reply_message = COALESCE($4, auto_reply_message),
                whitelist_mode = COALESCE($5, whitelist_mode),
                updated_at = NOW()
            RETURNING {SETTINGS_COLUMNS}
            "#,
        ))
        .bind(input.enabled)
        .bind(input.auto_add_commenters)
        .bind(input.auto_reply_enabled)
        .bind(&input.auto_reply_message)
        .bind(input.whitelist_mode)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn health(&self) -> StoreHealth {
        let reachable = sqlx::query("SELECT 1").execute(&self.pool).await.is_ok();
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;

        StoreHealth {
            status: if reachable {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            masked_url: self.masked_url.clone(),
            pool_size: self.pool_size,
            in_use: size.saturating_sub(idle),
            checked_in: idle,
            overflow: size.saturating_sub(self.pool_size).min(self.max_overflow),
        }
    }

    async fn drop_all(&self, environment: Environment) -> Result<(), StoreError> {
        if environment == Environment::Production {
            return Err(StoreError::OperationForbidden(
                "drop_all is forbidden in production".to_string(),
            ));
        }

        tracing::warn!("dropping all data");
        sqlx::query(
            r#"
            TRUNCATE workflows, workflow_actions, workflow_triggers, workflow_executions,
                     execution_logs, integrations, integration_events,
                     allowed_commenters, comment_filter_settings
            CASCADE
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

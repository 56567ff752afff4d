//! Workflow execution engine
//!
//! Drives one execution at a time: loads the workflow's actions in
//! order, runs each under a deadline and cancellation token, writes
//! execution logs, and moves the execution through its status machine.
//!
//! ```text
//!  pending ─► running ─► completed
//!                  │
//!                  ├─► failed     (denied, non-retriable error, retries exhausted)
//!                  ├─► timeout    (deadline exceeded)
//!                  └─► cancelled  (cancellation signalled)
//! ```
//!
//! Terminal rows are immutable; the whole-execution retry edge inserts a
//! child row linked through `parent_execution_id`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use reviewflow_core::{sanitize, Condition, Error, Result};
use reviewflow_queue::{Priority, QueueBroker, WorkItem, WorkPayload};
use reviewflow_storage::{
    CreateExecution, CreateLog, ExecutionStatus, LogLevel, WorkflowActionRow,
    WorkflowExecutionRow, WorkflowRow, WorkflowStatus, WorkflowStore,
};

use crate::actions::{ActionContext, ActionOutcome, ActionRegistry};
use crate::authz::{AccessAuditLog, AuthorizationContext, Authorizer};
use crate::retry::RetryPolicy;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for an action with no timeout configured
    pub default_action_timeout: Duration,

    /// Hard ceiling on any deadline
    pub max_action_timeout: Duration,

    /// Per-action retry budget when the action config has none
    pub default_max_retries: u32,

    /// Per-workflow running-execution bound when the workflow config has none
    pub default_max_concurrent: u64,

    /// Error messages are truncated to this many characters before persisting
    pub error_message_limit: usize,

    /// Backoff between per-action retries
    pub retry_policy: RetryPolicy,

    /// Grace period after signalling cancellation before abandoning a handler
    pub cancel_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_action_timeout: Duration::from_secs(300),
            max_action_timeout: Duration::from_secs(3600),
            default_max_retries: 3,
            default_max_concurrent: 10,
            error_message_limit: 4096,
            retry_policy: RetryPolicy::exponential(),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// How a run ended, from the worker's perspective.
#[derive(Debug, Clone, PartialEq)]
pub enum RunDisposition {
    Completed,
    Failed { error: String },
    TimedOut,
    Cancelled,
    /// Per-workflow concurrency bound hit; the work item goes back to
    /// pending with lowered priority
    Deferred,
}

/// The execution engine.
pub struct ExecutionEngine {
    store: Arc<dyn WorkflowStore>,
    actions: Arc<ActionRegistry>,
    authorizer: Arc<dyn Authorizer>,
    audit: Arc<AccessAuditLog>,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        actions: Arc<ActionRegistry>,
        authorizer: Arc<dyn Authorizer>,
        audit: Arc<AccessAuditLog>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            actions,
            authorizer,
            audit,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    /// Run the execution identified by its external key.
    ///
    /// Idempotent over terminal rows: re-running a finished execution
    /// reports its recorded outcome without touching it.
    #[instrument(skip(self, cancel), fields(execution = %execution_key))]
    pub async fn run(
        &self,
        execution_key: &str,
        cancel: CancellationToken,
    ) -> Result<RunDisposition> {
        let execution = self
            .store
            .get_execution_by_key(execution_key)
            .await
            .map_err(Error::from)?
            .ok_or_else(|| Error::not_found(format!("execution {execution_key}")))?;

        if execution.status.is_terminal() {
            debug!(status = %execution.status, "execution already terminal");
            return Ok(disposition_for_terminal(&execution));
        }

        let workflow = self.store.get_workflow(execution.workflow_id).await?;
        if workflow.status != WorkflowStatus::Active {
            let message = format!("workflow '{}' is not active", workflow.name);
            return self.fail_execution(&execution, None, &message).await;
        }

        // Admission control happens before the pending -> running edge;
        // a reclaimed running execution re-enters without re-counting itself.
        if execution.status == ExecutionStatus::Pending {
            let limit = workflow
                .max_concurrent()
                .unwrap_or(self.config.default_max_concurrent);
            let running = self.store.count_running_executions(workflow.id).await?;
            if running >= limit {
                debug!(running, limit, "concurrency bound hit, deferring");
                return Ok(RunDisposition::Deferred);
            }

            self.store
                .update_execution_status(execution.id, ExecutionStatus::Running, None, None)
                .await?;
        }

        info!(workflow = %workflow.name, "executing workflow");
        self.run_actions(&workflow, &execution, cancel).await
    }

    /// Insert a child execution for a terminal parent and enqueue its
    /// work item. The parent row stays untouched.
    pub async fn retry_execution(
        &self,
        execution_pk: Uuid,
        queue: &dyn QueueBroker,
    ) -> Result<WorkflowExecutionRow> {
        let parent = self.store.get_execution(execution_pk).await?;
        if !parent.status.is_terminal() {
            return Err(Error::conflict(format!(
                "execution {execution_pk} is still {}; only terminal executions can be retried",
                parent.status
            )));
        }

        let retry_count = parent.retry_count + 1;
        let child = self
            .store
            .create_execution(CreateExecution {
                workflow_id: parent.workflow_id,
                execution_id: format!("{}#r{retry_count}", parent.execution_id),
                trigger_type: parent.trigger_type,
                trigger_data: parent.trigger_data.clone(),
                parent_execution_id: Some(parent.id),
                retry_count,
            })
            .await?;

        queue
            .enqueue(WorkItem::new(
                WorkPayload::Execution {
                    execution_id: child.execution_id.clone(),
                },
                Priority::Normal,
            ))
            .await?;

        info!(
            parent = %parent.execution_id,
            child = %child.execution_id,
            retry_count,
            "enqueued whole-execution retry"
        );
        Ok(child)
    }

    async fn run_actions(
        &self,
        workflow: &WorkflowRow,
        execution: &WorkflowExecutionRow,
        cancel: CancellationToken,
    ) -> Result<RunDisposition> {
        let actions = self.store.list_actions(workflow.id).await?;

        // Accumulated context: the trigger envelope under "trigger",
        // handler outputs merged at the root.
        let mut context = Map::new();
        context.insert(
            "trigger".to_string(),
            execution.trigger_data.clone().unwrap_or(Value::Null),
        );

        let execution_budget = workflow
            .timeout_secs()
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_action_timeout)
            .min(self.config.max_action_timeout);
        let execution_deadline = tokio::time::Instant::now() + execution_budget;

        for action in &actions {
            let context_value = Value::Object(context.clone());

            if !self.action_applies(action, &context_value, execution).await? {
                continue;
            }

            if !self.authorize_action(workflow, action, execution).await? {
                let message = format!(
                    "authorization denied for action '{}'",
                    action.action_name
                );
                return self.fail_execution(execution, Some(action), &message).await;
            }

            let deadline = self.action_deadline(workflow, action, execution_deadline);
            match self
                .run_single_action(action, context_value, deadline, &cancel, execution)
                .await?
            {
                ActionVerdict::Output(output) => {
                    if let Value::Object(fields) = output {
                        for (key, value) in fields {
                            context.insert(key, value);
                        }
                    }
                }
                ActionVerdict::ContinuePastError => {}
                ActionVerdict::Stop(disposition) => return Ok(disposition),
            }
        }

        context.remove("trigger");
        let result = Value::Object(context);
        self.store
            .update_execution_status(
                execution.id,
                ExecutionStatus::Completed,
                Some(result),
                None,
            )
            .await?;
        info!(execution = %execution.execution_id, "execution completed");
        Ok(RunDisposition::Completed)
    }

    /// Evaluate an action's conditions against the trigger envelope and
    /// accumulated context. Malformed condition documents skip the
    /// action with a warning rather than failing the execution.
    async fn action_applies(
        &self,
        action: &WorkflowActionRow,
        context: &Value,
        execution: &WorkflowExecutionRow,
    ) -> Result<bool> {
        let Some(conditions) = &action.conditions else {
            return Ok(true);
        };

        match Condition::from_value(conditions) {
            Ok(None) => Ok(true),
            Ok(Some(condition)) => {
                if condition.matches(context) {
                    Ok(true)
                } else {
                    self.store
                        .append_log(
                            CreateLog::new(
                                execution.id,
                                LogLevel::Debug,
                                format!("skipped '{}': conditions not met", action.action_name),
                            )
                            .for_action(action.id, &action.action_name),
                        )
                        .await?;
                    Ok(false)
                }
            }
            Err(err) => {
                warn!(action = %action.action_name, error = %err, "malformed action conditions");
                self.store
                    .append_log(
                        CreateLog::new(
                            execution.id,
                            LogLevel::Warning,
                            format!(
                                "skipped '{}': malformed conditions",
                                action.action_name
                            ),
                        )
                        .for_action(action.id, &action.action_name),
                    )
                    .await?;
                Ok(false)
            }
        }
    }

    async fn authorize_action(
        &self,
        workflow: &WorkflowRow,
        action: &WorkflowActionRow,
        execution: &WorkflowExecutionRow,
    ) -> Result<bool> {
        let actor = execution
            .trigger_data
            .as_ref()
            .and_then(|data| data.pointer("/payload/comment/user/login"))
            .and_then(Value::as_str)
            .unwrap_or("system")
            .to_string();

        let auth_context = AuthorizationContext {
            user_id: actor,
            roles: Vec::new(),
            permissions: Vec::new(),
            resource_type: "workflow".to_string(),
            resource_id: workflow.id.to_string(),
            action: action.action_type.clone(),
        };

        let granted = self.authorizer.authorize(&auth_context).await?;
        let reason = if granted {
            "policy allowed"
        } else {
            "policy denied"
        };
        self.audit.record(&auth_context, granted, reason);
        Ok(granted)
    }

    fn action_deadline(
        &self,
        workflow: &WorkflowRow,
        action: &WorkflowActionRow,
        execution_deadline: tokio::time::Instant,
    ) -> Duration {
        let action_timeout = action
            .timeout_secs()
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_action_timeout);
        let workflow_timeout = workflow
            .timeout_secs()
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_action_timeout);
        let remaining = execution_deadline
            .saturating_duration_since(tokio::time::Instant::now());

        action_timeout
            .min(workflow_timeout)
            .min(remaining)
            .min(self.config.max_action_timeout)
    }

    /// Run one action to a verdict, looping over retriable failures.
    async fn run_single_action(
        &self,
        action: &WorkflowActionRow,
        context: Value,
        deadline: Duration,
        cancel: &CancellationToken,
        execution: &WorkflowExecutionRow,
    ) -> Result<ActionVerdict> {
        let Some(handler) = self.actions.get(&action.action_type) else {
            let message = format!("no handler registered for '{}'", action.action_type);
            return self.action_failure(execution, action, &message).await;
        };

        let max_retries = action.max_retries().unwrap_or(self.config.default_max_retries);
        let mut retries = 0u32;

        loop {
            let outcome = self
                .invoke_with_deadline(
                    handler.clone(),
                    ActionContext::new(
                        action.config.clone(),
                        context.clone(),
                        cancel.child_token(),
                    ),
                    deadline,
                    cancel,
                )
                .await;

            match outcome {
                ActionOutcome::Ok(output) => {
                    self.store
                        .append_log(
                            CreateLog::new(
                                execution.id,
                                LogLevel::Info,
                                format!("action '{}' completed", action.action_name),
                            )
                            .for_action(action.id, &action.action_name),
                        )
                        .await?;
                    return Ok(ActionVerdict::Output(output));
                }

                ActionOutcome::Retry(reason) => {
                    retries += 1;
                    if retries <= max_retries {
                        let delay = self.config.retry_policy.delay_for_retry(retries);
                        warn!(
                            action = %action.action_name,
                            retries,
                            max_retries,
                            ?delay,
                            "retriable action failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    let message = format!(
                        "retries exhausted after {retries} attempts: {}",
                        sanitize(&reason)
                    );
                    return self
                        .action_failure(execution, action, &message)
                        .await;
                }

                ActionOutcome::Fail(reason) => {
                    return self
                        .action_failure(execution, action, &sanitize(&reason))
                        .await;
                }

                ActionOutcome::Timeout => {
                    self.store
                        .append_log(
                            CreateLog::new(
                                execution.id,
                                LogLevel::Error,
                                format!("action '{}' exceeded its deadline", action.action_name),
                            )
                            .for_action(action.id, &action.action_name),
                        )
                        .await?;
                    self.store
                        .update_execution_status(
                            execution.id,
                            ExecutionStatus::Timeout,
                            None,
                            Some(format!(
                                "action '{}' timed out after {deadline:?}",
                                action.action_name
                            )),
                        )
                        .await?;
                    return Ok(ActionVerdict::Stop(RunDisposition::TimedOut));
                }

                ActionOutcome::Cancelled => {
                    self.store
                        .append_log(
                            CreateLog::new(
                                execution.id,
                                LogLevel::Warning,
                                format!("action '{}' cancelled", action.action_name),
                            )
                            .for_action(action.id, &action.action_name),
                        )
                        .await?;
                    self.store
                        .update_execution_status(
                            execution.id,
                            ExecutionStatus::Cancelled,
                            None,
                            Some("cancellation signalled".to_string()),
                        )
                        .await?;
                    return Ok(ActionVerdict::Stop(RunDisposition::Cancelled));
                }
            }
        }
    }

    /// Invoke a handler under the deadline, signalling cancellation and
    /// granting the grace period before abandoning it.
    async fn invoke_with_deadline(
        &self,
        handler: Arc<dyn crate::actions::ActionHandler>,
        ctx: ActionContext,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> ActionOutcome {
        let child = ctx.cancel.clone();
        let mut handle = tokio::spawn(async move { handler.execute(ctx).await });

        tokio::select! {
            joined = &mut handle => match joined {
                Ok(outcome) => outcome,
                Err(err) => ActionOutcome::Fail(format!("handler panicked: {err}")),
            },
            _ = tokio::time::sleep(deadline) => {
                child.cancel();
                let _ = tokio::time::timeout(self.config.cancel_grace, &mut handle).await;
                ActionOutcome::Timeout
            }
            _ = cancel.cancelled() => {
                child.cancel();
                let _ = tokio::time::timeout(self.config.cancel_grace, &mut handle).await;
                ActionOutcome::Cancelled
            }
        }
    }

    /// Record an action failure; honour `continue_on_error`.
    async fn action_failure(
        &self,
        execution: &WorkflowExecutionRow,
        action: &WorkflowActionRow,
        message: &str,
    ) -> Result<ActionVerdict> {
        self.store
            .append_log(
                CreateLog::new(
                    execution.id,
                    LogLevel::Error,
                    format!("action '{}' failed: {message}", action.action_name),
                )
                .for_action(action.id, &action.action_name),
            )
            .await?;

        if action.continue_on_error() {
            warn!(action = %action.action_name, "continuing past failed action");
            return Ok(ActionVerdict::ContinuePastError);
        }

        let truncated = truncate_message(message, self.config.error_message_limit);
        self.store
            .update_execution_status(execution.id, ExecutionStatus::Failed, None, Some(truncated.clone()))
            .await?;
        Ok(ActionVerdict::Stop(RunDisposition::Failed { error: truncated }))
    }

    /// Fail an execution outside the per-action path (denied, inactive
    /// workflow). Logs at ERROR with the action attributed when known.
    async fn fail_execution(
        &self,
        execution: &WorkflowExecutionRow,
        action: Option<&WorkflowActionRow>,
        message: &str,
    ) -> Result<RunDisposition> {
        let sanitized = truncate_message(&sanitize(message), self.config.error_message_limit);

        let mut log = CreateLog::new(execution.id, LogLevel::Error, sanitized.clone());
        if let Some(action) = action {
            log = log.for_action(action.id, &action.action_name);
        }
        self.store.append_log(log).await?;

        // A pending execution moves straight to failed
        self.store
            .update_execution_status(
                execution.id,
                ExecutionStatus::Failed,
                None,
                Some(sanitized.clone()),
            )
            .await?;
        Ok(RunDisposition::Failed { error: sanitized })
    }
}

/// Verdict of a single action within the loop.
enum ActionVerdict {
    /// Success; merge this output into the context
    Output(Value),
    /// Failed, but the action is marked continue_on_error
    ContinuePastError,
    /// Stop the execution with this disposition
    Stop(RunDisposition),
}

fn disposition_for_terminal(execution: &WorkflowExecutionRow) -> RunDisposition {
    match execution.status {
        ExecutionStatus::Completed => RunDisposition::Completed,
        ExecutionStatus::Timeout => RunDisposition::TimedOut,
        ExecutionStatus::Cancelled => RunDisposition::Cancelled,
        _ => RunDisposition::Failed {
            error: execution
                .error_message
                .clone()
                .unwrap_or_else(|| "previously failed".to_string()),
        },
    }
}

/// Truncate on a character boundary.
fn truncate_message(message: &str, limit: usize) -> String {
    if message.chars().count() <= limit {
        message.to_string()
    } else {
        message.chars().take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("short", 10), "short");
        assert_eq!(truncate_message("0123456789abc", 10), "0123456789");
        // Multi-byte characters truncate on a boundary
        let truncated = truncate_message("日本語のメッセージ", 3);
        assert_eq!(truncated, "日本語");
    }

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_action_timeout, Duration::from_secs(300));
        assert_eq!(config.max_action_timeout, Duration::from_secs(3600));
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.default_max_concurrent, 10);
        assert_eq!(config.error_message_limit, 4096);
        assert_eq!(config.cancel_grace, Duration::from_secs(5));
    }
}

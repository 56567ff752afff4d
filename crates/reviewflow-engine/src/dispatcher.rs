// Event dispatcher
//
// Consumes trigger records from the queue, resolves matching workflow
// triggers, creates execution rows (deduplicated per external event),
// and enqueues per-execution work items. A failing trigger never stops
// its peers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use reviewflow_core::{Condition, EventEnvelope, Result};
use reviewflow_queue::{Priority, QueueBroker, WorkItem, WorkPayload};
use reviewflow_storage::{
    CreateExecution, EventStatus, StoreError, TriggerType, WorkflowRow, WorkflowStatus,
    WorkflowStore, WorkflowTriggerRow,
};

/// Dedup window: one execution per external event within this span.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome counts of dispatching one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub matched_triggers: usize,
    pub executions_created: usize,
    pub duplicates_skipped: usize,
    pub trigger_errors: usize,
}

/// Matches events against workflow triggers and spawns executions.
pub struct Dispatcher {
    store: Arc<dyn WorkflowStore>,
    queue: Arc<dyn QueueBroker>,
    dedup_window: Duration,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn WorkflowStore>, queue: Arc<dyn QueueBroker>) -> Self {
        Self {
            store,
            queue,
            dedup_window: DEDUP_WINDOW,
        }
    }

    /// Override the dedup window (tests use short windows)
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Dispatch one event: match triggers, create executions, enqueue
    /// work items, and settle the integration-event ledger row.
    #[instrument(skip(self, envelope), fields(event_type = %envelope.event_type))]
    pub async fn dispatch_event(
        &self,
        envelope: &EventEnvelope,
        integration_event_id: Option<Uuid>,
    ) -> Result<DispatchSummary> {
        if let Some(event_id) = integration_event_id {
            self.store
                .update_integration_event_status(event_id, EventStatus::Processing, None)
                .await?;
        }

        let summary = self.dispatch_inner(envelope).await;

        if let Some(event_id) = integration_event_id {
            let (status, error) = match &summary {
                Ok(summary) if summary.executions_created > 0 || summary.duplicates_skipped > 0 => {
                    (EventStatus::Completed, None)
                }
                Ok(summary) if summary.matched_triggers == 0 => (EventStatus::Ignored, None),
                Ok(_) => (
                    EventStatus::Failed,
                    Some("no execution created for matched triggers".to_string()),
                ),
                Err(err) => (EventStatus::Failed, Some(err.to_string())),
            };
            self.store
                .update_integration_event_status(event_id, status, error)
                .await?;
        }

        summary
    }

    async fn dispatch_inner(&self, envelope: &EventEnvelope) -> Result<DispatchSummary> {
        let mut summary = DispatchSummary::default();
        let document = envelope.as_document();

        // Webhook-delivered events satisfy both webhook and event triggers
        let mut triggers = self
            .store
            .list_enabled_triggers(TriggerType::Webhook)
            .await?;
        triggers.extend(self.store.list_enabled_triggers(TriggerType::Event).await?);

        for trigger in triggers {
            match self.evaluate_trigger(&trigger, &document) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(err) => {
                    warn!(
                        trigger = %trigger.id,
                        error = %err,
                        "trigger evaluation failed, continuing with peers"
                    );
                    summary.trigger_errors += 1;
                    continue;
                }
            }
            let workflow = match self.store.get_workflow(trigger.workflow_id).await {
                Ok(workflow) => workflow,
                Err(err) => {
                    warn!(trigger = %trigger.id, error = %err, "trigger has no workflow");
                    summary.trigger_errors += 1;
                    continue;
                }
            };
            if workflow.status != WorkflowStatus::Active {
                debug!(workflow = %workflow.name, "skipping trigger of inactive workflow");
                continue;
            }
            summary.matched_triggers += 1;

            match self.spawn_execution(&trigger, &workflow, envelope).await {
                Ok(Some(_)) => summary.executions_created += 1,
                Ok(None) => summary.duplicates_skipped += 1,
                Err(err) => {
                    warn!(
                        trigger = %trigger.id,
                        error = %err,
                        "failed to create execution, continuing with peers"
                    );
                    summary.trigger_errors += 1;
                }
            }
        }

        info!(
            matched = summary.matched_triggers,
            created = summary.executions_created,
            duplicates = summary.duplicates_skipped,
            errors = summary.trigger_errors,
            "event dispatched"
        );
        Ok(summary)
    }

    fn evaluate_trigger(
        &self,
        trigger: &WorkflowTriggerRow,
        document: &Value,
    ) -> Result<bool> {
        Ok(match Condition::from_value(&trigger.conditions)? {
            None => true,
            Some(condition) => condition.matches(document),
        })
    }

    /// Create the execution for a matched trigger, enforcing
    /// at-most-once per external event via the dedup key.
    async fn spawn_execution(
        &self,
        trigger: &WorkflowTriggerRow,
        workflow: &WorkflowRow,
        envelope: &EventEnvelope,
    ) -> Result<Option<String>> {
        let execution_key = match envelope.dedup_key() {
            Some(key) => {
                if self
                    .store
                    .recent_execution_exists(&key, self.dedup_window)
                    .await?
                {
                    warn!(
                        dedup_key = %key,
                        "duplicate event_id within dedup window, skipping"
                    );
                    return Ok(None);
                }
                key
            }
            // No vendor event id: nothing to dedup against
            None => Uuid::now_v7().to_string(),
        };

        let execution = match self
            .store
            .create_execution(CreateExecution {
                workflow_id: workflow.id,
                execution_id: execution_key,
                trigger_type: Some(trigger.trigger_type),
                trigger_data: Some(envelope.as_document()),
                parent_execution_id: None,
                retry_count: 0,
            })
            .await
        {
            Ok(execution) => execution,
            // A concurrent dispatcher won the atomic insert
            Err(StoreError::Conflict(_)) => {
                warn!("duplicate event_id within dedup window, skipping");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let priority = workflow.priority().unwrap_or(Priority::Normal.value());
        self.queue
            .enqueue(
                WorkItem::new(
                    WorkPayload::Execution {
                        execution_id: execution.execution_id.clone(),
                    },
                    Priority::Normal,
                )
                .with_priority_value(priority),
            )
            .await?;

        debug!(
            execution = %execution.execution_id,
            workflow = %workflow.name,
            priority,
            "execution enqueued"
        );
        Ok(Some(execution.execution_id))
    }
}

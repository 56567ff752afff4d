//! Worker pool
//!
//! Claims work items from the broker and drives them through the
//! dispatcher (trigger records), the execution engine (execution
//! items), or the outbound client (auto-reply side effects). Bounded
//! concurrency via a semaphore, graceful shutdown via a cancellation
//! token, and a background reclaim task for abandoned items.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use reviewflow_core::sanitize;
use reviewflow_engine::{Dispatcher, ExecutionEngine, RunDisposition};
use reviewflow_queue::{QueueBroker, WorkItem, WorkPayload, WorkResult};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent item executions
    pub max_concurrency: usize,

    /// How long one dequeue call waits for an item
    pub dequeue_timeout: Duration,

    /// Interval between worker heartbeats
    pub heartbeat_interval: Duration,

    /// Interval between stale-item reclaim scans
    pub reclaim_interval: Duration,

    /// Age after which a processing item is considered abandoned
    pub stale_timeout: Duration,

    /// How long shutdown waits for in-flight items to drain
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            dequeue_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(60),
            reclaim_interval: Duration::from_secs(60),
            stale_timeout: Duration::from_secs(30 * 60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = timeout;
        self
    }
}

/// Worker pool.
pub struct WorkerPool {
    broker: Arc<dyn QueueBroker>,
    engine: Arc<ExecutionEngine>,
    dispatcher: Arc<Dispatcher>,
    client: reqwest::Client,
    config: WorkerConfig,
    slots: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        broker: Arc<dyn QueueBroker>,
        engine: Arc<ExecutionEngine>,
        dispatcher: Arc<Dispatcher>,
        config: WorkerConfig,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrency));
        Self {
            broker,
            engine,
            dispatcher,
            client: reqwest::Client::new(),
            config,
            slots,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the pool when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until shutdown is signalled, then drain in-flight items.
    pub async fn run(self: Arc<Self>) {
        info!(
            worker_id = self.broker.worker_id(),
            max_concurrency = self.config.max_concurrency,
            "worker pool starting"
        );

        let reclaim_handle = self.clone().spawn_reclaim_task();

        if let Err(err) = self.broker.heartbeat().await {
            warn!(error = %err, "initial heartbeat failed");
        }
        let mut last_heartbeat = tokio::time::Instant::now();
        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

        while !self.shutdown.is_cancelled() {
            if last_heartbeat.elapsed() >= self.config.heartbeat_interval {
                if let Err(err) = self.broker.heartbeat().await {
                    warn!(error = %err, "heartbeat failed");
                }
                last_heartbeat = tokio::time::Instant::now();
            }

            in_flight.retain(|handle| !handle.is_finished());

            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let item = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                item = self.broker.dequeue(self.config.dequeue_timeout) => item,
            };

            match item {
                Ok(Some(item)) => {
                    let pool = self.clone();
                    in_flight.push(tokio::spawn(async move {
                        pool.process_item(item).await;
                        drop(permit);
                    }));
                }
                Ok(None) => drop(permit),
                Err(err) => {
                    drop(permit);
                    warn!(error = %err, "dequeue failed, backing off");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    }
                }
            }
        }

        reclaim_handle.abort();
        self.drain(in_flight).await;
        info!("worker pool stopped");
    }

    async fn drain(&self, in_flight: Vec<JoinHandle<()>>) {
        if in_flight.is_empty() {
            return;
        }
        info!(count = in_flight.len(), "draining in-flight items");
        let drain_all = async {
            for handle in in_flight {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout, drain_all)
            .await
            .is_err()
        {
            warn!("shutdown drain timed out, abandoning remaining items to the reclaim path");
        }
    }

    fn spawn_reclaim_task(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.reclaim_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.broker.reclaim_stale(self.config.stale_timeout).await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "reclaimed stale items"),
                    Err(err) => warn!(error = %err, "stale reclaim failed"),
                }
            }
        })
    }

    /// Process one claimed item and settle it with the broker.
    async fn process_item(&self, item: WorkItem) {
        debug!(item_id = %item.id, key = %item.execution_id, "processing item");

        match item.payload.clone() {
            WorkPayload::Event {
                envelope,
                integration_event_id,
            } => {
                match self
                    .dispatcher
                    .dispatch_event(&envelope, integration_event_id)
                    .await
                {
                    Ok(summary) => {
                        let output = serde_json::json!({
                            "matched_triggers": summary.matched_triggers,
                            "executions_created": summary.executions_created,
                            "duplicates_skipped": summary.duplicates_skipped,
                        });
                        self.settle_success(&item, Some(output)).await;
                    }
                    Err(err) => self.settle_failure(item, &err.to_string()).await,
                }
            }

            WorkPayload::Execution { execution_id } => {
                let cancel = self.shutdown.child_token();
                match self.engine.run(&execution_id, cancel).await {
                    Ok(RunDisposition::Completed) => self.settle_success(&item, None).await,
                    Ok(RunDisposition::Deferred) => self.requeue_deferred(item).await,
                    Ok(RunDisposition::Failed { error }) => {
                        self.settle_failure(item, &error).await
                    }
                    Ok(RunDisposition::TimedOut) => {
                        self.settle_failure(item, "execution timed out").await
                    }
                    Ok(RunDisposition::Cancelled) => {
                        self.settle_failure(item, "execution cancelled").await
                    }
                    Err(err) => self.settle_failure(item, &err.to_string()).await,
                }
            }

            WorkPayload::AutoReply {
                username,
                message,
                comment_url,
                ..
            } => match comment_url {
                Some(url) => {
                    let outcome = self
                        .client
                        .post(&url)
                        .json(&serde_json::json!({ "body": message }))
                        .send()
                        .await;
                    match outcome {
                        Ok(response) if response.status().is_success() => {
                            info!(username, "auto-reply posted");
                            self.settle_success(&item, None).await;
                        }
                        Ok(response) => {
                            self.settle_failure(
                                item,
                                &format!("auto-reply rejected: HTTP {}", response.status()),
                            )
                            .await
                        }
                        Err(err) => self.settle_failure(item, &err.to_string()).await,
                    }
                }
                None => {
                    // Nothing to address the reply to; record and move on
                    info!(username, "auto-reply had no comment URL, dropping");
                    self.settle_success(&item, None).await;
                }
            },
        }
    }

    async fn settle_success(&self, item: &WorkItem, output: Option<serde_json::Value>) {
        let result = WorkResult::success(item.id, output).with_worker(self.broker.worker_id());
        if let Err(err) = self.broker.complete(item.id, result).await {
            error!(item_id = %item.id, error = %err, "failed to record completion");
        }
    }

    async fn settle_failure(&self, item: WorkItem, error: &str) {
        let sanitized = sanitize(error);
        let item_id = item.id;
        match self.broker.fail(item, &sanitized).await {
            Ok(outcome) => debug!(item_id = %item_id, ?outcome, "item failed"),
            Err(err) => error!(item_id = %item_id, error = %err, "failed to record failure"),
        }
    }

    /// Concurrency-deferred items go straight back to pending with the
    /// priority lowered one step, without consuming a retry.
    async fn requeue_deferred(&self, mut item: WorkItem) {
        item.assigned_worker = None;
        item.processing_started_at = None;
        item.priority = item.priority.saturating_sub(1).max(1);
        let item_id = item.id;
        if let Err(err) = self.broker.enqueue(item).await {
            error!(item_id = %item_id, error = %err, "failed to requeue deferred item");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewflow_engine::{
        AccessAuditLog, ActionRegistry, AllowAll, EngineConfig,
    };
    use reviewflow_queue::{InMemoryBroker, Priority};
    use reviewflow_storage::{
        CreateAction, CreateTrigger, CreateWorkflow, ExecutionStatus, InMemoryWorkflowStore,
        TriggerType, WorkflowStatus, WorkflowStore,
    };
    use serde_json::json;
    use uuid::Uuid;

    async fn pool_with_store() -> (Arc<WorkerPool>, Arc<InMemoryWorkflowStore>, Arc<InMemoryBroker>)
    {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let broker = Arc::new(InMemoryBroker::new("w-test"));
        let engine = Arc::new(ExecutionEngine::new(
            store.clone(),
            Arc::new(ActionRegistry::with_builtins(None)),
            Arc::new(AllowAll),
            Arc::new(AccessAuditLog::new()),
            EngineConfig::default(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), broker.clone()));
        let pool = Arc::new(WorkerPool::new(
            broker.clone(),
            engine,
            dispatcher,
            WorkerConfig::default().with_max_concurrency(2),
        ));
        (pool, store, broker)
    }

    #[tokio::test]
    async fn test_event_item_dispatches_and_execution_item_runs() {
        let (pool, store, broker) = pool_with_store().await;

        let workflow = store
            .create_workflow(CreateWorkflow {
                name: "review".to_string(),
                description: None,
                status: WorkflowStatus::Active,
                config: json!({}),
                created_by: None,
            })
            .await
            .unwrap();
        store
            .create_action(CreateAction {
                workflow_id: workflow.id,
                action_type: "echo".to_string(),
                action_name: "echo".to_string(),
                config: json!({}),
                order_index: 0,
                conditions: None,
            })
            .await
            .unwrap();
        store
            .create_trigger(CreateTrigger {
                workflow_id: workflow.id,
                trigger_type: TriggerType::Webhook,
                conditions: json!({}),
                enabled: true,
            })
            .await
            .unwrap();

        let envelope = reviewflow_core::EventEnvelope::new(
            Uuid::now_v7(),
            "comment_created",
            Some("e1".to_string()),
            json!({ "text": "hi" }),
        );
        let event_item = WorkItem::new(
            WorkPayload::Event {
                envelope,
                integration_event_id: None,
            },
            Priority::Normal,
        );
        let event_item_id = event_item.id;
        broker.enqueue(event_item).await.unwrap();

        // Process the trigger record; the dispatcher enqueues the
        // execution item behind it.
        let item = broker.dequeue(Duration::from_millis(50)).await.unwrap().unwrap();
        pool.process_item(item).await;
        assert!(broker.result(event_item_id).is_some());

        let item = broker.dequeue(Duration::from_millis(50)).await.unwrap().unwrap();
        let WorkPayload::Execution { execution_id } = item.payload.clone() else {
            panic!("expected execution item");
        };
        pool.process_item(item).await;

        let execution = store
            .get_execution_by_key(&execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_execution_fails_item() {
        let (pool, _store, broker) = pool_with_store().await;

        let item = WorkItem::new(
            WorkPayload::Execution {
                execution_id: "ghost".to_string(),
            },
            Priority::Normal,
        )
        .with_max_retries(0);
        broker.enqueue(item).await.unwrap();

        let item = broker.dequeue(Duration::from_millis(50)).await.unwrap().unwrap();
        let item_id = item.id;
        pool.process_item(item).await;

        // Exhausted immediately (max_retries = 0) and recorded as failed
        assert!(broker.failed_item(item_id).is_some());
    }

    #[tokio::test]
    async fn test_auto_reply_without_url_completes() {
        let (pool, _store, broker) = pool_with_store().await;

        let item = WorkItem::new(
            WorkPayload::AutoReply {
                integration_id: Uuid::now_v7(),
                username: "alice".to_string(),
                message: "welcome".to_string(),
                comment_url: None,
            },
            Priority::Low,
        );
        broker.enqueue(item).await.unwrap();

        let item = broker.dequeue(Duration::from_millis(50)).await.unwrap().unwrap();
        let item_id = item.id;
        pool.process_item(item).await;
        assert!(broker.result(item_id).is_some());
    }

    #[tokio::test]
    async fn test_pool_run_processes_and_shuts_down() {
        let (pool, store, broker) = pool_with_store().await;

        let workflow = store
            .create_workflow(CreateWorkflow {
                name: "loop-flow".to_string(),
                description: None,
                status: WorkflowStatus::Active,
                config: json!({}),
                created_by: None,
            })
            .await
            .unwrap();
        store
            .create_action(CreateAction {
                workflow_id: workflow.id,
                action_type: "echo".to_string(),
                action_name: "echo".to_string(),
                config: json!({}),
                order_index: 0,
                conditions: None,
            })
            .await
            .unwrap();
        store
            .create_execution(reviewflow_storage::CreateExecution {
                workflow_id: workflow.id,
                execution_id: "loop-run".to_string(),
                trigger_type: None,
                trigger_data: Some(json!({ "payload": { "text": "hi" } })),
                parent_execution_id: None,
                retry_count: 0,
            })
            .await
            .unwrap();
        broker
            .enqueue(WorkItem::new(
                WorkPayload::Execution {
                    execution_id: "loop-run".to_string(),
                },
                Priority::High,
            ))
            .await
            .unwrap();

        let shutdown = pool.shutdown_token();
        let runner = tokio::spawn(pool.clone().run());

        // Give the loop a moment to pick the item up, then stop
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .expect("pool should stop promptly")
            .unwrap();

        let execution = store
            .get_execution_by_key("loop-run")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }
}

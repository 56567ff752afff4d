//! In-memory broker for testing
//!
//! Same semantics as the Redis broker: priority-ordered pending queue,
//! processing/results/failed maps, heartbeats, stale reclaim.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::broker::{FailureOutcome, QueueBroker, QueueStats, WorkerStats};
use crate::error::QueueError;
use crate::item::{WorkItem, WorkResult};

#[derive(Default)]
struct Inner {
    /// Keyed by (negated priority, arrival sequence): iteration order is
    /// highest priority first, FIFO within a priority
    pending: BTreeMap<(i64, u64), WorkItem>,
    processing: HashMap<Uuid, WorkItem>,
    results: HashMap<Uuid, WorkResult>,
    failed: HashMap<Uuid, WorkItem>,
    heartbeats: HashMap<String, DateTime<Utc>>,
    sequence: u64,
}

/// In-memory queue broker used by unit and scenario tests.
pub struct InMemoryBroker {
    worker_id: String,
    inner: Mutex<Inner>,
    notify: Notify,
    processed_count: AtomicU64,
    failed_count: AtomicU64,
    started_at: Instant,
}

impl InMemoryBroker {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            processed_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    fn push_pending(inner: &mut Inner, item: WorkItem) {
        inner.sequence += 1;
        let key = (-(item.priority as i64), inner.sequence);
        inner.pending.insert(key, item);
    }

    fn pop_pending(&self) -> Option<WorkItem> {
        let mut inner = self.inner.lock();
        let key = *inner.pending.keys().next()?;
        let mut item = inner.pending.remove(&key)?;
        item.assigned_worker = Some(self.worker_id.clone());
        item.processing_started_at = Some(Utc::now());
        inner.processing.insert(item.id, item.clone());
        Some(item)
    }

    /// Failed-queue item by id (test helper)
    pub fn failed_item(&self, id: Uuid) -> Option<WorkItem> {
        self.inner.lock().failed.get(&id).cloned()
    }

    /// Result by item id (test helper)
    pub fn result(&self, id: Uuid) -> Option<WorkResult> {
        self.inner.lock().results.get(&id).cloned()
    }

    /// Force an item's processing start time back in time (test helper
    /// for reclaim scenarios)
    pub fn age_processing_item(&self, id: Uuid, age: Duration) {
        let mut inner = self.inner.lock();
        if let Some(item) = inner.processing.get_mut(&id) {
            item.processing_started_at =
                Some(Utc::now() - chrono::Duration::from_std(age).unwrap_or_default());
        }
    }
}

#[async_trait]
impl QueueBroker for InMemoryBroker {
    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        Self::push_pending(&mut inner, item);
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    async fn enqueue_batch(&self, items: Vec<WorkItem>) -> Result<usize, QueueError> {
        let count = items.len();
        let mut inner = self.inner.lock();
        for item in items {
            Self::push_pending(&mut inner, item);
        }
        drop(inner);
        for _ in 0..count {
            self.notify.notify_one();
        }
        Ok(count)
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<WorkItem>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = self.pop_pending() {
                return Ok(Some(item));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
            if Instant::now() >= deadline {
                // One last non-blocking check before giving up
                return Ok(self.pop_pending());
            }
        }
    }

    async fn complete(&self, item_id: Uuid, result: WorkResult) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        inner.processing.remove(&item_id);
        let success = result.success;
        inner.results.insert(item_id, result);
        drop(inner);

        if success {
            self.processed_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn fail(&self, mut item: WorkItem, error: &str) -> Result<FailureOutcome, QueueError> {
        let mut inner = self.inner.lock();
        inner.processing.remove(&item.id);

        if item.retries_remaining() {
            item.demote_for_retry();
            let retry_count = item.retry_count;
            Self::push_pending(&mut inner, item);
            drop(inner);
            self.notify.notify_one();
            return Ok(FailureOutcome::Requeued { retry_count });
        }

        tracing::warn!(
            item_id = %item.id,
            retries = item.retry_count,
            error,
            "item failed permanently"
        );
        inner.failed.insert(item.id, item);
        drop(inner);
        self.failed_count.fetch_add(1, Ordering::Relaxed);
        Ok(FailureOutcome::Failed)
    }

    async fn heartbeat(&self) -> Result<(), QueueError> {
        self.inner
            .lock()
            .heartbeats
            .insert(self.worker_id.clone(), Utc::now());
        Ok(())
    }

    async fn active_workers(&self, window: Duration) -> Result<Vec<String>, QueueError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        Ok(self
            .inner
            .lock()
            .heartbeats
            .iter()
            .filter(|(_, seen)| **seen > cutoff)
            .map(|(worker, _)| worker.clone())
            .collect())
    }

    async fn reclaim_stale(&self, timeout: Duration) -> Result<usize, QueueError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(timeout).unwrap_or_default();
        let mut inner = self.inner.lock();

        let stale_ids: Vec<Uuid> = inner
            .processing
            .values()
            .filter(|item| {
                item.processing_started_at
                    .is_some_and(|started| started < cutoff)
            })
            .map(|item| item.id)
            .collect();

        let count = stale_ids.len();
        for id in stale_ids {
            let Some(mut item) = inner.processing.remove(&id) else {
                continue;
            };
            item.demote_for_retry();
            if item.retry_count <= item.max_retries {
                Self::push_pending(&mut inner, item);
            } else {
                tracing::warn!(item_id = %id, "stale item exhausted retries");
                inner.failed.insert(id, item);
            }
        }
        drop(inner);

        for _ in 0..count {
            self.notify.notify_one();
        }
        Ok(count)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let active = self
            .active_workers(crate::broker::DEFAULT_HEARTBEAT_WINDOW)
            .await?;
        let inner = self.inner.lock();
        Ok(QueueStats {
            pending: inner.pending.len() as u64,
            processing: inner.processing.len() as u64,
            results: inner.results.len() as u64,
            failed: inner.failed.len() as u64,
            worker: WorkerStats {
                worker_id: self.worker_id.clone(),
                processed: self.processed_count.load(Ordering::Relaxed),
                failed: self.failed_count.load(Ordering::Relaxed),
                uptime_secs: self.started_at.elapsed().as_secs(),
            },
            active_workers: active,
        })
    }

    async fn clear_all(&self) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        inner.pending.clear();
        inner.processing.clear();
        inner.results.clear();
        inner.failed.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Priority, WorkPayload};

    fn execution_item(key: &str, priority: Priority) -> WorkItem {
        WorkItem::new(
            WorkPayload::Execution {
                execution_id: key.to_string(),
            },
            priority,
        )
    }

    #[tokio::test]
    async fn test_priority_order_then_fifo() {
        let broker = InMemoryBroker::new("w1");
        broker
            .enqueue(execution_item("low", Priority::Low))
            .await
            .unwrap();
        broker
            .enqueue(execution_item("normal-1", Priority::Normal))
            .await
            .unwrap();
        broker
            .enqueue(execution_item("critical", Priority::Critical))
            .await
            .unwrap();
        broker
            .enqueue(execution_item("normal-2", Priority::Normal))
            .await
            .unwrap();

        let mut order = Vec::new();
        for _ in 0..4 {
            let item = broker
                .dequeue(Duration::from_millis(10))
                .await
                .unwrap()
                .unwrap();
            order.push(item.execution_id);
        }

        assert_eq!(order, vec!["critical", "normal-1", "normal-2", "low"]);
    }

    #[tokio::test]
    async fn test_dequeue_stamps_assignment() {
        let broker = InMemoryBroker::new("w1");
        broker
            .enqueue(execution_item("run", Priority::Normal))
            .await
            .unwrap();

        let item = broker
            .dequeue(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.assigned_worker.as_deref(), Some("w1"));
        assert!(item.processing_started_at.is_some());

        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processing, 1);
    }

    #[tokio::test]
    async fn test_dequeue_timeout_returns_none() {
        let broker = InMemoryBroker::new("w1");
        let got = broker.dequeue(Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_fail_requeues_with_demoted_priority() {
        let broker = InMemoryBroker::new("w1");
        broker
            .enqueue(execution_item("run", Priority::Normal).with_max_retries(2))
            .await
            .unwrap();

        let item = broker
            .dequeue(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        let outcome = broker.fail(item, "transient").await.unwrap();
        assert_eq!(outcome, FailureOutcome::Requeued { retry_count: 1 });

        let retried = broker
            .dequeue(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.priority, 4);
    }

    #[tokio::test]
    async fn test_retry_bound_is_respected() {
        let broker = InMemoryBroker::new("w1");
        broker
            .enqueue(execution_item("run", Priority::Normal).with_max_retries(2))
            .await
            .unwrap();

        let mut outcomes = Vec::new();
        loop {
            let item = broker
                .dequeue(Duration::from_millis(10))
                .await
                .unwrap()
                .unwrap();
            let id = item.id;
            let outcome = broker.fail(item, "always fails").await.unwrap();
            let failed = outcome == FailureOutcome::Failed;
            outcomes.push(outcome);
            if failed {
                // No item ever reaches `failed` with retry_count > max_retries
                let failed_item = broker.failed_item(id).unwrap();
                assert_eq!(failed_item.retry_count, failed_item.max_retries);
                break;
            }
        }

        // Two requeues, then the terminal failure
        assert_eq!(outcomes.len(), 3);
        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processing, 0);
    }

    #[tokio::test]
    async fn test_complete_moves_to_results() {
        let broker = InMemoryBroker::new("w1");
        broker
            .enqueue(execution_item("run", Priority::Normal))
            .await
            .unwrap();
        let item = broker
            .dequeue(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        broker
            .complete(item.id, WorkResult::success(item.id, None))
            .await
            .unwrap();

        assert!(broker.result(item.id).is_some());
        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.results, 1);
        assert_eq!(stats.worker.processed, 1);
    }

    #[tokio::test]
    async fn test_reclaim_stale_requeues_item() {
        let broker = InMemoryBroker::new("w1");
        broker
            .enqueue(execution_item("run", Priority::Normal))
            .await
            .unwrap();
        let item = broker
            .dequeue(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        // Not yet stale
        assert_eq!(broker.reclaim_stale(Duration::from_secs(60)).await.unwrap(), 0);

        broker.age_processing_item(item.id, Duration::from_secs(120));
        assert_eq!(broker.reclaim_stale(Duration::from_secs(60)).await.unwrap(), 1);

        // The item is back in pending with a bumped retry count, not lost
        let reclaimed = broker
            .dequeue(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.id, item.id);
        assert_eq!(reclaimed.retry_count, 1);
        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_reclaim_exhausted_item_moves_to_failed() {
        let broker = InMemoryBroker::new("w1");
        broker
            .enqueue(execution_item("run", Priority::Normal).with_max_retries(0))
            .await
            .unwrap();
        let item = broker
            .dequeue(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        broker.age_processing_item(item.id, Duration::from_secs(120));

        assert_eq!(broker.reclaim_stale(Duration::from_secs(60)).await.unwrap(), 1);
        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_window() {
        let broker = InMemoryBroker::new("w1");
        broker.heartbeat().await.unwrap();

        let active = broker
            .active_workers(Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(active, vec!["w1".to_string()]);

        let active = broker.active_workers(Duration::ZERO).await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_batch() {
        let broker = InMemoryBroker::new("w1");
        let items = vec![
            execution_item("a", Priority::Normal),
            execution_item("b", Priority::Normal),
            execution_item("c", Priority::High),
        ];
        assert_eq!(broker.enqueue_batch(items).await.unwrap(), 3);
        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.pending, 3);
    }
}

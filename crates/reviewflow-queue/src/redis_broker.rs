// Redis implementation of QueueBroker
//
// Layout per namespace prefix:
//   {prefix}:pending      sorted set, score = priority desc then arrival asc
//   {prefix}:processing   hash id -> item json
//   {prefix}:results      hash id -> result json
//   {prefix}:failed       hash id -> item json (+ final_error, failed_at)
//   {prefix}:workers:heartbeat  hash worker_id -> unix seconds
//
// ConnectionManager reconnects with backoff on its own; operations that
// hit a dead connection surface QueueError::Unavailable and callers back
// off rather than blocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};
use uuid::Uuid;

use reviewflow_core::QueueConfig;

use crate::broker::{FailureOutcome, QueueBroker, QueueStats, WorkerStats};
use crate::error::QueueError;
use crate::item::{WorkItem, WorkResult};

/// Redis-backed queue broker.
pub struct RedisBroker {
    manager: ConnectionManager,
    worker_id: String,
    pending_key: String,
    processing_key: String,
    results_key: String,
    failed_key: String,
    heartbeat_key: String,
    processed_count: AtomicU64,
    failed_count: AtomicU64,
    started_at: Instant,
}

impl RedisBroker {
    /// Connect to the broker. Failure here means the queue is unavailable;
    /// the caller decides whether to retry or abort startup.
    pub async fn connect(config: &QueueConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(config.url.as_str())?;
        let manager = ConnectionManager::new(client).await?;
        info!(prefix = %config.prefix, "connected to queue broker");

        Ok(Self {
            manager,
            worker_id: config.worker_id.clone(),
            pending_key: format!("{}:pending", config.prefix),
            processing_key: format!("{}:processing", config.prefix),
            results_key: format!("{}:results", config.prefix),
            failed_key: format!("{}:failed", config.prefix),
            heartbeat_key: format!("{}:workers:heartbeat", config.prefix),
            processed_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
            started_at: Instant::now(),
        })
    }

    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Sorted-set score: priority dominates (higher pops first), arrival
    /// time breaks ties FIFO. ZPOPMIN order = ascending score, so the
    /// priority term is negated.
    fn score(item: &WorkItem) -> f64 {
        let priority_term = -(item.priority as i64) * 1_000_000_000_000_i64;
        priority_term as f64 + item.created_at.timestamp_millis() as f64
    }

    async fn push_pending(&self, item: &WorkItem) -> Result<(), QueueError> {
        let raw = serde_json::to_string(item)?;
        let mut con = self.connection();
        let _: () = con.zadd(&self.pending_key, raw, Self::score(item)).await?;
        Ok(())
    }
}

#[async_trait]
impl QueueBroker for RedisBroker {
    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        debug!(item_id = %item.id, priority = item.priority, "enqueue");
        self.push_pending(&item).await
    }

    async fn enqueue_batch(&self, items: Vec<WorkItem>) -> Result<usize, QueueError> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for item in &items {
            let raw = serde_json::to_string(item)?;
            pipe.zadd(&self.pending_key, raw, Self::score(item));
        }

        let mut con = self.connection();
        let _: () = pipe.query_async(&mut con).await?;
        Ok(items.len())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<WorkItem>, QueueError> {
        let mut con = self.connection();
        let popped: Option<(String, String, f64)> = con
            .bzpopmin(&self.pending_key, timeout.as_secs_f64())
            .await?;

        let Some((_key, raw, _score)) = popped else {
            return Ok(None);
        };

        let mut item: WorkItem = serde_json::from_str(&raw)?;
        item.assigned_worker = Some(self.worker_id.clone());
        item.processing_started_at = Some(Utc::now());

        let stamped = serde_json::to_string(&item)?;
        let _: () = con
            .hset(&self.processing_key, item.id.to_string(), stamped)
            .await?;
        Ok(Some(item))
    }

    async fn complete(&self, item_id: Uuid, result: WorkResult) -> Result<(), QueueError> {
        let raw = serde_json::to_string(&result)?;
        let mut con = self.connection();
        let _: () = con.hdel(&self.processing_key, item_id.to_string()).await?;
        let _: () = con.hset(&self.results_key, item_id.to_string(), raw).await?;

        if result.success {
            self.processed_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_count.fetch_add(1, Ordering::Relaxed);
        }
        debug!(item_id = %item_id, success = result.success, "completed item");
        Ok(())
    }

    async fn fail(&self, mut item: WorkItem, error: &str) -> Result<FailureOutcome, QueueError> {
        let mut con = self.connection();
        let _: () = con.hdel(&self.processing_key, item.id.to_string()).await?;

        if item.retries_remaining() {
            item.demote_for_retry();
            let retry_count = item.retry_count;
            self.push_pending(&item).await?;
            return Ok(FailureOutcome::Requeued { retry_count });
        }

        warn!(
            item_id = %item.id,
            retries = item.retry_count,
            "item failed permanently"
        );
        let mut record = serde_json::to_value(&item)?;
        record["final_error"] = serde_json::json!(error);
        record["failed_at"] = serde_json::json!(Utc::now());

        let _: () = con
            .hset(&self.failed_key, item.id.to_string(), record.to_string())
            .await?;
        self.failed_count.fetch_add(1, Ordering::Relaxed);
        Ok(FailureOutcome::Failed)
    }

    async fn heartbeat(&self) -> Result<(), QueueError> {
        let mut con = self.connection();
        let _: () = con
            .hset(&self.heartbeat_key, &self.worker_id, Utc::now().timestamp())
            .await?;
        Ok(())
    }

    async fn active_workers(&self, window: Duration) -> Result<Vec<String>, QueueError> {
        let cutoff = Utc::now().timestamp() - window.as_secs() as i64;
        let mut con = self.connection();
        let entries: Vec<(String, i64)> = con.hgetall(&self.heartbeat_key).await?;
        Ok(entries
            .into_iter()
            .filter(|(_, seen)| *seen > cutoff)
            .map(|(worker, _)| worker)
            .collect())
    }

    async fn reclaim_stale(&self, timeout: Duration) -> Result<usize, QueueError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(timeout).unwrap_or_default();
        let mut con = self.connection();
        let entries: Vec<(String, String)> = con.hgetall(&self.processing_key).await?;

        let mut reclaimed = 0;
        for (id, raw) in entries {
            let Ok(mut item) = serde_json::from_str::<WorkItem>(&raw) else {
                warn!(item_id = %id, "dropping unparseable processing entry");
                let _: () = con.hdel(&self.processing_key, &id).await?;
                continue;
            };

            let stale = item
                .processing_started_at
                .is_some_and(|started| started < cutoff);
            if !stale {
                continue;
            }

            let _: () = con.hdel(&self.processing_key, &id).await?;
            item.demote_for_retry();
            if item.retry_count <= item.max_retries {
                self.push_pending(&item).await?;
            } else {
                let mut record = serde_json::to_value(&item)?;
                record["final_error"] = serde_json::json!("processing timeout");
                record["failed_at"] = serde_json::json!(Utc::now());
                let _: () = con
                    .hset(&self.failed_key, item.id.to_string(), record.to_string())
                    .await?;
            }
            reclaimed += 1;
        }

        if reclaimed > 0 {
            info!(count = reclaimed, "reclaimed stale processing items");
        }
        Ok(reclaimed)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut con = self.connection();
        let pending: u64 = con.zcard(&self.pending_key).await?;
        let processing: u64 = con.hlen(&self.processing_key).await?;
        let results: u64 = con.hlen(&self.results_key).await?;
        let failed: u64 = con.hlen(&self.failed_key).await?;
        let active = self
            .active_workers(crate::broker::DEFAULT_HEARTBEAT_WINDOW)
            .await?;

        Ok(QueueStats {
            pending,
            processing,
            results,
            failed,
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
        let mut con = self.connection();
        let keys = vec![
            self.pending_key.clone(),
            self.processing_key.clone(),
            self.results_key.clone(),
            self.failed_key.clone(),
        ];
        let _: () = con.del(keys).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Priority, WorkPayload};

    fn item_with(priority: Priority, millis_ago: i64) -> WorkItem {
        let mut item = WorkItem::new(
            WorkPayload::Execution {
                execution_id: "run".to_string(),
            },
            priority,
        );
        item.created_at = Utc::now() - chrono::Duration::milliseconds(millis_ago);
        item
    }

    #[test]
    fn test_score_orders_priority_before_arrival() {
        // Higher priority pops first regardless of arrival
        let old_low = item_with(Priority::Low, 10_000);
        let new_critical = item_with(Priority::Critical, 0);
        assert!(RedisBroker::score(&new_critical) < RedisBroker::score(&old_low));

        // Same priority: earlier arrival pops first
        let earlier = item_with(Priority::Normal, 5_000);
        let later = item_with(Priority::Normal, 0);
        assert!(RedisBroker::score(&earlier) < RedisBroker::score(&later));
    }
}

// QueueBroker trait definition

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::QueueError;
use crate::item::{WorkItem, WorkResult};

/// Default window for considering a worker alive
pub const DEFAULT_HEARTBEAT_WINDOW: Duration = Duration::from_secs(300);

/// Default age after which a processing item is considered abandoned
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// What happened to a failed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Re-enqueued to pending with a bumped retry count
    Requeued { retry_count: u32 },

    /// Retries exhausted; recorded in the failed sub-queue
    Failed,
}

/// Worker-local processing counters.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub worker_id: String,
    pub processed: u64,
    pub failed: u64,
    pub uptime_secs: u64,
}

/// Counts of each sub-queue plus the local worker's counters.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub results: u64,
    pub failed: u64,
    pub worker: WorkerStats,
    pub active_workers: Vec<String>,
}

/// Brokers work items between producers and workers.
///
/// Implementations must be safe to share across tasks and must never
/// lose an item: everything popped from pending lands in processing, and
/// everything leaving processing lands in results, failed, or back in
/// pending.
#[async_trait]
pub trait QueueBroker: Send + Sync + 'static {
    /// This broker handle's worker identity
    fn worker_id(&self) -> &str;

    /// Add an item to pending. Score encodes priority (high first) and
    /// arrival order (FIFO within a priority).
    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError>;

    /// Atomic batch enqueue; returns the number enqueued
    async fn enqueue_batch(&self, items: Vec<WorkItem>) -> Result<usize, QueueError>;

    /// Pop the highest-priority pending item, stamping the worker
    /// assignment and moving it to processing. None on timeout.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<WorkItem>, QueueError>;

    /// Remove from processing and record the result
    async fn complete(&self, item_id: Uuid, result: WorkResult) -> Result<(), QueueError>;

    /// Remove from processing; requeue with demoted priority while
    /// retries remain, otherwise record in failed with the final error
    async fn fail(&self, item: WorkItem, error: &str) -> Result<FailureOutcome, QueueError>;

    /// Record this worker's liveness
    async fn heartbeat(&self) -> Result<(), QueueError>;

    /// Workers with a heartbeat within `window`
    async fn active_workers(&self, window: Duration) -> Result<Vec<String>, QueueError>;

    /// Re-enqueue (or fail) items stuck in processing longer than
    /// `timeout`. Returns the number reclaimed.
    async fn reclaim_stale(&self, timeout: Duration) -> Result<usize, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Remove everything from every sub-queue (test/debug helper)
    async fn clear_all(&self) -> Result<(), QueueError>;
}

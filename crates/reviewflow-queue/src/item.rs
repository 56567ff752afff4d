// Work item model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use reviewflow_core::EventEnvelope;

/// Priority levels for queue items. Within a level, FIFO by arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn value(self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Normal => 5,
            Priority::High => 8,
            Priority::Critical => 10,
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> u8 {
        priority.value()
    }
}

/// What a work item asks a worker to do.
///
/// Trigger records, execution work items, and outbound side effects all
/// ride the same queue; the tag tells the worker which path to take.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkPayload {
    /// A verified external event awaiting dispatch. Carries the ledger
    /// row id so the dispatcher can settle it.
    Event {
        envelope: EventEnvelope,
        integration_event_id: Option<Uuid>,
    },

    /// A created execution awaiting a run
    Execution { execution_id: String },

    /// An outbound auto-reply to post on the code host
    AutoReply {
        integration_id: Uuid,
        username: String,
        message: String,
        comment_url: Option<String>,
    },
}

impl WorkPayload {
    /// Stable key identifying the unit of work, used for tracing and as
    /// the item's `execution_id` field
    pub fn work_key(&self) -> String {
        match self {
            WorkPayload::Event { envelope, .. } => envelope
                .dedup_key()
                .unwrap_or_else(|| format!("event:{}", envelope.integration_id)),
            WorkPayload::Execution { execution_id } => execution_id.clone(),
            WorkPayload::AutoReply { username, .. } => format!("auto-reply:{username}"),
        }
    }
}

/// A unit of work brokered between producers and workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    /// Work key; for execution items this is the execution's dedup key
    pub execution_id: String,
    /// 1 (lowest) to 10 (highest)
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub assigned_worker: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub estimated_confidence: Option<f32>,
    pub payload: WorkPayload,
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

impl WorkItem {
    pub fn new(payload: WorkPayload, priority: Priority) -> Self {
        Self {
            id: Uuid::now_v7(),
            execution_id: payload.work_key(),
            priority: priority.value(),
            created_at: Utc::now(),
            assigned_worker: None,
            processing_started_at: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            estimated_confidence: None,
            payload,
        }
    }

    pub fn with_priority_value(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Prepare the item for a retry pass: clear the assignment and lower
    /// the priority one step (floor 1)
    pub fn demote_for_retry(&mut self) {
        self.retry_count += 1;
        self.assigned_worker = None;
        self.processing_started_at = None;
        self.priority = self.priority.saturating_sub(1).max(1);
    }

    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Result of processing a work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkResult {
    pub item_id: Uuid,
    pub success: bool,
    pub output: Option<Value>,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
    pub processed_at: DateTime<Utc>,
}

impl WorkResult {
    pub fn success(item_id: Uuid, output: Option<Value>) -> Self {
        Self {
            item_id,
            success: true,
            output,
            error_message: None,
            worker_id: None,
            processed_at: Utc::now(),
        }
    }

    pub fn failure(item_id: Uuid, error_message: impl Into<String>) -> Self {
        Self {
            item_id,
            success: false,
            output: None,
            error_message: Some(error_message.into()),
            worker_id: None,
            processed_at: Utc::now(),
        }
    }

    pub fn with_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }
}

// Distributed work queue
//
// Four logical sub-queues per namespace: pending (priority-ordered),
// processing, results, failed, plus worker heartbeats. The broker trait
// has two implementations: Redis for production, in-memory for tests.

pub mod broker;
pub mod error;
pub mod item;
pub mod memory;
pub mod redis_broker;

pub use broker::{FailureOutcome, QueueBroker, QueueStats, WorkerStats};
pub use error::QueueError;
pub use item::{Priority, WorkItem, WorkPayload, WorkResult};
pub use memory::InMemoryBroker;
pub use redis_broker::RedisBroker;

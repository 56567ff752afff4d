// Execution worker
//
// Long-lived loop per spec'd scheduling model: heartbeat, dequeue with
// a ten-second wait, process. Multiple workers may run in one process;
// multiple processes share the broker.

pub mod worker;

pub use worker::{WorkerConfig, WorkerPool};

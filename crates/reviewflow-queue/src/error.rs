// Queue error type

use reviewflow_core::Error;
use thiserror::Error as ThisError;

/// Errors from queue operations.
///
/// A broker connection loss surfaces as `Unavailable`; callers back off
/// rather than blocking indefinitely.
#[derive(Debug, ThisError)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

impl From<QueueError> for Error {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Unavailable(msg) => Error::QueueUnavailable(msg),
            QueueError::Serialization(msg) => Error::Internal(anyhow::anyhow!(msg)),
        }
    }
}

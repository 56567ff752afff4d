// Store error type

use reviewflow_core::Error;
use thiserror::Error as ThisError;

/// Errors from store operations.
///
/// Every data operation fails fast with one of these; session cleanup is
/// handled by sqlx pool guards on all exit paths.
#[derive(Debug, ThisError)]
pub enum StoreError {
    /// The store never opened or the pool is unreachable
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness or terminal-state guard violation
    #[error("conflict: {0}")]
    Conflict(String),

    /// A CHECK constraint or application invariant failed
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Operation refused in this environment (e.g. drop_all in production)
    #[error("operation forbidden: {0}")]
    OperationForbidden(String),

    #[error("timed out acquiring a connection")]
    Timeout,

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        StoreError::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        StoreError::Conflict(what.into())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut => StoreError::Timeout,
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::Database(db) => {
                // 23505 unique_violation, 23514 check_violation, 23503 fk_violation
                match db.code().as_deref() {
                    Some("23505") => StoreError::Conflict(db.to_string()),
                    Some("23514") | Some("23503") => {
                        StoreError::InvariantViolation(db.to_string())
                    }
                    _ => StoreError::Database(err.to_string()),
                }
            }
            _ => StoreError::Database(err.to_string()),
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Error::DbUnavailable(msg),
            StoreError::NotFound(msg) => Error::NotFound(msg),
            StoreError::Conflict(msg) => Error::Conflict(msg),
            StoreError::Timeout => Error::Timeout,
            StoreError::OperationForbidden(msg) => Error::Auth(msg),
            other => Error::Internal(anyhow::anyhow!(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_conversion_to_core_error() {
        let err: Error = StoreError::Unavailable("pool closed".to_string()).into();
        assert!(matches!(err, Error::DbUnavailable(_)));

        let err: Error = StoreError::conflict("dup").into();
        assert!(matches!(err, Error::Conflict(_)));
    }
}

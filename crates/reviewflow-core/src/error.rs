// Error types shared across the engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur anywhere in the workflow engine.
///
/// Variants are categorical: callers match on the category to decide
/// retry-vs-fail, never on message text.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// Signature verification failed or authorization denied
    #[error("authorization error: {0}")]
    Auth(String),

    /// Malformed input to a public contract
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Entity lookup failure
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness or compare-and-set failure, including dedup-key hits
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database is degraded or unreachable
    #[error("database unavailable: {0}")]
    DbUnavailable(String),

    /// Queue broker is degraded or unreachable
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Deadline exceeded
    #[error("deadline exceeded")]
    Timeout,

    /// Cancellation observed
    #[error("cancelled")]
    Cancelled,

    /// LLM or integration provider error
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Unexpected error; logged with full detail, sanitized before surfacing
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Errors returned by LLM providers.
///
/// `Unavailable` triggers the manager's fallback walk; `Rejected` does not.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Provider cannot serve requests (missing key, network failure, 5xx, rate limit)
    #[error("provider '{provider}' unavailable: {message}")]
    Unavailable { provider: String, message: String },

    /// Provider refused this specific request (bad input, unsupported model)
    #[error("provider '{provider}' rejected request: {message}")]
    Rejected { provider: String, message: String },
}

impl ProviderError {
    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::Unavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn rejected(provider: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::Rejected {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Name of the provider that produced this error
    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Unavailable { provider, .. } => provider,
            ProviderError::Rejected { provider, .. } => provider,
        }
    }
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Error::Auth(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Error::InvalidRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    /// Whether the engine should retry the operation that produced this error.
    ///
    /// Infrastructure degradation and timeouts are retriable. Provider
    /// unavailability is handled by the manager's fallback before it ever
    /// reaches a caller, so it is terminal here.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::DbUnavailable(_) | Error::QueueUnavailable(_) | Error::Timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(Error::DbUnavailable("pool gone".into()).is_retriable());
        assert!(Error::QueueUnavailable("broker gone".into()).is_retriable());
        assert!(Error::Timeout.is_retriable());

        assert!(!Error::auth("denied").is_retriable());
        assert!(!Error::invalid_request("bad").is_retriable());
        assert!(!Error::Provider(ProviderError::rejected("openai", "bad model")).is_retriable());
    }

    #[test]
    fn test_provider_error_accessor() {
        let err = ProviderError::unavailable("anthropic", "no key");
        assert_eq!(err.provider(), "anthropic");
        assert!(err.to_string().contains("anthropic"));
    }
}

//! Error types for taifa-core.

use thiserror::Error;

/// Result type alias using taifa-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during collection operations.
///
/// Record-level conditions (a rejected duplicate, a below-threshold
/// publication) are modelled as values, not errors; only conditions that
/// abort a call or a pipeline surface here.
#[derive(Error, Debug)]
pub enum Error {
    /// A provider refused the call with a rate-limit response, or the
    /// local token bucket could not grant a token before its deadline.
    #[error("rate limited by {source_name}")]
    RateLimited { source_name: String },

    /// The daily cost budget for a source is exhausted.
    #[error("daily cost limit exceeded for {source_name}: spent {spent_usd:.2} of {limit_usd:.2} USD")]
    CostLimitExceeded {
        source_name: String,
        spent_usd: f64,
        limit_usd: f64,
    },

    /// Transport-level failure (connect, DNS, TLS, read).
    #[error("network error: {0}")]
    Network(String),

    /// An external call exceeded its deadline.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Upstream returned 5xx, or its payload failed schema expectations.
    #[error("API error from {source_name}: {message}")]
    Api { source_name: String, message: String },

    /// Missing or rejected credential. Terminal for the provider this cycle.
    #[error("authentication failed for {source_name}: {message}")]
    Auth { source_name: String, message: String },

    /// A record failed validation. Localized to the record by callers.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The pipeline or cycle was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// Cache or persistence storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a rate-limited error.
    pub fn rate_limited(source_name: impl Into<String>) -> Self {
        Self::RateLimited {
            source_name: source_name.into(),
        }
    }

    /// Create a cost-limit error.
    pub fn cost_limit(source_name: impl Into<String>, spent_usd: f64, limit_usd: f64) -> Self {
        Self::CostLimitExceeded {
            source_name: source_name.into(),
            spent_usd,
            limit_usd,
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create an API error.
    pub fn api(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create an auth error.
    pub fn auth(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Whether a retry may succeed without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Network(_) | Self::Timeout { .. } | Self::Api { .. }
        )
    }

    /// Whether the error should terminate the provider for the cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::rate_limited("websearch").is_retryable());
        assert!(Error::network("connection reset").is_retryable());
        assert!(Error::timeout(5000).is_retryable());
        assert!(Error::api("arxiv", "502").is_retryable());

        assert!(!Error::auth("pubmed", "bad key").is_retryable());
        assert!(!Error::Validation("empty title".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_terminal_classification() {
        assert!(Error::auth("intelligence", "missing key").is_terminal());
        assert!(!Error::rate_limited("scholar").is_terminal());
    }

    #[test]
    fn test_cost_limit_display() {
        let err = Error::cost_limit("intelligence", 50.25, 50.0);
        let msg = err.to_string();
        assert!(msg.contains("intelligence"));
        assert!(msg.contains("50.25"));
    }
}

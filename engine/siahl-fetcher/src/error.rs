//! Error types for the SIAHL fetcher

use thiserror::Error;

/// Result type alias for fetch operations
pub type Result<T> = std::result::Result<T, FetchError>;

/// Errors surfaced by a logical resource fetch.
///
/// `Clone` is required because a single-flight refetch hands the same outcome
/// to every waiting caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Timeout, connection failure or a transient HTTP status. Already retried
    /// up to the configured bound when it reaches the caller.
    #[error("Network error fetching {url} after {attempts} attempt(s): {message}")]
    Network { url: String, message: String, attempts: u32 },

    /// The response arrived but did not have the expected structure. Never retried.
    #[error("Parse error for {resource}: {message}")]
    Parse { resource: String, message: String },

    /// The rate limiter's waiter queue for this origin is full.
    #[error("Origin {origin} overloaded: {waiters} requests already waiting")]
    Overloaded { origin: String, waiters: usize },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FetchError {
    /// Create a new parse error
    pub fn parse(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse { resource: resource.into(), message: message.into() }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }

    pub fn is_overloaded(&self) -> bool {
        matches!(self, Self::Overloaded { .. })
    }
}

/// Failure of a single transport attempt, before retry classification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("failed to read response body: {0}")]
    Body(String),
}

impl TransportError {
    /// Whether another attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Connection(_) | Self::Body(_) => true,
            Self::Status(status) => *status == 429 || *status >= 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::Connection("refused".to_string()).is_transient());
        assert!(TransportError::Status(503).is_transient());
        assert!(TransportError::Status(429).is_transient());
        assert!(!TransportError::Status(404).is_transient());
        assert!(!TransportError::Status(403).is_transient());
    }

    #[test]
    fn test_error_predicates() {
        let err = FetchError::parse("schedule:1", "no table");
        assert!(err.is_parse());
        assert!(!err.is_network());

        let err = FetchError::Overloaded { origin: "example.com".to_string(), waiters: 64 };
        assert!(err.is_overloaded());
        assert_eq!(err.to_string(), "Origin example.com overloaded: 64 requests already waiting");
    }
}

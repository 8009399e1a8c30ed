use siahl_fetcher::FetchError;
use thiserror::Error;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Cache errors. `Clone` so a single-flight outcome can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Storage backend failure
    #[error("Cache storage error: {0}")]
    Storage(String),

    /// Stored entry could not be encoded or decoded
    #[error("Cache codec error: {0}")]
    Codec(String),
}

impl CacheError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec(err.to_string())
    }

    /// The underlying fetch error, if this came from the fetcher
    pub fn as_fetch(&self) -> Option<&FetchError> {
        match self {
            Self::Fetch(e) => Some(e),
            _ => None,
        }
    }
}

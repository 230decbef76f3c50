use claimline_types::TransitionError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store-layer errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// A serialized item exceeds the backend's per-item limit.
    #[error("item {key} is {size} bytes, over the {limit} byte quota")]
    QuotaExceeded { key: String, size: usize, limit: usize },

    /// Persisted layout does not describe a loadable record set.
    #[error("corrupt store layout: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),

    /// A mutation refused to apply; nothing was written.
    #[error("mutation rejected: {0}")]
    Rejected(String),
}

impl From<TransitionError> for StoreError {
    fn from(err: TransitionError) -> Self {
        Self::Rejected(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

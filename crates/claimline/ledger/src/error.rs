use thiserror::Error;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger RPC errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Identifier derivation could not be reached. Never replaced by a local guess.
    #[error("identifier derivation unavailable: {0}")]
    AddressingUnavailable(String),

    /// Transient transport failure; callers may retry with backoff.
    #[error("network error: {0}")]
    Network(String),

    /// The ledger rejected the call.
    #[error("ledger reverted: {0}")]
    Reverted(String),

    /// The ledger's "no such record" signal.
    #[error("no such record: {0}")]
    NotFound(String),

    #[error("invalid ledger response: {0}")]
    InvalidResponse(String),
}

impl LedgerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

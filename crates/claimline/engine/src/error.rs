use claimline_ledger::LedgerError;
use claimline_store::StoreError;
use claimline_types::{Amount, ClaimId, ClaimStatus, TxRef};
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Commit engine errors.
///
/// `Clone` so one commit attempt's outcome can be handed to every caller that
/// joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("claim not found: {0}")]
    ClaimNotFound(ClaimId),

    #[error("unknown predicate '{0}'")]
    UnknownPredicate(String),

    #[error("claim {claim_id} is {status}; cannot {action}")]
    InvalidState {
        claim_id: ClaimId,
        status: ClaimStatus,
        action: &'static str,
    },

    #[error("identifier derivation unavailable: {0}")]
    AddressingUnavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("insufficient funds for claim {claim_id}: need {required}, have {available}")]
    InsufficientFunds {
        claim_id: ClaimId,
        required: Amount,
        available: Amount,
    },

    #[error("transaction reverted for claim {claim_id}: {reason}")]
    TransactionReverted { claim_id: ClaimId, reason: String },

    #[error("confirmation timed out for claim {claim_id} (tx {tx_ref})")]
    ConfirmationTimeout { claim_id: ClaimId, tx_ref: TxRef },

    /// The call was broadcast but its receipt could not be read.
    #[error("outcome of tx {tx_ref} for claim {claim_id} unknown: {reason}")]
    Unconfirmed {
        claim_id: ClaimId,
        tx_ref: TxRef,
        reason: String,
    },

    #[error("store error: {0}")]
    Store(String),

    #[error("commit task aborted: {0}")]
    Aborted(String),
}

impl EngineError {
    /// Errors the user should see, as opposed to internal addressing trouble.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds { .. }
                | Self::TransactionReverted { .. }
                | Self::ConfirmationTimeout { .. }
                | Self::Unconfirmed { .. }
                | Self::UnknownPredicate(_)
                | Self::ClaimNotFound(_)
                | Self::InvalidState { .. }
        )
    }
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AddressingUnavailable(msg) => Self::AddressingUnavailable(msg),
            LedgerError::Network(msg) => Self::Network(msg),
            other => Self::Ledger(other.to_string()),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

//! Claimline ledger facet.
//!
//! Everything the commit engine knows about the remote ledger goes through this crate:
//! - [`LedgerReader`] / [`TransactionSubmitter`]: the RPC and wallet seams
//! - [`ContentAddressor`]: node and edge ids, always derived by the ledger itself
//! - [`LedgerQuery`]: existence checks with field-by-field collision verification
//! - [`FeeCalculator`]: creation and deposit quotes from the ledger's fee views
//! - [`SandboxLedger`]: an in-process ledger for tests and offline tooling
//!
//! Design stance: the ledger is the final arbiter. Local code never guesses an
//! identifier or a fee it could have asked for.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod addressor;
mod error;
mod fees;
mod query;
pub mod sandbox;
mod traits;

pub use addressor::ContentAddressor;
pub use error::{LedgerError, LedgerResult};
pub use fees::FeeCalculator;
pub use query::{EdgeExistence, IdentifierCollision, LedgerQuery};
pub use sandbox::{FeeSchedule, SandboxLedger, SandboxState};
pub use traits::{CallOutput, LedgerReader, Receipt, ReceiptStatus, StoredEdge, TransactionSubmitter};

//! Claimline core types.
//!
//! Shared vocabulary for every claimline crate:
//! - content-addressed [`Identifier`]s and local [`ClaimId`]s
//! - arbitrary-precision [`Amount`]s in the ledger's smallest unit
//! - node descriptors and candidate claims supplied by the activity layer
//! - the local [`ClaimRecord`] and its lifecycle [`ClaimStatus`]
//! - the tagged [`LedgerCall`] union the engine hands to a wallet
//!
//! Amounts never pass through floating point; formatting helpers exist only for display.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod amount;
mod call;
mod descriptor;
mod ids;
mod record;

pub use amount::{Amount, AmountParseError};
pub use call::{
    CommitPlan, CostQuote, CreateEdgeArgs, CreateNodesArgs, DepositArgs, EdgeAction, LedgerCall,
    PlannedNode,
};
pub use descriptor::{CandidateClaim, NodeDescriptor, NodeRole};
pub use ids::{ClaimId, Identifier, IdentifierParseError, TxRef, IDENTIFIER_LEN};
pub use record::{ClaimFailure, ClaimRecord, ClaimStatus, FailureKind, ResolvedNodes, TransitionError};

//! Claimline commit engine.
//!
//! Drives locally observed claims through
//! `Detected → Verifying → Ready → Committing → Committed | FoundExisting`,
//! with `Failed` reachable from verification and commit and left only by an
//! explicit retry. Every transition is written through the claim store before
//! control returns to the caller.
//!
//! ```text
//! observe ──► verify ──► commit ──► submit nodes ──► submit edge/deposit ──► confirm
//!                ▲                        │
//!                └──────── retry ◄────────┘ (revert / timeout / funds)
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod classify;
mod config;
mod error;
mod inflight;
mod orchestrator;
mod predicates;
mod retry;

pub use classify::{RevertClass, RevertClassifier};
pub use config::{EngineConfig, EngineProfile, RetryPolicy};
pub use error::{EngineError, EngineResult};
pub use orchestrator::{CommitEngine, RecoveryReport};
pub use predicates::PredicateTable;

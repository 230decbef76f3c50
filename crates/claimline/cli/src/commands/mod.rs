//! CLI command implementations

pub mod claims;
pub mod ledger;

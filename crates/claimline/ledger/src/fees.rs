//! Fee quotes.
//!
//! All arithmetic beyond summing two quotes is the ledger's: creation and deposit
//! totals come from its own fee views, never from a local formula.

use crate::{LedgerQuery, LedgerResult};
use claimline_types::Amount;
use std::sync::Arc;
use tracing::trace;

pub struct FeeCalculator {
    query: Arc<LedgerQuery>,
}

impl FeeCalculator {
    pub fn new(query: Arc<LedgerQuery>) -> Self {
        Self { query }
    }

    /// Total payable to create `count` entities at `base_cost` each. Zero for zero.
    pub async fn quote_creation(&self, count: u64, base_cost: &Amount) -> LedgerResult<Amount> {
        if count == 0 {
            return Ok(Amount::zero());
        }
        let total = self.query.total_creation_cost(count, base_cost).await?;
        trace!(count, %base_cost, %total, "creation quote");
        Ok(total)
    }

    /// Deposit amount plus entry and protocol fees.
    pub async fn quote_deposit(&self, amount: &Amount) -> LedgerResult<Amount> {
        let total = self.query.total_deposit_cost(amount).await?;
        trace!(%amount, %total, "deposit quote");
        Ok(total)
    }

    /// Cost of creating `count` nodes in one call.
    pub async fn quote_nodes(&self, count: u64) -> LedgerResult<Amount> {
        if count == 0 {
            return Ok(Amount::zero());
        }
        let base = self.query.node_creation_cost().await?;
        self.quote_creation(count, &base).await
    }

    /// Cost of creating one edge with `deposit` placed on it.
    pub async fn quote_edge_creation(&self, deposit: &Amount) -> LedgerResult<Amount> {
        let base = self.query.edge_creation_cost().await?;
        let creation = self.quote_creation(1, &base).await?;
        let deposit = self.quote_deposit(deposit).await?;
        Ok(creation + deposit)
    }
}

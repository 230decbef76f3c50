//! Sandbox ledger commands

use crate::error::CliResult;
use crate::output::{self, units, OutputFormat};
use crate::workspace::Workspace;
use clap::Subcommand;
use claimline_ledger::{FeeCalculator, LedgerQuery, TransactionSubmitter};
use claimline_types::Amount;
use serde::Serialize;
use std::sync::Arc;
use tabled::Tabled;

/// Ledger subcommands
#[derive(Subcommand)]
pub enum LedgerCommands {
    /// Wallet balance and ledger totals
    Status,

    /// Set the wallet balance, in base units
    Fund { amount: Amount },

    /// Quote node creation plus an edge or deposit
    Quote {
        /// Nodes to create
        #[arg(long, default_value = "0")]
        nodes: u64,
        /// Deposit amount in base units (defaults to the engine's)
        #[arg(long)]
        deposit: Option<Amount>,
        /// Quote a deposit on an existing edge instead of edge creation
        #[arg(long)]
        existing: bool,
    },
}

#[derive(Serialize, Tabled)]
struct LedgerStatus {
    sender: String,
    balance: String,
    nodes: usize,
    edges: usize,
}

#[derive(Serialize, Tabled)]
struct QuoteRow {
    item: String,
    base_units: String,
    units: String,
}

impl QuoteRow {
    fn new(item: &str, amount: &Amount) -> Self {
        Self {
            item: item.to_string(),
            base_units: amount.to_string(),
            units: units(amount),
        }
    }
}

/// Execute ledger command
pub async fn execute(command: LedgerCommands, workspace: &Workspace, format: OutputFormat) -> CliResult<()> {
    let ledger = workspace.ledger();
    match command {
        LedgerCommands::Status => {
            let balance = ledger.balance_of(ledger.sender());
            let status = LedgerStatus {
                sender: ledger.sender().to_string(),
                balance: units(&balance),
                nodes: ledger.node_count(),
                edges: ledger.edge_count(),
            };
            output::print_output(vec![status], format)
        }
        LedgerCommands::Fund { amount } => {
            ledger.set_balance(ledger.sender(), amount.clone());
            output::print_success(&format!("{} now holds {}", ledger.sender(), units(&amount)));
            Ok(())
        }
        LedgerCommands::Quote {
            nodes,
            deposit,
            existing,
        } => {
            let fees = FeeCalculator::new(Arc::new(LedgerQuery::new(ledger.clone())));
            let deposit = deposit.unwrap_or_else(|| workspace.engine().config().deposit_amount.clone());

            let node_cost = fees.quote_nodes(nodes).await?;
            let (label, edge_cost) = if existing {
                ("deposit", fees.quote_deposit(&deposit).await?)
            } else {
                ("edge + deposit", fees.quote_edge_creation(&deposit).await?)
            };
            let total = &node_cost + &edge_cost;
            let rows = vec![
                QuoteRow::new(&format!("{nodes} node(s)"), &node_cost),
                QuoteRow::new(label, &edge_cost),
                QuoteRow::new("total", &total),
            ];
            output::print_output(rows, format)
        }
    }
}

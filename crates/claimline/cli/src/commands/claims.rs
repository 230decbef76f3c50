//! Claim lifecycle commands

use crate::error::{CliError, CliResult};
use crate::output::{self, units, OutputFormat};
use crate::workspace::Workspace;
use chrono::{Duration, Utc};
use clap::Subcommand;
use claimline_engine::RecoveryReport;
use claimline_types::{CandidateClaim, ClaimId, ClaimRecord, ClaimStatus, EdgeAction, NodeDescriptor};
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

/// Claim subcommands
#[derive(Subcommand)]
pub enum ClaimCommands {
    /// Record a candidate claim (subject predicate object)
    Observe {
        subject: String,
        predicate: String,
        object: String,
        /// Where the observation came from
        #[arg(long, default_value = "cli")]
        source: String,
        #[arg(long)]
        object_url: Option<String>,
        #[arg(long)]
        object_description: Option<String>,
        /// Verify right away
        #[arg(long)]
        verify: bool,
    },

    /// Resolve ids, plan writes and quote the cost
    Verify { id: String },

    /// Commit a claim, verifying it first if needed
    Commit { id: String },

    /// Commit every Ready claim
    CommitReady,

    /// Re-verify and commit a failed claim
    Retry { id: String },

    /// Reconcile claims left verifying or committing
    Recover,

    /// List claims
    List {
        /// Filter by status (detected, verifying, ready, committing, committed, found_existing, failed)
        #[arg(short, long)]
        status: Option<String>,
        /// Maximum number to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show one claim in full
    Show { id: String },

    /// Delete a claim
    Remove { id: String },

    /// Drop settled claims older than the given age
    Prune {
        #[arg(long, default_value = "30")]
        older_than_days: i64,
    },

    /// Delete every claim
    Clear {
        /// Required; clearing cannot be undone
        #[arg(long)]
        yes: bool,
    },

    /// Claim counts by status
    Stats,
}

/// Claim row for display
#[derive(Serialize, Tabled)]
struct ClaimRow {
    id: String,
    status: String,
    subject: String,
    predicate: String,
    object: String,
    plan: String,
    cost: String,
    attempts: u32,
    tx: String,
}

impl From<&ClaimRecord> for ClaimRow {
    fn from(record: &ClaimRecord) -> Self {
        let (plan, cost) = match &record.plan {
            Some(plan) => {
                let edge = match plan.edge {
                    EdgeAction::Create { .. } => "create edge",
                    EdgeAction::Deposit { .. } => "deposit",
                };
                let label = if plan.missing_nodes.is_empty() {
                    edge.to_string()
                } else {
                    format!("{} node(s) + {edge}", plan.missing_nodes.len())
                };
                (label, units(&plan.cost.total))
            }
            None => ("-".to_string(), "-".to_string()),
        };
        Self {
            id: record.claim_id.to_string(),
            status: record.status.to_string(),
            subject: record.subject.name.clone(),
            predicate: record.predicate.clone(),
            object: record.object.name.clone(),
            plan,
            cost,
            attempts: record.attempts,
            tx: record
                .transaction_ref
                .as_ref()
                .map(|tx| short(tx.as_str()))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Serialize, Tabled)]
struct StatusRow {
    status: String,
    count: usize,
}

#[derive(Serialize, Tabled)]
struct CommitRow {
    id: String,
    outcome: String,
    detail: String,
}

/// Execute claim command
pub async fn execute(command: ClaimCommands, workspace: &Workspace, format: OutputFormat) -> CliResult<()> {
    let engine = workspace.engine();
    match command {
        ClaimCommands::Observe {
            subject,
            predicate,
            object,
            source,
            object_url,
            object_description,
            verify,
        } => {
            let mut object = NodeDescriptor::new(object);
            if let Some(url) = object_url {
                object = object.with_url(url);
            }
            if let Some(description) = object_description {
                object = object.with_description(description);
            }
            let candidate = CandidateClaim::new(source, NodeDescriptor::new(subject), predicate, object);
            let mut record = engine.observe(candidate).await?;
            if verify {
                record = engine.verify(&record.claim_id).await?;
            }
            report(&record, format)
        }
        ClaimCommands::Verify { id } => {
            let record = engine.verify(&parse_id(&id)).await?;
            report(&record, format)
        }
        ClaimCommands::Commit { id } => {
            let record = engine.commit(&parse_id(&id)).await?;
            report(&record, format)
        }
        ClaimCommands::Retry { id } => {
            let record = engine.retry(&parse_id(&id)).await?;
            report(&record, format)
        }
        ClaimCommands::CommitReady => commit_ready(workspace, format).await,
        ClaimCommands::Recover => {
            let report = engine.recover().await;
            print_recovery(&report, format)
        }
        ClaimCommands::List { status, limit } => list(workspace, status, limit, format).await,
        ClaimCommands::Show { id } => {
            let claim_id = parse_id(&id);
            let record = engine
                .get(&claim_id)
                .await
                .ok_or_else(|| CliError::NotFound(format!("claim {claim_id}")))?;
            output::print_single(&record, format)
        }
        ClaimCommands::Remove { id } => {
            let removed = engine.remove(&parse_id(&id)).await?;
            output::print_success(&format!("removed claim {} ({})", removed.claim_id, removed.status));
            Ok(())
        }
        ClaimCommands::Prune { older_than_days } => {
            if older_than_days < 0 {
                return Err(CliError::InvalidArgument("--older-than-days must not be negative".into()));
            }
            let cutoff = Utc::now() - Duration::days(older_than_days);
            let pruned = engine.prune_before(cutoff).await?;
            output::print_success(&format!("pruned {pruned} settled claim(s)"));
            Ok(())
        }
        ClaimCommands::Clear { yes } => {
            if !yes {
                return Err(CliError::InvalidArgument("pass --yes to delete every claim".into()));
            }
            engine.clear().await?;
            output::print_success("all claims deleted");
            Ok(())
        }
        ClaimCommands::Stats => {
            let counts = engine.store().status_counts().await;
            let rows = ClaimStatus::ALL
                .iter()
                .map(|status| StatusRow {
                    status: status.to_string(),
                    count: counts.get(status).copied().unwrap_or(0),
                })
                .collect();
            output::print_output(rows, format)
        }
    }
}

fn parse_id(raw: &str) -> ClaimId {
    ClaimId::from_raw(raw.trim())
}

fn short(raw: &str) -> String {
    if raw.len() > 14 {
        format!("{}…", &raw[..14])
    } else {
        raw.to_string()
    }
}

fn report(record: &ClaimRecord, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table => {
            let status = match record.status {
                ClaimStatus::Committed | ClaimStatus::FoundExisting => record.status.to_string().green(),
                ClaimStatus::Failed => record.status.to_string().red(),
                _ => record.status.to_string().cyan(),
            };
            println!("{} {}", record.claim_id.to_string().bold(), status);
            output::print_output(vec![ClaimRow::from(record)], format)
        }
        _ => output::print_single(record, format),
    }
}

async fn list(workspace: &Workspace, status: Option<String>, limit: usize, format: OutputFormat) -> CliResult<()> {
    let filter = status.as_deref().map(parse_status).transpose()?;
    let rows: Vec<ClaimRow> = workspace
        .engine()
        .records()
        .await
        .iter()
        .filter(|r| filter.map_or(true, |s| r.status == s))
        .take(limit)
        .map(ClaimRow::from)
        .collect();
    output::print_output(rows, format)
}

fn parse_status(raw: &str) -> CliResult<ClaimStatus> {
    let wanted = raw.trim().to_lowercase().replace('-', "_");
    ClaimStatus::ALL
        .into_iter()
        .find(|s| s.as_str() == wanted)
        .ok_or_else(|| CliError::InvalidArgument(format!("unknown status '{raw}'")))
}

async fn commit_ready(workspace: &Workspace, format: OutputFormat) -> CliResult<()> {
    let results = workspace.engine().commit_ready().await;
    let failures = results.iter().filter(|(_, r)| r.is_err()).count();
    let rows: Vec<CommitRow> = results
        .into_iter()
        .map(|(id, result)| match result {
            Ok(record) => CommitRow {
                id: id.to_string(),
                outcome: record.status.to_string(),
                detail: record
                    .transaction_ref
                    .map(|tx| tx.to_string())
                    .unwrap_or_default(),
            },
            Err(err) => CommitRow {
                id: id.to_string(),
                outcome: "error".to_string(),
                detail: err.to_string(),
            },
        })
        .collect();
    output::print_output(rows, format)?;
    if failures > 0 {
        output::print_warning(&format!("{failures} claim(s) did not commit"));
    }
    Ok(())
}

fn print_recovery(report: &RecoveryReport, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", "Recovery".bold().cyan());
            println!("  re-verified:  {}", report.reverified.len());
            println!("  reclassified: {}", report.reclassified.len());
            println!("  failed:       {}", report.failed.len());
            for (id, error) in &report.errors {
                output::print_error(&format!("{id}: {error}"));
            }
            Ok(())
        }
        _ => output::print_single(report, format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_filter_accepts_dashes_and_case() {
        assert_eq!(parse_status("Found-Existing").unwrap(), ClaimStatus::FoundExisting);
        assert!(parse_status("pending").is_err());
    }

    #[test]
    fn long_refs_are_shortened() {
        assert_eq!(short("0x0123456789abcdef"), "0x0123456789ab…");
        assert_eq!(short("0xfeed"), "0xfeed");
    }
}

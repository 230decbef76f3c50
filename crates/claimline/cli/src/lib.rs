//! claimctl - command-line interface for Claimline
//!
//! Runs the commit engine against a local sandbox ledger so claims can be
//! observed, verified, committed, retried and inspected from a terminal:
//! - Record candidate claims and verify them into priced plans
//! - Commit one claim or every Ready claim
//! - Recover claims left mid-flight by an earlier run
//! - Inspect the sandbox wallet and fee quotes

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

use clap::{Parser, Subcommand, ValueEnum};
use claimline_engine::{EngineConfig, EngineProfile};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
pub mod config;
mod error;
mod output;
mod workspace;

use commands::{claims, ledger};
pub use config::{CliConfig, SandboxConfig};
pub use error::{CliError, CliResult};
pub use workspace::Workspace;

/// claimctl application
#[derive(Parser)]
#[command(name = "claimctl")]
#[command(about = "Claimline - deduplicated, fee-accounted claim commits", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CLAIMLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (overrides the config file)
    #[arg(short, long, env = "CLAIMLINE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Engine timing profile (overrides the config file's timeouts and retries)
    #[arg(short, long)]
    profile: Option<ProfileArg>,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table")]
    output: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProfileArg {
    Interactive,
    Batch,
}

impl From<ProfileArg> for EngineProfile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Interactive => EngineProfile::Interactive,
            ProfileArg::Batch => EngineProfile::Batch,
        }
    }
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Observe, verify, commit and inspect claims
    Claim {
        #[command(subcommand)]
        command: claims::ClaimCommands,
    },

    /// Inspect and fund the sandbox ledger
    Ledger {
        #[command(subcommand)]
        command: ledger::LedgerCommands,
    },

    /// Show the effective configuration
    Config,
}

/// Run using the current process arguments.
pub async fn run() -> CliResult<()> {
    run_with_args(std::env::args_os()).await
}

/// Run using the provided argument iterator.
pub async fn run_with_args<I, T>(args: I) -> CliResult<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    // Logs go to stderr so stdout stays parseable with --output json
    let filter = if cli.verbose { "claimline=debug,info" } else { "claimline=info,warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).without_time())
        .init();

    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    let engine_config = engine_config(&config, cli.profile);

    if let Commands::Config = cli.command {
        return show_config(&config, &engine_config, cli.output);
    }

    let workspace = Workspace::open_with_engine(engine_config, config).await?;
    let result = match cli.command {
        Commands::Claim { command } => claims::execute(command, &workspace, cli.output).await,
        Commands::Ledger { command } => ledger::execute(command, &workspace, cli.output).await,
        Commands::Config => Ok(()),
    };
    // A failed commit still spent or changed ledger state
    workspace.save().await?;
    result
}

fn engine_config(config: &CliConfig, profile: Option<ProfileArg>) -> EngineConfig {
    match profile {
        Some(profile) => {
            let mut tuned = EngineConfig::for_profile(profile.into());
            tuned.deposit_amount = config.engine.deposit_amount.clone();
            tuned.batch_node_creation = config.engine.batch_node_creation;
            tuned.already_exists_reasons = config.engine.already_exists_reasons.clone();
            tuned
        }
        None => config.engine.clone(),
    }
}

fn show_config(config: &CliConfig, engine: &EngineConfig, format: output::OutputFormat) -> CliResult<()> {
    let mut effective = config.clone();
    effective.engine = engine.clone();
    match format {
        output::OutputFormat::Table => {
            if let Some(path) = CliConfig::default_path() {
                println!("# default config path: {}", path.display());
            }
            print!("{}", effective.to_toml()?);
            Ok(())
        }
        _ => output::print_single(&effective, format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimline_types::Amount;

    #[test]
    fn profile_keeps_configured_deposit() {
        let mut config = CliConfig::default();
        config.engine.deposit_amount = Amount::from(7u64);
        let tuned = engine_config(&config, Some(ProfileArg::Batch));
        assert_eq!(tuned.deposit_amount, Amount::from(7u64));
        assert_eq!(tuned.confirmation_timeout_ms, 300_000);
        assert_eq!(engine_config(&config, None), config.engine);
    }

    #[test]
    fn cli_parses_nested_commands() {
        let cli = Cli::try_parse_from(["claimctl", "-o", "json", "claim", "observe", "I", "like", "SiteX", "--verify"])
            .unwrap();
        assert!(matches!(cli.output, output::OutputFormat::Json));
        assert!(matches!(
            cli.command,
            Commands::Claim {
                command: claims::ClaimCommands::Observe { verify: true, .. }
            }
        ));
    }
}

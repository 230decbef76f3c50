//! CLI configuration
//!
//! Read from TOML. Every section is optional and falls back to defaults, so an
//! empty file (or no file at the default location) is a valid configuration.
//!
//! ```toml
//! data_dir = "/var/lib/claimline"
//! predicates = ["like", "follow"]
//!
//! [engine]
//! deposit_amount = "1000000000000000"
//! confirmation_timeout_ms = 60000
//!
//! [ledger]
//! sender = "0xwallet"
//! starting_balance = "5000000000000000000"
//! ```

use crate::error::{CliError, CliResult};
use claimline_engine::EngineConfig;
use claimline_ledger::{FeeSchedule, SandboxLedger};
use claimline_store::StoreConfig;
use claimline_types::Amount;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for `claimctl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Claim store and sandbox ledger live here.
    pub data_dir: PathBuf,

    /// Predicate names the engine accepts. Each is seeded as a ledger node.
    pub predicates: Vec<String>,

    pub engine: EngineConfig,
    pub store: StoreConfig,
    pub ledger: SandboxConfig,
}

/// Local sandbox ledger settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub sender: String,

    /// Balance given to `sender` when the ledger is first created.
    pub starting_balance: Amount,

    pub batch_creation: bool,

    /// Nodes present before the first claim, e.g. the user's own node.
    pub seed_nodes: Vec<String>,

    pub schedule: FeeSchedule,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            predicates: ["like", "follow", "visit", "trust", "use"]
                .into_iter()
                .map(String::from)
                .collect(),
            engine: EngineConfig::default(),
            store: StoreConfig::default(),
            ledger: SandboxConfig::default(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            sender: "0xclaimline".to_string(),
            starting_balance: Amount::from(SandboxLedger::DEFAULT_BALANCE),
            batch_creation: true,
            seed_nodes: vec!["I".to_string()],
            schedule: FeeSchedule::default(),
        }
    }
}

impl CliConfig {
    /// Load from `path`, or from [`CliConfig::default_path`] when `None`.
    ///
    /// A missing explicit file is an error; a missing default file is not.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(CliError::NotFound(format!("config file {}", path.display())));
            }
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> CliResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml(&self) -> CliResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// `$XDG_CONFIG_HOME/claimline/config.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("claimline").join("config.toml"))
    }

    pub fn claims_dir(&self) -> PathBuf {
        self.data_dir.join("claims")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("sandbox-ledger.json")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("claimline"))
        .unwrap_or_else(|| PathBuf::from(".claimline"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let config = CliConfig::from_toml(
            r#"
            data_dir = "/tmp/claims"
            predicates = ["like"]

            [engine]
            confirmation_timeout_ms = 5000

            [ledger]
            sender = "0xabc"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/claims"));
        assert_eq!(config.predicates, vec!["like"]);
        assert_eq!(config.engine.confirmation_timeout_ms, 5000);
        assert_eq!(config.engine.deposit_amount, EngineConfig::default().deposit_amount);
        assert_eq!(config.ledger.sender, "0xabc");
        assert_eq!(config.ledger.seed_nodes, vec!["I"]);
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(CliConfig::from_toml("").unwrap(), CliConfig::default());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = CliConfig::load(Some(Path::new("/nonexistent/claimline.toml"))).unwrap_err();
        assert!(matches!(err, CliError::NotFound(_)));
    }

    #[test]
    fn toml_round_trip() {
        let config = CliConfig::default();
        let encoded = config.to_toml().unwrap();
        assert_eq!(CliConfig::from_toml(&encoded).unwrap(), config);
    }
}

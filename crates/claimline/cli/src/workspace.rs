//! Everything one `claimctl` invocation works against.
//!
//! The claim store is a directory of chunk files under `data_dir/claims`. The
//! sandbox ledger is loaded from a JSON snapshot and written back by
//! [`Workspace::save`], so ledger state survives between invocations.

use crate::config::CliConfig;
use crate::error::CliResult;
use claimline_engine::{CommitEngine, EngineConfig, PredicateTable};
use claimline_ledger::{SandboxLedger, SandboxState};
use claimline_store::{ClaimStore, FileBackend};
use claimline_types::NodeDescriptor;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Workspace {
    config: CliConfig,
    ledger: Arc<SandboxLedger>,
    engine: CommitEngine,
}

impl Workspace {
    pub async fn open(config: CliConfig) -> CliResult<Self> {
        Self::open_with_engine(config.engine.clone(), config).await
    }

    /// Open with an engine configuration other than the file's.
    pub async fn open_with_engine(engine_config: EngineConfig, config: CliConfig) -> CliResult<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let ledger = Arc::new(load_ledger(&config).await?);
        ledger.set_batch_creation(config.ledger.batch_creation);

        let mut predicates = PredicateTable::new();
        for name in &config.predicates {
            let id = ledger.seed_node(&NodeDescriptor::new(name.trim().to_lowercase()));
            predicates.insert(name, id);
        }
        for name in &config.ledger.seed_nodes {
            ledger.seed_node(&NodeDescriptor::new(name.as_str()));
        }

        let backend = FileBackend::open(config.claims_dir())
            .await?
            .with_quota(config.store.max_item_bytes);
        let store = ClaimStore::open(Arc::new(backend), config.store.clone()).await?;
        debug!(data_dir = %config.data_dir.display(), claims = store.len().await, "workspace opened");

        let engine = CommitEngine::new(engine_config, Arc::new(store), ledger.clone(), ledger.clone(), predicates);
        Ok(Self { config, ledger, engine })
    }

    pub fn config(&self) -> &CliConfig {
        &self.config
    }

    pub fn engine(&self) -> &CommitEngine {
        &self.engine
    }

    pub fn ledger(&self) -> &Arc<SandboxLedger> {
        &self.ledger
    }

    /// Persist the sandbox ledger snapshot.
    pub async fn save(&self) -> CliResult<()> {
        let path = self.config.ledger_path();
        let encoded = serde_json::to_vec_pretty(&self.ledger.snapshot())?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, encoded).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "sandbox ledger saved");
        Ok(())
    }
}

async fn load_ledger(config: &CliConfig) -> CliResult<SandboxLedger> {
    let path = config.ledger_path();
    let sender = config.ledger.sender.clone();
    match read_snapshot(&path).await? {
        Some(state) => Ok(SandboxLedger::from_state(sender, state)),
        None => {
            info!(path = %path.display(), sender = %sender, "creating sandbox ledger");
            let ledger = SandboxLedger::with_schedule(sender.as_str(), config.ledger.schedule.clone());
            ledger.set_balance(&sender, config.ledger.starting_balance.clone());
            Ok(ledger)
        }
    }
}

async fn read_snapshot(path: &Path) -> CliResult<Option<SandboxState>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

//! Content addressing through the ledger's own derivation.
//!
//! A locally reimplemented hash that differs by a single byte of encoding would
//! produce ids the ledger never recognizes, so every id comes from an RPC. The
//! only local state is memoization keyed by the exact bytes sent.

use crate::{LedgerError, LedgerReader, LedgerResult};
use claimline_types::{Identifier, NodeDescriptor, IDENTIFIER_LEN};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

type EdgeKey = [u8; IDENTIFIER_LEN * 3];

pub struct ContentAddressor {
    reader: Arc<dyn LedgerReader>,
    node_memo: DashMap<Vec<u8>, Identifier>,
    edge_memo: DashMap<EdgeKey, Identifier>,
}

impl ContentAddressor {
    pub fn new(reader: Arc<dyn LedgerReader>) -> Self {
        Self {
            reader,
            node_memo: DashMap::new(),
            edge_memo: DashMap::new(),
        }
    }

    pub async fn node_id(&self, descriptor: &NodeDescriptor) -> LedgerResult<Identifier> {
        let canonical = descriptor.canonical_bytes();
        if let Some(hit) = self.node_memo.get(&canonical) {
            return Ok(*hit);
        }

        let id = self
            .reader
            .derive_node_id(&canonical)
            .await
            .map_err(addressing_unavailable)?;
        debug!(node = %descriptor.name, node_id = %id.short(), "derived node id");
        self.node_memo.insert(canonical, id);
        Ok(id)
    }

    pub async fn edge_id(
        &self,
        subject_id: &Identifier,
        predicate_id: &Identifier,
        object_id: &Identifier,
    ) -> LedgerResult<Identifier> {
        let key = edge_key(subject_id, predicate_id, object_id);
        if let Some(hit) = self.edge_memo.get(&key) {
            return Ok(*hit);
        }

        let id = self
            .reader
            .derive_edge_id(subject_id, predicate_id, object_id)
            .await
            .map_err(addressing_unavailable)?;
        self.edge_memo.insert(key, id);
        Ok(id)
    }

    pub fn memoized_nodes(&self) -> usize {
        self.node_memo.len()
    }
}

fn edge_key(s: &Identifier, p: &Identifier, o: &Identifier) -> EdgeKey {
    let mut key = [0u8; IDENTIFIER_LEN * 3];
    key[..IDENTIFIER_LEN].copy_from_slice(s.as_bytes());
    key[IDENTIFIER_LEN..IDENTIFIER_LEN * 2].copy_from_slice(p.as_bytes());
    key[IDENTIFIER_LEN * 2..].copy_from_slice(o.as_bytes());
    key
}

fn addressing_unavailable(err: LedgerError) -> LedgerError {
    match err {
        LedgerError::AddressingUnavailable(_) => err,
        other => LedgerError::AddressingUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SandboxLedger;

    #[tokio::test]
    async fn node_id_is_deterministic_and_memoized() {
        let ledger = Arc::new(SandboxLedger::new("0xwallet"));
        let addressor = ContentAddressor::new(ledger.clone());
        let d = NodeDescriptor::new("SiteX").with_url("https://x.example");

        let first = addressor.node_id(&d).await.unwrap();
        let second = addressor.node_id(&d).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(ledger.read_calls("derive_node_id"), 1);
        assert_eq!(addressor.memoized_nodes(), 1);
    }

    #[tokio::test]
    async fn ids_match_ledger_derivation() {
        let ledger = Arc::new(SandboxLedger::new("0xwallet"));
        let addressor = ContentAddressor::new(ledger.clone());
        let d = NodeDescriptor::new("I");
        let local = addressor.node_id(&d).await.unwrap();
        let remote = ledger.derive_node_id(&d.canonical_bytes()).await.unwrap();
        assert_eq!(local, remote);
    }

    #[tokio::test]
    async fn outage_surfaces_as_addressing_unavailable() {
        let ledger = Arc::new(SandboxLedger::new("0xwallet"));
        ledger.faults().set_network_down(true);
        let addressor = ContentAddressor::new(ledger.clone());

        let err = addressor.node_id(&NodeDescriptor::new("I")).await.unwrap_err();
        assert!(matches!(err, LedgerError::AddressingUnavailable(_)));
        assert_eq!(addressor.memoized_nodes(), 0);
    }
}

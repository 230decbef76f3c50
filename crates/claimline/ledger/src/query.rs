//! Existence checks against the ledger.
//!
//! An edge only counts as existing when the ledger returns a stored record whose
//! subject, predicate and object all match the ids we derived. Anything else is
//! treated as absent and, when a record came back with other endpoints, reported
//! as an identifier collision.

use crate::{ContentAddressor, LedgerError, LedgerReader, LedgerResult};
use claimline_types::{Amount, Identifier};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mismatch between the ids we asked about and the record the ledger returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierCollision {
    pub edge_id: Identifier,
    pub expected: [Identifier; 3],
    /// Raw stored endpoint fields, as the ledger returned them.
    pub stored: [String; 3],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeExistence {
    pub exists: bool,
    pub edge_id: Identifier,
    pub collision: Option<IdentifierCollision>,
}

impl EdgeExistence {
    fn absent(edge_id: Identifier) -> Self {
        Self {
            exists: false,
            edge_id,
            collision: None,
        }
    }
}

pub struct LedgerQuery {
    reader: Arc<dyn LedgerReader>,
    addressor: Arc<ContentAddressor>,
}

impl LedgerQuery {
    pub fn new(reader: Arc<dyn LedgerReader>) -> Self {
        let addressor = Arc::new(ContentAddressor::new(reader.clone()));
        Self::with_addressor(reader, addressor)
    }

    /// Share an addressor (and its memo) with other components.
    pub fn with_addressor(reader: Arc<dyn LedgerReader>, addressor: Arc<ContentAddressor>) -> Self {
        Self { reader, addressor }
    }

    pub fn addressor(&self) -> &Arc<ContentAddressor> {
        &self.addressor
    }

    /// A reverted existence read means "no such node".
    pub async fn exists_node(&self, node_id: &Identifier) -> LedgerResult<bool> {
        match self.reader.node_exists(node_id).await {
            Ok(exists) => Ok(exists),
            Err(LedgerError::Reverted(reason)) => {
                debug!(node_id = %node_id.short(), %reason, "node existence read reverted; treating as absent");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Derive the edge id for the triple and check the ledger's stored record.
    pub async fn exists_edge(
        &self,
        subject_id: &Identifier,
        predicate_id: &Identifier,
        object_id: &Identifier,
    ) -> LedgerResult<EdgeExistence> {
        let edge_id = self.addressor.edge_id(subject_id, predicate_id, object_id).await?;
        let stored = match self.reader.fetch_edge(&edge_id).await {
            Ok(stored) => stored,
            Err(LedgerError::NotFound(_)) | Err(LedgerError::Reverted(_)) => {
                return Ok(EdgeExistence::absent(edge_id));
            }
            Err(err) => return Err(err),
        };

        let expected = [*subject_id, *predicate_id, *object_id];
        let raw = [stored.subject_id, stored.predicate_id, stored.object_id];
        let matches = raw
            .iter()
            .zip(expected.iter())
            .all(|(raw, want)| raw.parse::<Identifier>().map(|got| got == *want).unwrap_or(false));

        if matches {
            return Ok(EdgeExistence {
                exists: true,
                edge_id,
                collision: None,
            });
        }

        warn!(
            edge_id = %edge_id,
            expected_subject = %subject_id,
            expected_predicate = %predicate_id,
            expected_object = %object_id,
            stored_subject = %raw[0],
            stored_predicate = %raw[1],
            stored_object = %raw[2],
            "identifier collision: stored edge fields do not match"
        );
        Ok(EdgeExistence {
            exists: false,
            edge_id,
            collision: Some(IdentifierCollision {
                edge_id,
                expected,
                stored: raw,
            }),
        })
    }

    pub async fn node_creation_cost(&self) -> LedgerResult<Amount> {
        self.reader.node_creation_cost().await
    }

    pub async fn edge_creation_cost(&self) -> LedgerResult<Amount> {
        self.reader.edge_creation_cost().await
    }

    pub async fn total_creation_cost(&self, count: u64, base_cost: &Amount) -> LedgerResult<Amount> {
        self.reader.total_creation_cost(count, base_cost).await
    }

    pub async fn total_deposit_cost(&self, deposit: &Amount) -> LedgerResult<Amount> {
        self.reader.total_deposit_cost(deposit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LedgerReader, SandboxLedger, StoredEdge};

    fn id(byte: u8) -> Identifier {
        Identifier::from_bytes([byte; 32])
    }

    async fn edge_id(ledger: &SandboxLedger, s: u8, p: u8, o: u8) -> Identifier {
        ledger.derive_edge_id(&id(s), &id(p), &id(o)).await.unwrap()
    }

    #[tokio::test]
    async fn missing_edge_is_absent_without_collision() {
        let ledger = Arc::new(SandboxLedger::new("0xwallet"));
        let query = LedgerQuery::new(ledger.clone());
        let found = query.exists_edge(&id(1), &id(2), &id(3)).await.unwrap();
        assert!(!found.exists);
        assert!(found.collision.is_none());
        assert_eq!(found.edge_id, edge_id(&ledger, 1, 2, 3).await);
    }

    #[tokio::test]
    async fn matching_fields_accept_any_hex_rendering() {
        let ledger = Arc::new(SandboxLedger::new("0xwallet"));
        let edge = edge_id(&ledger, 0xab, 2, 3).await;
        ledger.inject_edge_record(
            edge,
            StoredEdge {
                subject_id: id(0xab).to_hex().to_uppercase().replacen("0X", "0x", 1),
                predicate_id: id(2).to_hex().trim_start_matches("0x").to_string(),
                object_id: id(3).to_hex(),
            },
        );
        let query = LedgerQuery::new(ledger);
        let found = query.exists_edge(&id(0xab), &id(2), &id(3)).await.unwrap();
        assert!(found.exists);
    }

    #[tokio::test]
    async fn mismatched_fields_report_collision() {
        let ledger = Arc::new(SandboxLedger::new("0xwallet"));
        let edge = edge_id(&ledger, 1, 2, 3).await;
        ledger.inject_edge_record(
            edge,
            StoredEdge {
                subject_id: id(1).to_hex(),
                predicate_id: id(2).to_hex(),
                object_id: id(4).to_hex(),
            },
        );
        let query = LedgerQuery::new(ledger);
        let found = query.exists_edge(&id(1), &id(2), &id(3)).await.unwrap();
        assert!(!found.exists);
        let collision = found.collision.unwrap();
        assert_eq!(collision.stored[2], id(4).to_hex());
    }

    #[tokio::test]
    async fn garbage_stored_field_is_a_collision() {
        let ledger = Arc::new(SandboxLedger::new("0xwallet"));
        let edge = edge_id(&ledger, 1, 2, 3).await;
        ledger.inject_edge_record(
            edge,
            StoredEdge {
                subject_id: "not-hex".into(),
                predicate_id: id(2).to_hex(),
                object_id: id(3).to_hex(),
            },
        );
        let query = LedgerQuery::new(ledger);
        let found = query.exists_edge(&id(1), &id(2), &id(3)).await.unwrap();
        assert!(!found.exists);
        assert!(found.collision.is_some());
    }

    #[tokio::test]
    async fn network_errors_propagate() {
        let ledger = Arc::new(SandboxLedger::new("0xwallet"));
        ledger.faults().fail_reads(1);
        let query = LedgerQuery::new(ledger);
        let err = query.exists_node(&id(1)).await.unwrap_err();
        assert!(err.is_transient());
    }
}

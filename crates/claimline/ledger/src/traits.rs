use crate::LedgerResult;
use async_trait::async_trait;
use claimline_types::{Amount, Identifier, LedgerCall, TxRef};
use serde::{Deserialize, Serialize};

/// Edge record as returned by the ledger's record fetch.
///
/// Endpoint ids are kept in the ledger's raw textual form; callers normalize
/// before comparing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEdge {
    pub subject_id: String,
    pub predicate_id: String,
    pub object_id: String,
}

/// Read-only RPC surface of the ledger.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// The ledger's own node-id derivation over a canonical descriptor encoding.
    async fn derive_node_id(&self, canonical: &[u8]) -> LedgerResult<Identifier>;

    /// The ledger's own edge-id combination function.
    async fn derive_edge_id(
        &self,
        subject_id: &Identifier,
        predicate_id: &Identifier,
        object_id: &Identifier,
    ) -> LedgerResult<Identifier>;

    async fn node_exists(&self, node_id: &Identifier) -> LedgerResult<bool>;

    /// Full stored record for `edge_id`; `NotFound` (or a revert) when absent.
    async fn fetch_edge(&self, edge_id: &Identifier) -> LedgerResult<StoredEdge>;

    async fn node_creation_cost(&self) -> LedgerResult<Amount>;

    async fn edge_creation_cost(&self) -> LedgerResult<Amount>;

    async fn total_creation_cost(&self, count: u64, base_cost: &Amount) -> LedgerResult<Amount>;

    async fn total_deposit_cost(&self, deposit: &Amount) -> LedgerResult<Amount>;

    /// Whether `create_nodes` accepts more than one descriptor per call.
    fn supports_batch_creation(&self) -> bool {
        true
    }
}

/// Final status of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Reverted { reason: String },
}

/// Decoded return value of a confirmed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CallOutput {
    None,
    NodeIds(Vec<Identifier>),
    EdgeId(Identifier),
    Shares(Amount),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_ref: TxRef,
    pub status: ReceiptStatus,
    pub output: CallOutput,
}

/// Wallet/signing surface: signs and submits calls built by the engine.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Authorized sender address.
    fn sender(&self) -> &str;

    async fn balance(&self) -> LedgerResult<Amount>;

    /// Sign and broadcast; a pre-flight rejection surfaces as `Reverted`.
    async fn submit(&self, call: &LedgerCall) -> LedgerResult<TxRef>;

    /// Resolve once the transaction is included. Callers bound the wait.
    async fn wait_for_receipt(&self, tx_ref: &TxRef) -> LedgerResult<Receipt>;
}

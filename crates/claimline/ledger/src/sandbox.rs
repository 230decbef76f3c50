//! In-process ledger.
//!
//! `SandboxLedger` implements both [`LedgerReader`] and [`TransactionSubmitter`]
//! over a single mutex-guarded state. It applies calls when they are submitted
//! and hands the receipt out on confirmation, which is enough to reproduce the
//! races the commit engine has to survive: another writer creating the edge
//! first, reverts, slow or missing confirmations and RPC outages.
//!
//! State can be snapshotted to JSON so offline tooling keeps a ledger across runs.

use crate::{CallOutput, LedgerError, LedgerReader, LedgerResult, Receipt, ReceiptStatus, StoredEdge, TransactionSubmitter};
use async_trait::async_trait;
use claimline_types::{Amount, CreateEdgeArgs, CreateNodesArgs, DepositArgs, Identifier, LedgerCall, NodeDescriptor, TxRef};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

const NODE_DOMAIN: &[u8] = b"claimline.node.v1";
const EDGE_DOMAIN: &[u8] = b"claimline.edge.v1";
const TX_DOMAIN: &[u8] = b"claimline.tx.v1";

/// Revert reasons the sandbox emits.
pub mod reverts {
    pub const NODE_ALREADY_EXISTS: &str = "NodeAlreadyExists";
    pub const EDGE_ALREADY_EXISTS: &str = "EdgeAlreadyExists";
    pub const NODE_NOT_FOUND: &str = "NodeNotFound";
    pub const EDGE_NOT_FOUND: &str = "EdgeNotFound";
    pub const INSUFFICIENT_VALUE: &str = "InsufficientValue";
    pub const INSUFFICIENT_BALANCE: &str = "InsufficientBalance";
    pub const BATCH_UNSUPPORTED: &str = "BatchCreationUnsupported";
}

/// Fee parameters of the sandbox's fee views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub node_creation_cost: Amount,
    pub edge_creation_cost: Amount,
    /// Added per created entity on top of the base cost.
    pub creation_fixed_fee: Amount,
    /// Flat fee per deposit.
    pub entry_fee: Amount,
    /// Proportional deposit fee in basis points.
    pub protocol_fee_bps: u64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            node_creation_cost: Amount::from(1_000_000_000_000_000u64),
            edge_creation_cost: Amount::from(2_000_000_000_000_000u64),
            creation_fixed_fee: Amount::from(100_000_000_000_000u64),
            entry_fee: Amount::from(50_000_000_000_000u64),
            protocol_fee_bps: 100,
        }
    }
}

impl FeeSchedule {
    pub fn creation_cost(&self, count: u64, base_cost: &Amount) -> Amount {
        (base_cost + &self.creation_fixed_fee).mul_u64(count)
    }

    pub fn deposit_cost(&self, deposit: &Amount) -> Amount {
        let protocol = deposit.mul_ratio_floor(self.protocol_fee_bps, 10_000);
        &(deposit + &self.entry_fee) + &protocol
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxEdge {
    pub record: StoredEdge,
    pub shares: Amount,
}

/// Serializable sandbox state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxState {
    pub schedule: FeeSchedule,
    pub nodes: BTreeMap<Identifier, NodeDescriptor>,
    pub edges: BTreeMap<Identifier, SandboxEdge>,
    pub balances: BTreeMap<String, Amount>,
    pub receipts: BTreeMap<String, Receipt>,
    pub nonce: u64,
}

/// Fault injection switches.
#[derive(Debug, Default)]
pub struct SandboxFaults {
    network_down: AtomicBool,
    addressing_down: AtomicBool,
    failing_reads: AtomicU32,
    failing_submits: AtomicU32,
    withhold_confirmations: AtomicBool,
    next_revert: Mutex<Option<String>>,
    confirmation_delay: Mutex<Duration>,
}

impl SandboxFaults {
    /// Every read and submit fails with a network error until cleared.
    pub fn set_network_down(&self, down: bool) {
        self.network_down.store(down, Ordering::SeqCst);
    }

    /// Id derivation fails while every other read keeps working.
    pub fn set_addressing_down(&self, down: bool) {
        self.addressing_down.store(down, Ordering::SeqCst);
    }

    /// The next `count` existence, fee and balance reads fail with a network error.
    pub fn fail_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// The next `count` submits fail with a network error before broadcast.
    pub fn fail_submits(&self, count: u32) {
        self.failing_submits.store(count, Ordering::SeqCst);
    }

    /// The next submitted call is mined as reverted with `reason` and has no effect.
    pub fn revert_next_submit(&self, reason: impl Into<String>) {
        *lock(&self.next_revert) = Some(reason.into());
    }

    /// Receipts never arrive while set.
    pub fn withhold_confirmations(&self, withhold: bool) {
        self.withhold_confirmations.store(withhold, Ordering::SeqCst);
    }

    pub fn set_confirmation_delay(&self, delay: Duration) {
        *lock(&self.confirmation_delay) = delay;
    }

    fn check_read(&self, op: &str) -> LedgerResult<()> {
        if self.network_down.load(Ordering::SeqCst) || take_one(&self.failing_reads) {
            return Err(LedgerError::Network(format!("{op}: connection refused")));
        }
        Ok(())
    }

    fn check_derivation(&self, op: &str) -> LedgerResult<()> {
        if self.network_down.load(Ordering::SeqCst) {
            return Err(LedgerError::Network(format!("{op}: connection refused")));
        }
        if self.addressing_down.load(Ordering::SeqCst) {
            return Err(LedgerError::AddressingUnavailable("derivation view offline".into()));
        }
        Ok(())
    }

    fn check_submit(&self) -> LedgerResult<()> {
        if self.network_down.load(Ordering::SeqCst) || take_one(&self.failing_submits) {
            return Err(LedgerError::Network("submit: connection reset".into()));
        }
        Ok(())
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SandboxLedger {
    sender: String,
    state: Mutex<SandboxState>,
    faults: SandboxFaults,
    batch_creation: AtomicBool,
    reads: DashMap<&'static str, u64>,
    submitted: Mutex<Vec<LedgerCall>>,
}

impl SandboxLedger {
    /// Default starting balance for a fresh sender.
    pub const DEFAULT_BALANCE: u128 = 1_000_000_000_000_000_000_000;

    pub fn new(sender: impl Into<String>) -> Self {
        Self::with_schedule(sender, FeeSchedule::default())
    }

    pub fn with_schedule(sender: impl Into<String>, schedule: FeeSchedule) -> Self {
        let sender = sender.into();
        let mut state = SandboxState {
            schedule,
            ..SandboxState::default()
        };
        state
            .balances
            .insert(sender.clone(), Amount::from(Self::DEFAULT_BALANCE));
        Self::from_state(sender, state)
    }

    /// Rebuild from a snapshot. A sender missing from the snapshot starts at zero.
    pub fn from_state(sender: impl Into<String>, state: SandboxState) -> Self {
        Self {
            sender: sender.into(),
            state: Mutex::new(state),
            faults: SandboxFaults::default(),
            batch_creation: AtomicBool::new(true),
            reads: DashMap::new(),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> SandboxState {
        lock(&self.state).clone()
    }

    pub fn faults(&self) -> &SandboxFaults {
        &self.faults
    }

    pub fn set_batch_creation(&self, enabled: bool) {
        self.batch_creation.store(enabled, Ordering::SeqCst);
    }

    pub fn set_balance(&self, account: &str, amount: Amount) {
        lock(&self.state).balances.insert(account.to_string(), amount);
    }

    pub fn balance_of(&self, account: &str) -> Amount {
        lock(&self.state)
            .balances
            .get(account)
            .cloned()
            .unwrap_or_default()
    }

    /// Register a node directly, as if some earlier writer had created it.
    pub fn seed_node(&self, descriptor: &NodeDescriptor) -> Identifier {
        let id = node_id_for(&descriptor.canonical_bytes());
        lock(&self.state).nodes.insert(id, descriptor.clone());
        id
    }

    /// Another writer creates the edge (and any missing endpoint ids) outside our wallet.
    pub fn external_create_edge(
        &self,
        subject_id: &Identifier,
        predicate_id: &Identifier,
        object_id: &Identifier,
        deposit: Amount,
    ) -> Identifier {
        let edge_id = edge_id_for(subject_id, predicate_id, object_id);
        lock(&self.state).edges.insert(
            edge_id,
            SandboxEdge {
                record: StoredEdge {
                    subject_id: subject_id.to_hex(),
                    predicate_id: predicate_id.to_hex(),
                    object_id: object_id.to_hex(),
                },
                shares: deposit,
            },
        );
        edge_id
    }

    /// Store an arbitrary record under `edge_id`, colliding or not.
    pub fn inject_edge_record(&self, edge_id: Identifier, record: StoredEdge) {
        lock(&self.state).edges.insert(
            edge_id,
            SandboxEdge {
                record,
                shares: Amount::zero(),
            },
        );
    }

    pub fn has_node(&self, node_id: &Identifier) -> bool {
        lock(&self.state).nodes.contains_key(node_id)
    }

    pub fn edge_shares(&self, edge_id: &Identifier) -> Option<Amount> {
        lock(&self.state).edges.get(edge_id).map(|e| e.shares.clone())
    }

    pub fn node_count(&self) -> usize {
        lock(&self.state).nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        lock(&self.state).edges.len()
    }

    /// Every call that reached the mempool, in order.
    pub fn submitted_calls(&self) -> Vec<LedgerCall> {
        lock(&self.submitted).clone()
    }

    pub fn creation_writes(&self) -> usize {
        lock(&self.submitted).iter().filter(|c| c.is_creation()).count()
    }

    pub fn deposit_writes(&self) -> usize {
        lock(&self.submitted)
            .iter()
            .filter(|c| matches!(c, LedgerCall::Deposit(_)))
            .count()
    }

    pub fn read_calls(&self, op: &str) -> u64 {
        self.reads.get(op).map(|n| *n).unwrap_or(0)
    }

    fn record_read(&self, op: &'static str) -> LedgerResult<()> {
        *self.reads.entry(op).or_insert(0) += 1;
        self.faults.check_read(op)
    }

    /// Derivations only fail on a full outage; `fail_reads` leaves them alone.
    fn record_derivation(&self, op: &'static str) -> LedgerResult<()> {
        *self.reads.entry(op).or_insert(0) += 1;
        self.faults.check_derivation(op)
    }

    fn execute(&self, state: &mut SandboxState, call: &LedgerCall) -> Result<CallOutput, String> {
        let balance = state.balances.get(&self.sender).cloned().unwrap_or_default();
        let value = call.value();
        let remaining = balance
            .checked_sub(value)
            .ok_or_else(|| reverts::INSUFFICIENT_BALANCE.to_string())?;

        let output = match call {
            LedgerCall::CreateNodes(args) => self.create_nodes(state, args)?,
            LedgerCall::CreateEdge(args) => create_edge(state, args)?,
            LedgerCall::Deposit(args) => deposit(state, args)?,
        };

        state.balances.insert(self.sender.clone(), remaining);
        Ok(output)
    }

    fn create_nodes(&self, state: &mut SandboxState, args: &CreateNodesArgs) -> Result<CallOutput, String> {
        if args.descriptors.len() > 1 && !self.batch_creation.load(Ordering::SeqCst) {
            return Err(reverts::BATCH_UNSUPPORTED.into());
        }
        let required = state
            .schedule
            .creation_cost(args.descriptors.len() as u64, &state.schedule.node_creation_cost);
        if args.value < required {
            return Err(reverts::INSUFFICIENT_VALUE.into());
        }

        let mut ids = Vec::with_capacity(args.descriptors.len());
        for descriptor in &args.descriptors {
            let id = node_id_for(&descriptor.canonical_bytes());
            if state.nodes.contains_key(&id) || ids.contains(&id) {
                return Err(reverts::NODE_ALREADY_EXISTS.into());
            }
            ids.push(id);
        }
        for (id, descriptor) in ids.iter().zip(&args.descriptors) {
            state.nodes.insert(*id, descriptor.clone());
        }
        Ok(CallOutput::NodeIds(ids))
    }
}

fn create_edge(state: &mut SandboxState, args: &CreateEdgeArgs) -> Result<CallOutput, String> {
    for node in [&args.subject_id, &args.predicate_id, &args.object_id] {
        if !state.nodes.contains_key(node) {
            return Err(reverts::NODE_NOT_FOUND.into());
        }
    }
    let edge_id = edge_id_for(&args.subject_id, &args.predicate_id, &args.object_id);
    if state.edges.contains_key(&edge_id) {
        return Err(reverts::EDGE_ALREADY_EXISTS.into());
    }

    let schedule = &state.schedule;
    let required = &schedule.creation_cost(1, &schedule.edge_creation_cost) + &schedule.deposit_cost(&args.deposit);
    if args.value < required {
        return Err(reverts::INSUFFICIENT_VALUE.into());
    }

    state.edges.insert(
        edge_id,
        SandboxEdge {
            record: StoredEdge {
                subject_id: args.subject_id.to_hex(),
                predicate_id: args.predicate_id.to_hex(),
                object_id: args.object_id.to_hex(),
            },
            shares: args.deposit.clone(),
        },
    );
    Ok(CallOutput::EdgeId(edge_id))
}

fn deposit(state: &mut SandboxState, args: &DepositArgs) -> Result<CallOutput, String> {
    let required = state.schedule.deposit_cost(&args.amount);
    if args.value < required {
        return Err(reverts::INSUFFICIENT_VALUE.into());
    }
    let edge = state
        .edges
        .get_mut(&args.edge_id)
        .ok_or_else(|| reverts::EDGE_NOT_FOUND.to_string())?;
    edge.shares += &args.amount;
    Ok(CallOutput::Shares(args.amount.clone()))
}

fn node_id_for(canonical: &[u8]) -> Identifier {
    let mut hasher = blake3::Hasher::new();
    hasher.update(NODE_DOMAIN);
    hasher.update(canonical);
    Identifier::from_bytes(*hasher.finalize().as_bytes())
}

fn edge_id_for(s: &Identifier, p: &Identifier, o: &Identifier) -> Identifier {
    let mut hasher = blake3::Hasher::new();
    hasher.update(EDGE_DOMAIN);
    hasher.update(s.as_bytes());
    hasher.update(p.as_bytes());
    hasher.update(o.as_bytes());
    Identifier::from_bytes(*hasher.finalize().as_bytes())
}

fn tx_ref_for(sender: &str, nonce: u64) -> TxRef {
    let mut hasher = blake3::Hasher::new();
    hasher.update(TX_DOMAIN);
    hasher.update(sender.as_bytes());
    hasher.update(&nonce.to_be_bytes());
    TxRef::new(format!("0x{}", hasher.finalize().to_hex()))
}

#[async_trait]
impl LedgerReader for SandboxLedger {
    async fn derive_node_id(&self, canonical: &[u8]) -> LedgerResult<Identifier> {
        self.record_derivation("derive_node_id")?;
        Ok(node_id_for(canonical))
    }

    async fn derive_edge_id(
        &self,
        subject_id: &Identifier,
        predicate_id: &Identifier,
        object_id: &Identifier,
    ) -> LedgerResult<Identifier> {
        self.record_derivation("derive_edge_id")?;
        Ok(edge_id_for(subject_id, predicate_id, object_id))
    }

    async fn node_exists(&self, node_id: &Identifier) -> LedgerResult<bool> {
        self.record_read("node_exists")?;
        Ok(lock(&self.state).nodes.contains_key(node_id))
    }

    async fn fetch_edge(&self, edge_id: &Identifier) -> LedgerResult<StoredEdge> {
        self.record_read("fetch_edge")?;
        lock(&self.state)
            .edges
            .get(edge_id)
            .map(|e| e.record.clone())
            .ok_or_else(|| LedgerError::NotFound(format!("edge {edge_id}")))
    }

    async fn node_creation_cost(&self) -> LedgerResult<Amount> {
        self.record_read("node_creation_cost")?;
        Ok(lock(&self.state).schedule.node_creation_cost.clone())
    }

    async fn edge_creation_cost(&self) -> LedgerResult<Amount> {
        self.record_read("edge_creation_cost")?;
        Ok(lock(&self.state).schedule.edge_creation_cost.clone())
    }

    async fn total_creation_cost(&self, count: u64, base_cost: &Amount) -> LedgerResult<Amount> {
        self.record_read("total_creation_cost")?;
        Ok(lock(&self.state).schedule.creation_cost(count, base_cost))
    }

    async fn total_deposit_cost(&self, deposit: &Amount) -> LedgerResult<Amount> {
        self.record_read("total_deposit_cost")?;
        Ok(lock(&self.state).schedule.deposit_cost(deposit))
    }

    fn supports_batch_creation(&self) -> bool {
        self.batch_creation.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionSubmitter for SandboxLedger {
    fn sender(&self) -> &str {
        &self.sender
    }

    async fn balance(&self) -> LedgerResult<Amount> {
        self.record_read("balance")?;
        Ok(self.balance_of(&self.sender))
    }

    async fn submit(&self, call: &LedgerCall) -> LedgerResult<TxRef> {
        self.faults.check_submit()?;
        lock(&self.submitted).push(call.clone());

        let injected = lock(&self.faults.next_revert).take();
        let mut state = lock(&self.state);
        state.nonce += 1;
        let tx_ref = tx_ref_for(&self.sender, state.nonce);

        let outcome = match injected {
            Some(reason) => Err(reason),
            None => self.execute(&mut state, call),
        };
        let receipt = match outcome {
            Ok(output) => {
                info!(tx = %tx_ref, function = call.function(), value = %call.value(), "sandbox call applied");
                Receipt {
                    tx_ref: tx_ref.clone(),
                    status: ReceiptStatus::Success,
                    output,
                }
            }
            Err(reason) => {
                debug!(tx = %tx_ref, function = call.function(), %reason, "sandbox call reverted");
                Receipt {
                    tx_ref: tx_ref.clone(),
                    status: ReceiptStatus::Reverted { reason },
                    output: CallOutput::None,
                }
            }
        };
        state.receipts.insert(tx_ref.as_str().to_string(), receipt);
        Ok(tx_ref)
    }

    async fn wait_for_receipt(&self, tx_ref: &TxRef) -> LedgerResult<Receipt> {
        let delay = *lock(&self.faults.confirmation_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.faults.withhold_confirmations.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.faults.check_read("wait_for_receipt")?;
        lock(&self.state)
            .receipts
            .get(tx_ref.as_str())
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("receipt {tx_ref}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded() -> SandboxLedger {
        SandboxLedger::with_schedule(
            "0xwallet",
            FeeSchedule {
                node_creation_cost: Amount::from(10u64),
                edge_creation_cost: Amount::from(20u64),
                creation_fixed_fee: Amount::from(1u64),
                entry_fee: Amount::from(2u64),
                protocol_fee_bps: 0,
            },
        )
    }

    #[tokio::test]
    async fn create_nodes_then_edge_then_deposit() {
        let ledger = funded();
        let a = NodeDescriptor::new("I");
        let b = NodeDescriptor::new("like");
        let c = NodeDescriptor::new("SiteX");

        let tx = ledger
            .submit(&LedgerCall::CreateNodes(CreateNodesArgs {
                descriptors: vec![a.clone(), b.clone(), c.clone()],
                value: Amount::from(33u64),
            }))
            .await
            .unwrap();
        let receipt = ledger.wait_for_receipt(&tx).await.unwrap();
        let CallOutput::NodeIds(ids) = receipt.output else {
            panic!("expected node ids, got {:?}", receipt.status);
        };
        assert_eq!(ids.len(), 3);

        let tx = ledger
            .submit(&LedgerCall::CreateEdge(CreateEdgeArgs {
                subject_id: ids[0],
                predicate_id: ids[1],
                object_id: ids[2],
                deposit: Amount::from(100u64),
                value: Amount::from(123u64),
            }))
            .await
            .unwrap();
        let receipt = ledger.wait_for_receipt(&tx).await.unwrap();
        let CallOutput::EdgeId(edge_id) = receipt.output else {
            panic!("expected edge id, got {:?}", receipt.status);
        };

        let tx = ledger
            .submit(&LedgerCall::Deposit(DepositArgs {
                edge_id,
                amount: Amount::from(50u64),
                value: Amount::from(52u64),
            }))
            .await
            .unwrap();
        assert_eq!(ledger.wait_for_receipt(&tx).await.unwrap().status, ReceiptStatus::Success);
        assert_eq!(ledger.edge_shares(&edge_id), Some(Amount::from(150u64)));
        assert_eq!(ledger.creation_writes(), 2);
        assert_eq!(ledger.deposit_writes(), 1);
    }

    #[tokio::test]
    async fn duplicate_node_reverts_whole_batch() {
        let ledger = funded();
        ledger.seed_node(&NodeDescriptor::new("I"));
        let tx = ledger
            .submit(&LedgerCall::CreateNodes(CreateNodesArgs {
                descriptors: vec![NodeDescriptor::new("I"), NodeDescriptor::new("SiteX")],
                value: Amount::from(22u64),
            }))
            .await
            .unwrap();
        let receipt = ledger.wait_for_receipt(&tx).await.unwrap();
        assert_eq!(
            receipt.status,
            ReceiptStatus::Reverted {
                reason: reverts::NODE_ALREADY_EXISTS.into()
            }
        );
        assert_eq!(ledger.node_count(), 1);
    }

    #[tokio::test]
    async fn underpaid_call_reverts_without_debit() {
        let ledger = funded();
        let before = ledger.balance_of("0xwallet");
        let tx = ledger
            .submit(&LedgerCall::CreateNodes(CreateNodesArgs {
                descriptors: vec![NodeDescriptor::new("I")],
                value: Amount::from(1u64),
            }))
            .await
            .unwrap();
        let receipt = ledger.wait_for_receipt(&tx).await.unwrap();
        assert!(matches!(receipt.status, ReceiptStatus::Reverted { .. }));
        assert_eq!(ledger.balance_of("0xwallet"), before);
    }

    #[tokio::test]
    async fn snapshot_restores_state() {
        let ledger = funded();
        let id = ledger.seed_node(&NodeDescriptor::new("I"));
        let json = serde_json::to_string(&ledger.snapshot()).unwrap();

        let state: SandboxState = serde_json::from_str(&json).unwrap();
        let restored = SandboxLedger::from_state("0xwallet", state);
        assert!(restored.has_node(&id));
        assert_eq!(restored.balance_of("0xwallet"), ledger.balance_of("0xwallet"));
    }

    #[tokio::test]
    async fn failing_submits_never_reach_the_mempool() {
        let ledger = funded();
        ledger.faults().fail_submits(1);
        let call = LedgerCall::Deposit(DepositArgs {
            edge_id: Identifier::from_bytes([1; 32]),
            amount: Amount::from(1u64),
            value: Amount::from(3u64),
        });
        assert!(ledger.submit(&call).await.unwrap_err().is_transient());
        assert!(ledger.submitted_calls().is_empty());
        assert!(ledger.submit(&call).await.is_ok());
    }
}

//! Commit orchestrator.
//!
//! One claim moves through verification (resolve ids, check existence, plan the
//! minimal writes, quote), then commit (fresh quote, balance check, node
//! creation, edge creation or deposit, bounded confirmation wait). The ledger is
//! re-read at every step that spends money; local state only remembers which
//! nodes are already known to exist.

use crate::classify::{RevertClass, RevertClassifier};
use crate::inflight::{InFlightCommits, InFlightOp, Slot};
use crate::retry::with_retry;
use crate::{EngineConfig, EngineError, EngineResult, PredicateTable};
use chrono::{DateTime, Utc};
use claimline_ledger::{
    CallOutput, ContentAddressor, EdgeExistence, FeeCalculator, LedgerError, LedgerQuery, LedgerReader, Receipt,
    ReceiptStatus, TransactionSubmitter,
};
use claimline_store::{ClaimStore, StoreError};
use claimline_types::{
    Amount, CandidateClaim, ClaimId, ClaimRecord, ClaimStatus, CommitPlan, CostQuote, CreateEdgeArgs, CreateNodesArgs,
    DepositArgs, EdgeAction, FailureKind, Identifier, LedgerCall, NodeRole, PlannedNode, ResolvedNodes, TxRef,
};
use dashmap::DashSet;
use futures::future::{join_all, FutureExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitMode {
    Commit,
    Retry,
}

/// Result of [`CommitEngine::recover`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Verifying claims that reached Ready again.
    pub reverified: Vec<ClaimId>,
    /// Interrupted commits whose edge turned out to be on the ledger.
    pub reclassified: Vec<ClaimId>,
    /// Interrupted commits marked Failed for an explicit retry.
    pub failed: Vec<ClaimId>,
    pub errors: Vec<(ClaimId, String)>,
}

/// An earlier attempt that was submitted but never confirmed.
#[derive(Debug, Clone)]
struct PendingAttempt {
    tx_ref: TxRef,
    plan: CommitPlan,
}

impl PendingAttempt {
    fn from_record(record: &ClaimRecord) -> Option<Self> {
        let unconfirmed = match record.status {
            ClaimStatus::Committing => true,
            ClaimStatus::Failed => matches!(
                record.last_error.as_ref().map(|e| e.kind),
                Some(FailureKind::ConfirmationTimeout | FailureKind::Interrupted)
            ),
            _ => false,
        };
        if !unconfirmed {
            return None;
        }
        Some(Self {
            tx_ref: record.transaction_ref.clone()?,
            plan: record.plan.clone()?,
        })
    }
}

enum Submission {
    Confirmed(Receipt),
    Reverted { tx_ref: Option<TxRef>, reason: String },
}

enum Settlement {
    Created { edge_id: Identifier, tx_ref: TxRef },
    Deposited { edge_id: Identifier, tx_ref: TxRef, shares: Option<Amount> },
    AlreadyExisted { edge_id: Identifier, tx_ref: Option<TxRef> },
}

/// Why an attempt stopped. `kind: None` leaves the claim in Committing.
struct AttemptError {
    kind: Option<FailureKind>,
    error: EngineError,
}

impl AttemptError {
    fn failed(kind: FailureKind, error: EngineError) -> Self {
        Self {
            kind: Some(kind),
            error,
        }
    }

    /// Failures before anything was broadcast.
    fn ledger(err: LedgerError) -> Self {
        Self::failed(FailureKind::Network, err.into())
    }

    fn reverted(claim_id: &ClaimId, reason: String) -> Self {
        Self::failed(
            FailureKind::TransactionReverted,
            EngineError::TransactionReverted {
                claim_id: claim_id.clone(),
                reason,
            },
        )
    }
}

impl From<StoreError> for AttemptError {
    fn from(err: StoreError) -> Self {
        Self {
            kind: None,
            error: err.into(),
        }
    }
}

/// Drives claims from detection to a settled ledger state.
#[derive(Clone)]
pub struct CommitEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    store: Arc<ClaimStore>,
    reader: Arc<dyn LedgerReader>,
    submitter: Arc<dyn TransactionSubmitter>,
    addressor: Arc<ContentAddressor>,
    query: Arc<LedgerQuery>,
    fees: FeeCalculator,
    predicates: PredicateTable,
    classifier: RevertClassifier,
    known_nodes: DashSet<Identifier>,
    inflight: InFlightCommits,
}

impl CommitEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<ClaimStore>,
        reader: Arc<dyn LedgerReader>,
        submitter: Arc<dyn TransactionSubmitter>,
        predicates: PredicateTable,
    ) -> Self {
        let addressor = Arc::new(ContentAddressor::new(Arc::clone(&reader)));
        let query = Arc::new(LedgerQuery::with_addressor(Arc::clone(&reader), Arc::clone(&addressor)));
        let fees = FeeCalculator::new(Arc::clone(&query));
        let classifier = RevertClassifier::new(config.already_exists_reasons.as_slice());

        let known_nodes = DashSet::new();
        for (_, id) in predicates.iter() {
            known_nodes.insert(*id);
        }

        Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                reader,
                submitter,
                addressor,
                query,
                fees,
                predicates,
                classifier,
                known_nodes,
                inflight: InFlightCommits::default(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn predicates(&self) -> &PredicateTable {
        &self.inner.predicates
    }

    /// Read-only view for display layers.
    pub fn store(&self) -> &ClaimStore {
        &self.inner.store
    }

    pub fn is_in_flight(&self, claim_id: &ClaimId) -> bool {
        self.inner.inflight.contains(claim_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.inflight.len()
    }

    /// Record a candidate as Detected, or return the unsettled claim it duplicates.
    ///
    /// Only claims still in progress absorb a duplicate; settled and failed ones
    /// do not.
    pub async fn observe(&self, candidate: CandidateClaim) -> EngineResult<ClaimRecord> {
        self.inner.observe(candidate).await
    }

    /// Detected/Verifying/Ready → Ready with a fresh plan and quote.
    ///
    /// Holds the claim's in-flight slot, so a commit started meanwhile waits for
    /// the verification instead of racing it.
    pub async fn verify(&self, claim_id: &ClaimId) -> EngineResult<ClaimRecord> {
        let engine = Arc::clone(&self.inner);
        let id = claim_id.clone();
        let slot = self.inner.inflight.join_or_start(claim_id, InFlightOp::Verify, move |release| {
            async move {
                let _release = release;
                engine.verify(&id).await
            }
            .boxed()
        })?;
        match slot {
            Slot::Started(handle) | Slot::Joined(InFlightOp::Verify, handle) => handle.await,
            Slot::Joined(InFlightOp::Commit, _) => Err(EngineError::InvalidState {
                claim_id: claim_id.clone(),
                status: ClaimStatus::Committing,
                action: "verify while a commit is in flight",
            }),
        }
    }

    /// Commit a claim, verifying it first if needed. Concurrent callers for the
    /// same id share one attempt and observe the same outcome.
    pub async fn commit(&self, claim_id: &ClaimId) -> EngineResult<ClaimRecord> {
        Arc::clone(&self.inner).start(claim_id.clone(), CommitMode::Commit).await
    }

    /// Failed → Verifying → Ready → commit. Re-verification is never skipped.
    pub async fn retry(&self, claim_id: &ClaimId) -> EngineResult<ClaimRecord> {
        Arc::clone(&self.inner).start(claim_id.clone(), CommitMode::Retry).await
    }

    /// Commit every Ready claim concurrently.
    pub async fn commit_ready(&self) -> Vec<(ClaimId, EngineResult<ClaimRecord>)> {
        let ready: Vec<ClaimId> = self
            .inner
            .store
            .load_all()
            .await
            .into_iter()
            .filter(|r| r.status == ClaimStatus::Ready)
            .map(|r| r.claim_id)
            .collect();
        info!(claims = ready.len(), "committing ready claims");

        let results = join_all(ready.iter().map(|id| self.commit(id))).await;
        ready.into_iter().zip(results).collect()
    }

    /// Re-verify claims left in Verifying and reconcile claims left in Committing.
    pub async fn recover(&self) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        for record in self.inner.store.load_all().await {
            let claim_id = record.claim_id;
            let result = match record.status {
                ClaimStatus::Verifying => self.verify(&claim_id).await,
                ClaimStatus::Committing => self.commit(&claim_id).await,
                _ => continue,
            };
            match result {
                Ok(updated) if updated.status.is_success() => report.reclassified.push(claim_id),
                Ok(updated) if updated.status == ClaimStatus::Failed => report.failed.push(claim_id),
                Ok(_) => report.reverified.push(claim_id),
                Err(err) => {
                    warn!(claim_id = %claim_id, error = %err, "recovery left claim unresolved");
                    report.errors.push((claim_id, err.to_string()));
                }
            }
        }
        info!(
            reverified = report.reverified.len(),
            reclassified = report.reclassified.len(),
            failed = report.failed.len(),
            errors = report.errors.len(),
            "recovery finished"
        );
        report
    }

    pub async fn get(&self, claim_id: &ClaimId) -> Option<ClaimRecord> {
        self.inner.store.get(claim_id).await
    }

    pub async fn records(&self) -> Vec<ClaimRecord> {
        self.inner.store.load_all().await
    }

    /// Delete one claim at the user's request.
    pub async fn remove(&self, claim_id: &ClaimId) -> EngineResult<ClaimRecord> {
        if self.inner.inflight.contains(claim_id) {
            return Err(EngineError::InvalidState {
                claim_id: claim_id.clone(),
                status: ClaimStatus::Committing,
                action: "remove while a commit is in flight",
            });
        }
        self.inner.store.remove(claim_id).await.map_err(|err| match err {
            StoreError::NotFound(_) => EngineError::ClaimNotFound(claim_id.clone()),
            other => other.into(),
        })
    }

    /// Drop settled claims last updated before `cutoff`.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> EngineResult<usize> {
        Ok(self.inner.store.prune_before(cutoff).await?)
    }

    pub async fn clear(&self) -> EngineResult<()> {
        Ok(self.inner.store.clear().await?)
    }
}

impl EngineInner {
    async fn start(self: Arc<Self>, claim_id: ClaimId, mode: CommitMode) -> EngineResult<ClaimRecord> {
        loop {
            let engine = Arc::clone(&self);
            let id = claim_id.clone();
            let slot = self.inflight.join_or_start(&claim_id, InFlightOp::Commit, move |release| {
                async move {
                    let _release = release;
                    engine.run(id, mode).await
                }
                .boxed()
            })?;
            match slot {
                Slot::Started(handle) => return handle.await,
                Slot::Joined(InFlightOp::Commit, handle) => {
                    debug!(claim_id = %claim_id, "commit already in flight; awaiting its outcome");
                    return handle.await;
                }
                Slot::Joined(InFlightOp::Verify, handle) => {
                    debug!(claim_id = %claim_id, "waiting for verification before committing");
                    // the commit re-reads the record, so only the wait matters here
                    let _ = handle.await;
                }
            }
        }
    }

    async fn observe(&self, candidate: CandidateClaim) -> EngineResult<ClaimRecord> {
        if !self.predicates.contains(&candidate.predicate) {
            return Err(EngineError::UnknownPredicate(candidate.predicate));
        }
        let now = Utc::now();
        let (record, inserted) = self
            .store
            .append_if_absent(
                |r| !r.status.is_terminal() && r.asserts_same_triple(&candidate),
                |sequence| ClaimRecord::detected(candidate.clone(), sequence, now),
            )
            .await?;

        if inserted {
            info!(
                claim_id = %record.claim_id,
                subject = %record.subject.name,
                predicate = %record.predicate,
                object = %record.object.name,
                "claim detected"
            );
        } else {
            debug!(claim_id = %record.claim_id, status = %record.status, "candidate matches a pending claim");
        }
        Ok(record)
    }

    async fn verify(&self, claim_id: &ClaimId) -> EngineResult<ClaimRecord> {
        let record = self.load(claim_id).await?;
        match record.status {
            ClaimStatus::Detected | ClaimStatus::Verifying | ClaimStatus::Ready => {}
            _ => return Err(invalid(&record, "verify")),
        }
        let record = self.enter_verifying(record).await?;
        self.verify_record(record, None).await
    }

    async fn run(self: Arc<Self>, claim_id: ClaimId, mode: CommitMode) -> EngineResult<ClaimRecord> {
        let record = self.load(&claim_id).await?;
        if mode == CommitMode::Retry && record.status != ClaimStatus::Failed {
            return Err(invalid(&record, "retry"));
        }

        let ready = match record.status {
            ClaimStatus::Committed | ClaimStatus::FoundExisting => {
                debug!(claim_id = %claim_id, status = %record.status, "claim already settled");
                return Ok(record);
            }
            ClaimStatus::Committing => return self.reconcile_interrupted(record).await,
            ClaimStatus::Failed if mode == CommitMode::Commit => {
                return Err(invalid(&record, "commit before an explicit retry"));
            }
            ClaimStatus::Failed => {
                let pending = PendingAttempt::from_record(&record);
                info!(claim_id = %claim_id, attempts = record.attempts, "retrying failed claim");
                let record = self.enter_verifying(record).await?;
                let verified = self.verify_record(record, pending.as_ref()).await?;
                if verified.status.is_success() {
                    return Ok(verified);
                }
                verified
            }
            ClaimStatus::Detected | ClaimStatus::Verifying => {
                let record = self.enter_verifying(record).await?;
                self.verify_record(record, None).await?
            }
            ClaimStatus::Ready => record,
        };
        self.execute(ready).await
    }

    async fn load(&self, claim_id: &ClaimId) -> EngineResult<ClaimRecord> {
        self.store
            .get(claim_id)
            .await
            .ok_or_else(|| EngineError::ClaimNotFound(claim_id.clone()))
    }

    async fn enter_verifying(&self, record: ClaimRecord) -> EngineResult<ClaimRecord> {
        if record.status == ClaimStatus::Verifying {
            return Ok(record);
        }
        let now = Utc::now();
        let updated = self
            .store
            .update(&record.claim_id, |r| Ok(r.transition(ClaimStatus::Verifying, now)?))
            .await?;
        debug!(claim_id = %updated.claim_id, from = %record.status, "verifying claim");
        Ok(updated)
    }

    /// Resolve ids, check existence, plan and quote. Leaves the claim Ready, or
    /// FoundExisting when `pending` turns out to have landed.
    async fn verify_record(&self, record: ClaimRecord, pending: Option<&PendingAttempt>) -> EngineResult<ClaimRecord> {
        let policy = &self.config.retry;
        let claim_id = record.claim_id.clone();
        let predicate = self
            .predicates
            .resolve(&record.predicate)
            .ok_or_else(|| EngineError::UnknownPredicate(record.predicate.clone()))?;
        let subject = with_retry(policy, "node_id", || self.addressor.node_id(&record.subject)).await?;
        let object = with_retry(policy, "node_id", || self.addressor.node_id(&record.object)).await?;
        let nodes = ResolvedNodes {
            subject,
            predicate,
            object,
        };

        let edge = with_retry(policy, "exists_edge", || {
            self.query.exists_edge(&subject, &predicate, &object)
        })
        .await?;
        if edge.collision.is_some() {
            warn!(claim_id = %claim_id, edge_id = %edge.edge_id, "edge id holds a different triple; planning creation");
        }

        if edge.exists {
            for id in [subject, predicate, object] {
                self.known_nodes.insert(id);
            }
            if let Some(pending) = pending {
                if let Some(settled) = self.settle_pending(&record, nodes, &edge, pending).await? {
                    return Ok(settled);
                }
            }
        }

        let deposit = self.config.deposit_amount.clone();
        let (missing_nodes, action) = if edge.exists {
            (
                Vec::new(),
                EdgeAction::Deposit {
                    edge_id: edge.edge_id,
                    amount: deposit,
                },
            )
        } else {
            (self.missing_nodes(&record, &nodes).await?, EdgeAction::Create { deposit })
        };
        let cost = self.quote(&missing_nodes, &action).await?;
        let plan = CommitPlan {
            missing_nodes,
            edge: action,
            cost,
        };
        info!(
            claim_id = %claim_id,
            missing_nodes = plan.missing_nodes.len(),
            creates_edge = plan.creates_edge(),
            total = %plan.cost.total,
            "claim ready"
        );

        let now = Utc::now();
        let edge_id = edge.edge_id;
        let updated = self
            .store
            .update(&claim_id, move |r| {
                r.node_ids = Some(nodes);
                r.edge_id = Some(edge_id);
                r.plan = Some(plan);
                r.transition(ClaimStatus::Ready, now)?;
                Ok(())
            })
            .await?;
        Ok(updated)
    }

    async fn missing_nodes(&self, record: &ClaimRecord, nodes: &ResolvedNodes) -> EngineResult<Vec<PlannedNode>> {
        let mut missing: Vec<PlannedNode> = Vec::new();
        let roles = [
            (NodeRole::Subject, nodes.subject, &record.subject),
            (NodeRole::Object, nodes.object, &record.object),
        ];
        for (role, node_id, descriptor) in roles {
            if self.known_nodes.contains(&node_id) || missing.iter().any(|m| m.node_id == node_id) {
                continue;
            }
            let exists = with_retry(&self.config.retry, "exists_node", || self.query.exists_node(&node_id)).await?;
            if exists {
                self.known_nodes.insert(node_id);
            } else {
                missing.push(PlannedNode {
                    role,
                    node_id,
                    descriptor: descriptor.clone(),
                });
            }
        }
        Ok(missing)
    }

    async fn quote(&self, missing: &[PlannedNode], action: &EdgeAction) -> EngineResult<CostQuote> {
        let policy = &self.config.retry;
        let count = missing.len() as u64;
        let node_creation = if count == 0 {
            Amount::zero()
        } else if self.batching() {
            with_retry(policy, "quote_nodes", || self.fees.quote_nodes(count)).await?
        } else {
            with_retry(policy, "quote_nodes", || self.fees.quote_nodes(1))
                .await?
                .mul_u64(count)
        };
        let edge = match action {
            EdgeAction::Create { deposit } => {
                with_retry(policy, "quote_edge", || self.fees.quote_edge_creation(deposit)).await?
            }
            EdgeAction::Deposit { amount, .. } => {
                with_retry(policy, "quote_deposit", || self.fees.quote_deposit(amount)).await?
            }
        };
        Ok(CostQuote::new(node_creation, edge, Utc::now()))
    }

    fn batching(&self) -> bool {
        self.config.batch_node_creation && self.reader.supports_batch_creation()
    }

    /// Settle an unconfirmed earlier attempt without resubmitting, if it landed.
    async fn settle_pending(
        &self,
        record: &ClaimRecord,
        nodes: ResolvedNodes,
        edge: &EdgeExistence,
        pending: &PendingAttempt,
    ) -> EngineResult<Option<ClaimRecord>> {
        let landed = if pending.plan.creates_edge() {
            Some(pending.tx_ref.clone())
        } else {
            let outcome = tokio::time::timeout(
                self.config.confirmation_timeout(),
                self.submitter.wait_for_receipt(&pending.tx_ref),
            )
            .await;
            match outcome {
                Ok(Ok(receipt)) if receipt.status == ReceiptStatus::Success => Some(receipt.tx_ref),
                _ => None,
            }
        };
        let Some(tx_ref) = landed else {
            return Ok(None);
        };

        let now = Utc::now();
        let edge_id = edge.edge_id;
        let updated = self
            .store
            .update(&record.claim_id, move |r| {
                r.node_ids = Some(nodes);
                r.edge_id = Some(edge_id);
                r.transaction_ref = Some(tx_ref);
                r.transition(ClaimStatus::FoundExisting, now)?;
                Ok(())
            })
            .await?;
        info!(claim_id = %updated.claim_id, edge_id = %edge_id, "earlier attempt already landed; not resubmitting");
        Ok(Some(updated))
    }

    async fn reconcile_interrupted(&self, record: ClaimRecord) -> EngineResult<ClaimRecord> {
        let claim_id = record.claim_id.clone();
        let pending = PendingAttempt::from_record(&record);
        warn!(
            claim_id = %claim_id,
            tx = record.transaction_ref.as_ref().map(TxRef::as_str).unwrap_or("none"),
            "claim left committing; reconciling against the ledger"
        );
        let record = self.enter_verifying(record).await?;
        let verified = self.verify_record(record, pending.as_ref()).await?;
        if verified.status.is_success() {
            return Ok(verified);
        }
        let now = Utc::now();
        let failed = self
            .store
            .update(&claim_id, |r| {
                Ok(r.fail(
                    FailureKind::Interrupted,
                    "commit interrupted before confirmation; retry to resubmit",
                    now,
                )?)
            })
            .await?;
        Ok(failed)
    }

    async fn execute(&self, record: ClaimRecord) -> EngineResult<ClaimRecord> {
        let claim_id = record.claim_id.clone();
        let (Some(plan), Some(nodes), Some(edge_id)) = (record.plan.clone(), record.node_ids, record.edge_id) else {
            return Err(invalid(&record, "commit without a verified plan"));
        };

        let cost = self.quote(&plan.missing_nodes, &plan.edge).await?;
        let balance = with_retry(&self.config.retry, "balance", || self.submitter.balance()).await?;
        if balance < cost.total {
            let reason = format!("need {}, have {balance}", cost.total);
            let now = Utc::now();
            self.store
                .update(&claim_id, |r| Ok(r.fail(FailureKind::InsufficientFunds, reason, now)?))
                .await?;
            warn!(claim_id = %claim_id, required = %cost.total, available = %balance, "insufficient funds");
            return Err(EngineError::InsufficientFunds {
                claim_id,
                required: cost.total,
                available: balance,
            });
        }

        let plan = CommitPlan { cost, ..plan };
        let batching = self.batching();
        let stored_plan = plan.clone();
        let now = Utc::now();
        let committing = self
            .store
            .update(&claim_id, move |r| {
                r.transition(ClaimStatus::Committing, now)?;
                r.attempts += 1;
                r.plan = Some(stored_plan);
                r.transaction_ref = None;
                r.shares = None;
                Ok(())
            })
            .await?;
        info!(
            claim_id = %claim_id,
            attempt = committing.attempts,
            writes = plan.write_count(batching),
            total = %plan.cost.total,
            "committing claim"
        );

        match self.submit_plan(&claim_id, &nodes, edge_id, &plan, batching).await {
            Ok(settlement) => self.settle(&claim_id, settlement).await,
            Err(failure) => self.fail_attempt(&claim_id, failure).await,
        }
    }

    async fn submit_plan(
        &self,
        claim_id: &ClaimId,
        nodes: &ResolvedNodes,
        edge_id: Identifier,
        plan: &CommitPlan,
        batching: bool,
    ) -> Result<Settlement, AttemptError> {
        if !plan.missing_nodes.is_empty() {
            if batching {
                self.create_nodes(claim_id, plan.missing_nodes.iter().collect()).await?;
            } else {
                for node in &plan.missing_nodes {
                    self.create_nodes(claim_id, vec![node]).await?;
                }
            }
        }

        match &plan.edge {
            EdgeAction::Create { deposit } => {
                let call = LedgerCall::CreateEdge(CreateEdgeArgs {
                    subject_id: nodes.subject,
                    predicate_id: nodes.predicate,
                    object_id: nodes.object,
                    deposit: deposit.clone(),
                    value: plan.cost.edge.clone(),
                });
                match self.submit_and_confirm(claim_id, &call).await? {
                    Submission::Confirmed(receipt) => {
                        let created = match receipt.output {
                            CallOutput::EdgeId(id) => id,
                            _ => edge_id,
                        };
                        Ok(Settlement::Created {
                            edge_id: created,
                            tx_ref: receipt.tx_ref,
                        })
                    }
                    Submission::Reverted { tx_ref, reason } => {
                        self.reconcile_edge_revert(claim_id, nodes, tx_ref, reason).await
                    }
                }
            }
            EdgeAction::Deposit { edge_id, amount } => {
                let call = LedgerCall::Deposit(DepositArgs {
                    edge_id: *edge_id,
                    amount: amount.clone(),
                    value: plan.cost.edge.clone(),
                });
                match self.submit_and_confirm(claim_id, &call).await? {
                    Submission::Confirmed(receipt) => {
                        let shares = match receipt.output {
                            CallOutput::Shares(shares) => Some(shares),
                            _ => None,
                        };
                        Ok(Settlement::Deposited {
                            edge_id: *edge_id,
                            tx_ref: receipt.tx_ref,
                            shares,
                        })
                    }
                    Submission::Reverted { tx_ref, reason } => self.classify_revert(claim_id, *edge_id, tx_ref, reason),
                }
            }
        }
    }

    /// Create `batch` in one write. If it reverts because some node appeared
    /// meanwhile, re-check and create the remainder once.
    async fn create_nodes(&self, claim_id: &ClaimId, batch: Vec<&PlannedNode>) -> Result<(), AttemptError> {
        let mut pending = batch;
        let mut requeried = false;
        loop {
            let count = pending.len() as u64;
            let value = with_retry(&self.config.retry, "quote_nodes", || self.fees.quote_nodes(count))
                .await
                .map_err(AttemptError::ledger)?;
            let call = LedgerCall::CreateNodes(CreateNodesArgs {
                descriptors: pending.iter().map(|n| n.descriptor.clone()).collect(),
                value,
            });

            match self.submit_and_confirm(claim_id, &call).await? {
                Submission::Confirmed(_) => {
                    for node in &pending {
                        self.known_nodes.insert(node.node_id);
                    }
                    debug!(claim_id = %claim_id, nodes = pending.len(), "nodes created");
                    return Ok(());
                }
                Submission::Reverted { reason, .. } => {
                    if requeried || self.classifier.classify(&reason) == RevertClass::Genuine {
                        return Err(AttemptError::reverted(claim_id, reason));
                    }
                    requeried = true;

                    let mut still_missing = Vec::new();
                    for node in pending {
                        let exists = with_retry(&self.config.retry, "exists_node", || {
                            self.query.exists_node(&node.node_id)
                        })
                        .await
                        .map_err(AttemptError::ledger)?;
                        if exists {
                            self.known_nodes.insert(node.node_id);
                        } else {
                            still_missing.push(node);
                        }
                    }
                    info!(claim_id = %claim_id, remaining = still_missing.len(), %reason, "node creation raced another writer");
                    if still_missing.is_empty() {
                        return Ok(());
                    }
                    pending = still_missing;
                }
            }
        }
    }

    async fn submit_and_confirm(&self, claim_id: &ClaimId, call: &LedgerCall) -> Result<Submission, AttemptError> {
        let tx_ref = match self.submitter.submit(call).await {
            Ok(tx_ref) => tx_ref,
            Err(LedgerError::Reverted(reason)) => {
                debug!(claim_id = %claim_id, function = call.function(), %reason, "call rejected before broadcast");
                return Ok(Submission::Reverted { tx_ref: None, reason });
            }
            Err(err) => return Err(AttemptError::ledger(err)),
        };

        let recorded = tx_ref.clone();
        self.store
            .update(claim_id, move |r| {
                r.transaction_ref = Some(recorded);
                Ok(())
            })
            .await?;
        debug!(claim_id = %claim_id, tx = %tx_ref, function = call.function(), value = %call.value(), "submitted");

        let wait = with_retry(&self.config.retry, "wait_for_receipt", || {
            self.submitter.wait_for_receipt(&tx_ref)
        });
        let outcome = tokio::time::timeout(self.config.confirmation_timeout(), wait).await;
        let receipt = match outcome {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(err)) => {
                // broadcast already happened, so the call may still land
                warn!(claim_id = %claim_id, tx = %tx_ref, error = %err, "lost track of submitted call");
                return Err(AttemptError::failed(
                    FailureKind::ConfirmationTimeout,
                    EngineError::Unconfirmed {
                        claim_id: claim_id.clone(),
                        tx_ref,
                        reason: err.to_string(),
                    },
                ));
            }
            Err(_) => {
                warn!(
                    claim_id = %claim_id,
                    tx = %tx_ref,
                    timeout_ms = self.config.confirmation_timeout_ms,
                    "confirmation timed out"
                );
                return Err(AttemptError::failed(
                    FailureKind::ConfirmationTimeout,
                    EngineError::ConfirmationTimeout {
                        claim_id: claim_id.clone(),
                        tx_ref,
                    },
                ));
            }
        };

        match receipt.status.clone() {
            ReceiptStatus::Success => Ok(Submission::Confirmed(receipt)),
            ReceiptStatus::Reverted { reason } => Ok(Submission::Reverted {
                tx_ref: Some(receipt.tx_ref),
                reason,
            }),
        }
    }

    fn classify_revert(
        &self,
        claim_id: &ClaimId,
        edge_id: Identifier,
        tx_ref: Option<TxRef>,
        reason: String,
    ) -> Result<Settlement, AttemptError> {
        match self.classifier.classify(&reason) {
            RevertClass::AlreadyExists => {
                info!(claim_id = %claim_id, %reason, "edge already exists; reclassifying revert");
                Ok(Settlement::AlreadyExisted { edge_id, tx_ref })
            }
            RevertClass::Genuine => Err(AttemptError::reverted(claim_id, reason)),
        }
    }

    /// An "already exists" revert on edge creation settles the claim only if
    /// the edge now on the ledger stores exactly this triple.
    async fn reconcile_edge_revert(
        &self,
        claim_id: &ClaimId,
        nodes: &ResolvedNodes,
        tx_ref: Option<TxRef>,
        reason: String,
    ) -> Result<Settlement, AttemptError> {
        if self.classifier.classify(&reason) == RevertClass::Genuine {
            return Err(AttemptError::reverted(claim_id, reason));
        }
        let edge = with_retry(&self.config.retry, "exists_edge", || {
            self.query.exists_edge(&nodes.subject, &nodes.predicate, &nodes.object)
        })
        .await
        .map_err(AttemptError::ledger)?;

        if edge.exists {
            info!(claim_id = %claim_id, edge_id = %edge.edge_id, %reason, "edge already exists; reclassifying revert");
            return Ok(Settlement::AlreadyExisted {
                edge_id: edge.edge_id,
                tx_ref,
            });
        }
        warn!(
            claim_id = %claim_id,
            edge_id = %edge.edge_id,
            %reason,
            "ledger reports the edge exists but its record holds a different triple"
        );
        Err(AttemptError::reverted(
            claim_id,
            format!("{reason}: edge {} holds a different triple", edge.edge_id),
        ))
    }

    async fn settle(&self, claim_id: &ClaimId, settlement: Settlement) -> EngineResult<ClaimRecord> {
        let (status, edge_id, tx_ref, shares) = match settlement {
            Settlement::Created { edge_id, tx_ref } => (ClaimStatus::Committed, edge_id, Some(tx_ref), None),
            Settlement::Deposited { edge_id, tx_ref, shares } => {
                (ClaimStatus::FoundExisting, edge_id, Some(tx_ref), shares)
            }
            Settlement::AlreadyExisted { edge_id, tx_ref } => (ClaimStatus::FoundExisting, edge_id, tx_ref, None),
        };
        let now = Utc::now();
        let record = self
            .store
            .update(claim_id, move |r| {
                r.edge_id = Some(edge_id);
                if tx_ref.is_some() {
                    r.transaction_ref = tx_ref;
                }
                r.shares = shares;
                r.transition(status, now)?;
                Ok(())
            })
            .await?;
        info!(
            claim_id = %claim_id,
            status = %record.status,
            edge_id = %edge_id,
            tx = record.transaction_ref.as_ref().map(TxRef::as_str).unwrap_or("none"),
            "claim settled"
        );
        Ok(record)
    }

    async fn fail_attempt(&self, claim_id: &ClaimId, failure: AttemptError) -> EngineResult<ClaimRecord> {
        match failure.kind {
            Some(kind) => {
                let reason = failure.error.to_string();
                let now = Utc::now();
                self.store
                    .update(claim_id, move |r| Ok(r.fail(kind, reason, now)?))
                    .await?;
                warn!(claim_id = %claim_id, kind = %kind, error = %failure.error, "commit failed");
            }
            None => {
                warn!(claim_id = %claim_id, error = %failure.error, "commit interrupted; claim left committing");
            }
        }
        Err(failure.error)
    }
}

fn invalid(record: &ClaimRecord, action: &'static str) -> EngineError {
    EngineError::InvalidState {
        claim_id: record.claim_id.clone(),
        status: record.status,
        action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimline_types::{ClaimFailure, NodeDescriptor};

    fn record(status: ClaimStatus) -> ClaimRecord {
        let candidate = CandidateClaim::new("tab", NodeDescriptor::new("I"), "like", NodeDescriptor::new("SiteX"));
        let mut record = ClaimRecord::detected(candidate, 0, Utc::now());
        record.status = status;
        record.transaction_ref = Some(TxRef::new("0xabc"));
        record.plan = Some(CommitPlan {
            missing_nodes: Vec::new(),
            edge: EdgeAction::Create {
                deposit: Amount::from(1u64),
            },
            cost: CostQuote::new(Amount::zero(), Amount::from(2u64), Utc::now()),
        });
        record
    }

    fn failed_with(kind: FailureKind) -> ClaimRecord {
        let mut r = record(ClaimStatus::Failed);
        r.last_error = Some(ClaimFailure {
            kind,
            reason: kind.to_string(),
            at: Utc::now(),
        });
        r
    }

    #[test]
    fn pending_attempt_only_for_unconfirmed_submissions() {
        assert!(PendingAttempt::from_record(&record(ClaimStatus::Committing)).is_some());
        assert!(PendingAttempt::from_record(&failed_with(FailureKind::ConfirmationTimeout)).is_some());
        assert!(PendingAttempt::from_record(&failed_with(FailureKind::Interrupted)).is_some());
        assert!(PendingAttempt::from_record(&failed_with(FailureKind::TransactionReverted)).is_none());
        assert!(PendingAttempt::from_record(&record(ClaimStatus::Ready)).is_none());

        let mut no_tx = record(ClaimStatus::Committing);
        no_tx.transaction_ref = None;
        assert!(PendingAttempt::from_record(&no_tx).is_none());
    }
}

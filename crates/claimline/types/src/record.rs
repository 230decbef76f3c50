//! Local claim records and their lifecycle.

use crate::call::CommitPlan;
use crate::descriptor::{predicate_key, CandidateClaim, NodeDescriptor};
use crate::ids::{ClaimId, Identifier, TxRef};
use crate::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle status of a claim record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    /// Observed, identifiers not yet resolved.
    Detected,
    /// Identifiers resolved or resolving, existence being checked.
    Verifying,
    /// Plan and cost known, waiting for a commit trigger.
    Ready,
    /// Write submitted, waiting for confirmation.
    Committing,
    /// Fresh edge created on the ledger.
    Committed,
    /// Edge already existed; only a deposit (or nothing) was needed.
    FoundExisting,
    /// Commit failed; retry re-enters Verifying.
    Failed,
}

impl ClaimStatus {
    pub const ALL: [ClaimStatus; 7] = [
        Self::Detected,
        Self::Verifying,
        Self::Ready,
        Self::Committing,
        Self::Committed,
        Self::FoundExisting,
        Self::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Verifying => "verifying",
            Self::Ready => "ready",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::FoundExisting => "found_existing",
            Self::Failed => "failed",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Committed | Self::FoundExisting)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::FoundExisting | Self::Failed)
    }

    /// Whether `self -> next` is a legal lifecycle edge.
    ///
    /// Verifying may be re-entered from itself (interrupted verification), from
    /// Ready (stale plan), from Committing (crash recovery) and from Failed (retry).
    pub fn can_transition_to(self, next: ClaimStatus) -> bool {
        use ClaimStatus::*;
        matches!(
            (self, next),
            (Detected, Verifying)
                | (Verifying, Verifying)
                | (Verifying, Ready)
                | (Verifying, FoundExisting)
                | (Verifying, Failed)
                | (Ready, Verifying)
                | (Ready, Committing)
                | (Ready, Failed)
                | (Committing, Committed)
                | (Committing, FoundExisting)
                | (Committing, Failed)
                | (Committing, Verifying)
                | (Failed, Verifying)
        )
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected lifecycle move.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid lifecycle transition for claim {claim_id}: {from} -> {to}")]
pub struct TransitionError {
    pub claim_id: ClaimId,
    pub from: ClaimStatus,
    pub to: ClaimStatus,
}

/// Failure classes recorded on a Failed claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InsufficientFunds,
    TransactionReverted,
    ConfirmationTimeout,
    Network,
    Interrupted,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientFunds => "insufficient_funds",
            Self::TransactionReverted => "transaction_reverted",
            Self::ConfirmationTimeout => "confirmation_timeout",
            Self::Network => "network",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimFailure {
    pub kind: FailureKind,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Node ids resolved for the three claim roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedNodes {
    pub subject: Identifier,
    pub predicate: Identifier,
    pub object: Identifier,
}

/// One locally observed assertion and everything known about its commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claim_id: ClaimId,
    pub source: String,
    pub sequence: u64,
    pub subject: NodeDescriptor,
    pub predicate: String,
    pub object: NodeDescriptor,
    pub status: ClaimStatus,
    #[serde(default)]
    pub node_ids: Option<ResolvedNodes>,
    #[serde(default)]
    pub edge_id: Option<Identifier>,
    #[serde(default)]
    pub plan: Option<CommitPlan>,
    #[serde(default)]
    pub transaction_ref: Option<TxRef>,
    #[serde(default)]
    pub shares: Option<Amount>,
    #[serde(default)]
    pub last_error: Option<ClaimFailure>,
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClaimRecord {
    /// Fresh record for a candidate, keyed by `source#sequence`.
    pub fn detected(candidate: CandidateClaim, sequence: u64, now: DateTime<Utc>) -> Self {
        Self {
            claim_id: ClaimId::new(&candidate.source, sequence),
            source: candidate.source,
            sequence,
            subject: candidate.subject,
            predicate: candidate.predicate,
            object: candidate.object,
            status: ClaimStatus::Detected,
            node_ids: None,
            edge_id: None,
            plan: None,
            transaction_ref: None,
            shares: None,
            last_error: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Same subject, predicate and object as `candidate` (by canonical encoding).
    pub fn asserts_same_triple(&self, candidate: &CandidateClaim) -> bool {
        self.subject.canonical_bytes() == candidate.subject.canonical_bytes()
            && predicate_key(&self.predicate) == predicate_key(&candidate.predicate)
            && self.object.canonical_bytes() == candidate.object.canonical_bytes()
    }

    /// Move to `to`, rejecting edges the lifecycle does not allow.
    pub fn transition(&mut self, to: ClaimStatus, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                claim_id: self.claim_id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        if to != ClaimStatus::Failed {
            self.last_error = None;
        }
        Ok(())
    }

    /// Move to Failed and record why.
    pub fn fail(
        &mut self,
        kind: FailureKind,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(ClaimStatus::Failed, now)?;
        self.last_error = Some(ClaimFailure {
            kind,
            reason: reason.into(),
            at: now,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ClaimRecord {
        let candidate = CandidateClaim::new(
            "tab-1",
            NodeDescriptor::new("I"),
            "like",
            NodeDescriptor::new("SiteX"),
        );
        ClaimRecord::detected(candidate, 3, Utc::now())
    }

    #[test]
    fn detected_record_is_keyed_by_source_and_sequence() {
        let r = record();
        assert_eq!(r.claim_id.as_str(), "tab-1#3");
        assert_eq!(r.status, ClaimStatus::Detected);
    }

    #[test]
    fn happy_path_transitions() {
        let mut r = record();
        let now = Utc::now();
        for next in [
            ClaimStatus::Verifying,
            ClaimStatus::Ready,
            ClaimStatus::Committing,
            ClaimStatus::Committed,
        ] {
            r.transition(next, now).unwrap();
        }
        assert_eq!(r.status, ClaimStatus::Committed);
    }

    #[test]
    fn terminal_success_is_final() {
        let mut r = record();
        let now = Utc::now();
        r.transition(ClaimStatus::Verifying, now).unwrap();
        r.transition(ClaimStatus::Ready, now).unwrap();
        r.transition(ClaimStatus::Committing, now).unwrap();
        r.transition(ClaimStatus::FoundExisting, now).unwrap();

        for next in ClaimStatus::ALL {
            let err = r.clone().transition(next, now).unwrap_err();
            assert_eq!(err.from, ClaimStatus::FoundExisting);
        }
    }

    #[test]
    fn failed_only_reenters_verifying() {
        let mut r = record();
        let now = Utc::now();
        r.transition(ClaimStatus::Verifying, now).unwrap();
        r.transition(ClaimStatus::Ready, now).unwrap();
        r.transition(ClaimStatus::Committing, now).unwrap();
        r.fail(FailureKind::ConfirmationTimeout, "no receipt", now)
            .unwrap();
        assert_eq!(r.last_error.as_ref().unwrap().kind, FailureKind::ConfirmationTimeout);

        assert!(r.clone().transition(ClaimStatus::Committing, now).is_err());
        assert!(r.clone().transition(ClaimStatus::Ready, now).is_err());
        r.transition(ClaimStatus::Verifying, now).unwrap();
        assert!(r.last_error.is_none());
    }

    #[test]
    fn skipping_verification_is_rejected() {
        let mut r = record();
        let err = r.transition(ClaimStatus::Committing, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("detected -> committing"));
    }

    #[test]
    fn triple_match_ignores_cosmetic_differences() {
        let r = record();
        let candidate = CandidateClaim::new(
            "tab-9",
            NodeDescriptor::new(" I "),
            "Like",
            NodeDescriptor::new("SiteX"),
        );
        assert!(r.asserts_same_triple(&candidate));

        let other = CandidateClaim::new(
            "tab-1",
            NodeDescriptor::new("I"),
            "follow",
            NodeDescriptor::new("SiteX"),
        );
        assert!(!r.asserts_same_triple(&other));
    }
}

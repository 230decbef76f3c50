//! Per-claim in-flight set.
//!
//! The first caller for a claim id spawns the task and registers a shared
//! handle to its result; later callers join that handle. Each entry is tagged
//! with the operation holding the slot, so a commit arriving during a
//! verification can wait for it and then take the slot itself. The task owns
//! an [`InFlightRelease`] whose `Drop` removes the entry, so the slot is freed
//! on every exit path, including panics.

use crate::{EngineError, EngineResult};
use claimline_types::{ClaimId, ClaimRecord};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

pub(crate) type CommitFuture = Shared<BoxFuture<'static, EngineResult<ClaimRecord>>>;

type Entries = Arc<Mutex<HashMap<ClaimId, (InFlightOp, CommitFuture)>>>;

/// Operation holding a claim's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InFlightOp {
    Verify,
    Commit,
}

pub(crate) enum Slot {
    /// This call spawned the task.
    Started(CommitFuture),
    /// Another task already holds the slot.
    Joined(InFlightOp, CommitFuture),
}

#[derive(Default)]
pub(crate) struct InFlightCommits {
    entries: Entries,
}

impl InFlightCommits {
    /// Join the running task for `claim_id`, or spawn `start` as a new `op`.
    pub(crate) fn join_or_start<F>(&self, claim_id: &ClaimId, op: InFlightOp, start: F) -> EngineResult<Slot>
    where
        F: FnOnce(InFlightRelease) -> BoxFuture<'static, EngineResult<ClaimRecord>>,
    {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| EngineError::Aborted("in-flight set lock poisoned".to_string()))?;

        if let Some((running_op, running)) = entries.get(claim_id) {
            debug!(claim_id = %claim_id, op = ?running_op, "joining in-flight task");
            return Ok(Slot::Joined(*running_op, running.clone()));
        }

        let release = InFlightRelease {
            entries: Arc::clone(&self.entries),
            claim_id: claim_id.clone(),
        };
        let task = tokio::spawn(start(release));
        let shared = async move {
            match task.await {
                Ok(result) => result,
                Err(join_err) => Err(EngineError::Aborted(join_err.to_string())),
            }
        }
        .boxed()
        .shared();

        entries.insert(claim_id.clone(), (op, shared.clone()));
        Ok(Slot::Started(shared))
    }

    pub(crate) fn contains(&self, claim_id: &ClaimId) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(claim_id))
            .unwrap_or(false)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }
}

/// Removes its claim id from the in-flight set when dropped.
pub(crate) struct InFlightRelease {
    entries: Entries,
    claim_id: ClaimId,
}

impl Drop for InFlightRelease {
    fn drop(&mut self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&self.claim_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use claimline_types::{CandidateClaim, NodeDescriptor};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn record() -> ClaimRecord {
        let candidate = CandidateClaim::new("tab", NodeDescriptor::new("I"), "like", NodeDescriptor::new("SiteX"));
        ClaimRecord::detected(candidate, 0, Utc::now())
    }

    #[tokio::test(start_paused = true)]
    async fn second_caller_joins_first_attempt() {
        let inflight = InFlightCommits::default();
        let id = ClaimId::new("tab", 0);
        let started = Arc::new(AtomicU32::new(0));

        let start = |started: Arc<AtomicU32>| {
            move |release: InFlightRelease| {
                async move {
                    let _release = release;
                    started.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(record())
                }
                .boxed()
            }
        };

        let Slot::Started(first) = inflight.join_or_start(&id, InFlightOp::Commit, start(started.clone())).unwrap() else {
            panic!("first caller should start the attempt");
        };
        let Slot::Joined(op, second) = inflight.join_or_start(&id, InFlightOp::Commit, start(started.clone())).unwrap()
        else {
            panic!("second caller should join");
        };
        assert_eq!(op, InFlightOp::Commit);
        assert!(inflight.contains(&id));

        let (a, b) = tokio::join!(first, second);
        assert_eq!(a, b);
        assert_eq!(started.load(Ordering::SeqCst), 1);

        tokio::task::yield_now().await;
        assert_eq!(inflight.len(), 0);
    }

    #[tokio::test]
    async fn panicking_attempt_releases_slot() {
        let inflight = InFlightCommits::default();
        let id = ClaimId::new("tab", 1);
        let slot = inflight
            .join_or_start(&id, InFlightOp::Commit, |release| {
                async move {
                    let _release = release;
                    let explode = true;
                    if explode {
                        panic!("boom");
                    }
                    Ok(record())
                }
                .boxed()
            })
            .unwrap();
        let Slot::Started(handle) = slot else {
            panic!("empty set should start the attempt");
        };

        assert!(matches!(handle.await, Err(EngineError::Aborted(_))));
        assert!(!inflight.contains(&id));
    }
}

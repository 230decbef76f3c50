//! Chunked claim record store.

use crate::layout::{partition, Chunk, ChunkIndex};
use crate::{StorageBackend, StoreConfig, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use claimline_types::{ClaimId, ClaimRecord, ClaimStatus};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct StoreState {
    records: Vec<ClaimRecord>,
    index: ChunkIndex,
}

/// Ordered, chunked record table.
///
/// The in-memory list is authoritative for reads; every mutation rewrites the
/// full set through the backend before it becomes visible. A failed rewrite
/// leaves both the in-memory list and the persisted Index unchanged.
pub struct ClaimStore {
    backend: Arc<dyn StorageBackend>,
    config: StoreConfig,
    state: Mutex<StoreState>,
}

impl ClaimStore {
    /// Load the Index and its chunks, importing the legacy flat list if no Index exists.
    pub async fn open(backend: Arc<dyn StorageBackend>, config: StoreConfig) -> StoreResult<Self> {
        let store = Self {
            backend,
            config,
            state: Mutex::new(StoreState {
                records: Vec::new(),
                index: ChunkIndex::default(),
            }),
        };

        let mut state = store.state.lock().await;
        match store.backend.get(&store.config.index_key()).await? {
            Some(raw) => {
                let index: ChunkIndex = serde_json::from_value(raw)?;
                state.records = store.load_chunks(&index).await?;
                state.index = index;
                store.discard_legacy().await;
            }
            None => {
                if let Some(records) = store.read_legacy().await? {
                    info!(records = records.len(), "importing legacy flat claim list");
                    let records = dedupe(records);
                    let next_sequence = records.iter().map(|r| r.sequence + 1).max().unwrap_or(0);
                    store.rewrite_with_sequence(&mut state, records, next_sequence).await?;
                    store.discard_legacy().await;
                }
            }
        }
        store.sweep_orphans(&state.index).await;
        debug!(
            records = state.records.len(),
            chunks = state.index.chunk_keys.len(),
            "claim store opened"
        );
        drop(state);
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Append a new record. Its id must not be present.
    pub async fn append(&self, record: ClaimRecord) -> StoreResult<ClaimId> {
        let mut state = self.state.lock().await;
        if state.records.iter().any(|r| r.claim_id == record.claim_id) {
            return Err(StoreError::Conflict(format!(
                "claim {} already exists",
                record.claim_id
            )));
        }
        let id = record.claim_id.clone();
        let next_sequence = state.index.next_sequence.max(record.sequence + 1);
        let mut records = state.records.clone();
        records.push(record);
        self.rewrite_with_sequence(&mut state, records, next_sequence).await?;
        Ok(id)
    }

    /// Atomically look for an existing record and append a new one if none matches.
    ///
    /// `make` receives the next store sequence number. Returns the matching or new
    /// record and whether it was inserted.
    pub async fn append_if_absent<M, F>(&self, matches: M, make: F) -> StoreResult<(ClaimRecord, bool)>
    where
        M: Fn(&ClaimRecord) -> bool,
        F: FnOnce(u64) -> ClaimRecord,
    {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.records.iter().find(|r| matches(r)) {
            return Ok((existing.clone(), false));
        }
        let sequence = state.index.next_sequence;
        let record = make(sequence);
        if state.records.iter().any(|r| r.claim_id == record.claim_id) {
            return Err(StoreError::Conflict(format!(
                "claim {} already exists",
                record.claim_id
            )));
        }
        let next_sequence = (sequence + 1).max(record.sequence + 1);
        let mut records = state.records.clone();
        records.push(record.clone());
        self.rewrite_with_sequence(&mut state, records, next_sequence).await?;
        Ok((record, true))
    }

    /// Apply `mutation` to a copy of the record and persist it.
    ///
    /// If the mutation errors or the rewrite fails, nothing changes.
    pub async fn update<F>(&self, claim_id: &ClaimId, mutation: F) -> StoreResult<ClaimRecord>
    where
        F: FnOnce(&mut ClaimRecord) -> StoreResult<()>,
    {
        let mut state = self.state.lock().await;
        let position = state
            .records
            .iter()
            .position(|r| &r.claim_id == claim_id)
            .ok_or_else(|| StoreError::NotFound(format!("claim {claim_id}")))?;

        let mut updated = state.records[position].clone();
        mutation(&mut updated)?;
        if updated.claim_id != *claim_id {
            return Err(StoreError::Rejected(format!("mutation changed the id of claim {claim_id}")));
        }

        let mut records = state.records.clone();
        records[position] = updated.clone();
        self.rewrite(&mut state, records).await?;
        Ok(updated)
    }

    pub async fn get(&self, claim_id: &ClaimId) -> Option<ClaimRecord> {
        let state = self.state.lock().await;
        state.records.iter().find(|r| &r.claim_id == claim_id).cloned()
    }

    /// All records in insertion order.
    pub async fn load_all(&self) -> Vec<ClaimRecord> {
        self.state.lock().await.records.clone()
    }

    pub async fn remove(&self, claim_id: &ClaimId) -> StoreResult<ClaimRecord> {
        let mut state = self.state.lock().await;
        let position = state
            .records
            .iter()
            .position(|r| &r.claim_id == claim_id)
            .ok_or_else(|| StoreError::NotFound(format!("claim {claim_id}")))?;
        let mut records = state.records.clone();
        let removed = records.remove(position);
        self.rewrite(&mut state, records).await?;
        info!(claim_id = %claim_id, status = %removed.status, "claim removed");
        Ok(removed)
    }

    /// Drop terminal-success records last updated before `cutoff`.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut state = self.state.lock().await;
        let before = state.records.len();
        let records: Vec<ClaimRecord> = state
            .records
            .iter()
            .filter(|r| !(r.status.is_success() && r.updated_at < cutoff))
            .cloned()
            .collect();
        let pruned = before - records.len();
        if pruned > 0 {
            self.rewrite(&mut state, records).await?;
            info!(pruned, %cutoff, "pruned settled claims");
        }
        Ok(pruned)
    }

    /// Delete every record. The sequence counter keeps counting.
    pub async fn clear(&self) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        self.rewrite(&mut state, Vec::new()).await?;
        info!("claim store cleared");
        Ok(())
    }

    pub async fn index(&self) -> ChunkIndex {
        self.state.lock().await.index.clone()
    }

    pub async fn status_counts(&self) -> BTreeMap<ClaimStatus, usize> {
        let state = self.state.lock().await;
        let mut counts = BTreeMap::new();
        for record in &state.records {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        counts
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn rewrite(&self, state: &mut StoreState, records: Vec<ClaimRecord>) -> StoreResult<()> {
        let next_sequence = state.index.next_sequence;
        self.rewrite_with_sequence(state, records, next_sequence).await
    }

    /// Fresh chunks, then the Index that lists them, then removal of the old generation.
    async fn rewrite_with_sequence(
        &self,
        state: &mut StoreState,
        records: Vec<ClaimRecord>,
        next_sequence: u64,
    ) -> StoreResult<()> {
        let generation = state.index.generation + 1;
        let chunks = partition(&records, self.config.capacity());

        let mut staged: Vec<(String, Value)> = Vec::with_capacity(chunks.len());
        for (ordinal, chunk) in chunks.iter().enumerate() {
            let key = self.config.chunk_key(generation, ordinal);
            let value = serde_json::to_value(chunk)?;
            self.check_quota(&key, &value)?;
            staged.push((key, value));
        }

        let chunk_keys: Vec<String> = staged.iter().map(|(key, _)| key.clone()).collect();
        let index = ChunkIndex {
            last_chunk_key: chunk_keys.last().cloned(),
            chunk_keys,
            total_count: records.len(),
            generation,
            next_sequence,
        };
        let index_value = serde_json::to_value(&index)?;
        self.check_quota(&self.config.index_key(), &index_value)?;

        let mut written = Vec::with_capacity(staged.len());
        for (key, value) in staged {
            if let Err(err) = self.backend.set(&key, value).await {
                self.discard(&written).await;
                return Err(err);
            }
            written.push(key);
        }
        if let Err(err) = self.backend.set(&self.config.index_key(), index_value).await {
            self.discard(&written).await;
            return Err(err);
        }

        let stale = std::mem::replace(&mut state.index, index).chunk_keys;
        state.records = records;
        self.discard(&stale).await;
        debug!(
            generation,
            records = state.index.total_count,
            chunks = state.index.chunk_keys.len(),
            "claim store rewritten"
        );
        Ok(())
    }

    fn check_quota(&self, key: &str, value: &Value) -> StoreResult<()> {
        let Some(limit) = self.config.max_item_bytes else {
            return Ok(());
        };
        let size = serde_json::to_vec(value)?.len();
        if size > limit {
            return Err(StoreError::QuotaExceeded {
                key: key.to_string(),
                size,
                limit,
            });
        }
        Ok(())
    }

    /// Best-effort removal; leftovers are swept on the next open.
    async fn discard(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        if let Err(err) = self.backend.remove(keys).await {
            warn!(error = %err, keys = keys.len(), "failed to remove chunk keys");
        }
    }

    async fn load_chunks(&self, index: &ChunkIndex) -> StoreResult<Vec<ClaimRecord>> {
        let mut records = Vec::with_capacity(index.total_count);
        for key in &index.chunk_keys {
            let raw = self
                .backend
                .get(key)
                .await?
                .ok_or_else(|| StoreError::Corrupt(format!("index lists missing chunk {key}")))?;
            let chunk: Chunk = serde_json::from_value(raw)?;
            records.extend(chunk.records);
        }
        if records.len() != index.total_count {
            return Err(StoreError::Corrupt(format!(
                "index counts {} records, chunks hold {}",
                index.total_count,
                records.len()
            )));
        }
        Ok(records)
    }

    async fn read_legacy(&self) -> StoreResult<Option<Vec<ClaimRecord>>> {
        let Some(key) = &self.config.legacy_key else {
            return Ok(None);
        };
        match self.backend.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_value(raw)?)),
            None => Ok(None),
        }
    }

    async fn discard_legacy(&self) {
        if let Some(key) = &self.config.legacy_key {
            self.discard(std::slice::from_ref(key)).await;
        }
    }

    /// Remove chunk keys no Index references (left by an interrupted rewrite).
    async fn sweep_orphans(&self, index: &ChunkIndex) {
        let keys = match self.backend.keys(&self.config.chunk_prefix()).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "could not list chunk keys for orphan sweep");
                return;
            }
        };
        let live: HashSet<&String> = index.chunk_keys.iter().collect();
        let orphans: Vec<String> = keys.into_iter().filter(|k| !live.contains(k)).collect();
        if !orphans.is_empty() {
            warn!(orphans = orphans.len(), "removing unreferenced chunks");
            self.discard(&orphans).await;
        }
    }
}

/// Keep the first record per claim id.
fn dedupe(records: Vec<ClaimRecord>) -> Vec<ClaimRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.claim_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;
    use claimline_types::{CandidateClaim, FailureKind, NodeDescriptor};

    fn record(sequence: u64) -> ClaimRecord {
        let candidate = CandidateClaim::new(
            "tab-1",
            NodeDescriptor::new("I"),
            "like",
            NodeDescriptor::new(format!("site-{sequence}")),
        );
        ClaimRecord::detected(candidate, sequence, Utc::now())
    }

    async fn open(backend: Arc<MemoryBackend>, capacity: usize) -> ClaimStore {
        ClaimStore::open(backend, StoreConfig::default().with_chunk_capacity(capacity))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn append_rejects_duplicate_ids() {
        let store = open(Arc::new(MemoryBackend::new()), 4).await;
        store.append(record(0)).await.unwrap();
        let err = store.append(record(0)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn append_if_absent_returns_existing_match() {
        let store = open(Arc::new(MemoryBackend::new()), 4).await;
        let (first, inserted) = store
            .append_if_absent(|_| false, record)
            .await
            .unwrap();
        assert!(inserted);
        assert_eq!(first.sequence, 0);

        let (again, inserted) = store
            .append_if_absent(|r| r.object.name == "site-0", record)
            .await
            .unwrap();
        assert!(!inserted);
        assert_eq!(again.claim_id, first.claim_id);

        let (second, _) = store.append_if_absent(|_| false, record).await.unwrap();
        assert_eq!(second.sequence, 1);
    }

    #[tokio::test]
    async fn rejected_mutation_changes_nothing() {
        let backend = Arc::new(MemoryBackend::new());
        let store = open(backend.clone(), 4).await;
        let id = store.append(record(0)).await.unwrap();
        let writes = backend.ops().len();

        let err = store
            .update(&id, |r| {
                r.transition(ClaimStatus::Committed, Utc::now())?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert_eq!(store.get(&id).await.unwrap().status, ClaimStatus::Detected);
        assert_eq!(backend.ops().len(), writes);
    }

    #[tokio::test]
    async fn failed_backend_write_keeps_previous_state() {
        let backend = Arc::new(MemoryBackend::new());
        let store = open(backend.clone(), 4).await;
        let id = store.append(record(0)).await.unwrap();
        let index = store.index().await;

        backend.set_read_only(true);
        let result = store
            .update(&id, |r| {
                r.transition(ClaimStatus::Verifying, Utc::now())?;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(store.get(&id).await.unwrap().status, ClaimStatus::Detected);
        assert_eq!(store.index().await, index);
    }

    #[tokio::test]
    async fn prune_keeps_unsettled_records() {
        let store = open(Arc::new(MemoryBackend::new()), 4).await;
        let settled = store.append(record(0)).await.unwrap();
        let failed = store.append(record(1)).await.unwrap();
        let fresh = store.append(record(2)).await.unwrap();

        for status in [ClaimStatus::Verifying, ClaimStatus::Ready, ClaimStatus::Committing, ClaimStatus::Committed] {
            store
                .update(&settled, |r| Ok(r.transition(status, Utc::now())?))
                .await
                .unwrap();
        }
        for status in [ClaimStatus::Verifying, ClaimStatus::Ready, ClaimStatus::Committing] {
            store
                .update(&failed, |r| Ok(r.transition(status, Utc::now())?))
                .await
                .unwrap();
        }
        store
            .update(&failed, |r| Ok(r.fail(FailureKind::ConfirmationTimeout, "timed out", Utc::now())?))
            .await
            .unwrap();

        let pruned = store.prune_before(Utc::now() + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(pruned, 1);
        let ids: Vec<ClaimId> = store.load_all().await.into_iter().map(|r| r.claim_id).collect();
        assert_eq!(ids, vec![failed, fresh]);
    }

    #[tokio::test]
    async fn remove_and_status_counts() {
        let store = open(Arc::new(MemoryBackend::new()), 2).await;
        let a = store.append(record(0)).await.unwrap();
        store.append(record(1)).await.unwrap();
        store.append(record(2)).await.unwrap();

        assert_eq!(store.status_counts().await.get(&ClaimStatus::Detected), Some(&3));
        let removed = store.remove(&a).await.unwrap();
        assert_eq!(removed.claim_id, a);
        assert!(matches!(store.remove(&a).await, Err(StoreError::NotFound(_))));
        assert_eq!(store.index().await.total_count, 2);
    }

    #[tokio::test]
    async fn clear_preserves_sequence() {
        let store = open(Arc::new(MemoryBackend::new()), 2).await;
        store.append_if_absent(|_| false, record).await.unwrap();
        store.append_if_absent(|_| false, record).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.is_empty().await);
        let (next, _) = store.append_if_absent(|_| false, record).await.unwrap();
        assert_eq!(next.sequence, 2);
    }
}

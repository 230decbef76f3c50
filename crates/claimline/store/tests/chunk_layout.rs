//! Persisted layout tests: chunking, write ordering, migration and recovery.

use chrono::Utc;
use claimline_store::{Chunk, ChunkIndex, ClaimStore, FileBackend, MemoryBackend, StorageBackend, StoreConfig, StoreError};
use claimline_types::{CandidateClaim, ClaimRecord, NodeDescriptor};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn record(sequence: u64) -> ClaimRecord {
    let candidate = CandidateClaim::new(
        "tab-7",
        NodeDescriptor::new("I"),
        "visit",
        NodeDescriptor::new(format!("site-{sequence}")).with_url(format!("https://site-{sequence}.example")),
    );
    ClaimRecord::detected(candidate, sequence, Utc::now())
}

fn config(capacity: usize) -> StoreConfig {
    StoreConfig::default().with_chunk_capacity(capacity)
}

async fn chunk_sizes(backend: &MemoryBackend, index: &ChunkIndex) -> Vec<usize> {
    let mut sizes = Vec::new();
    for key in &index.chunk_keys {
        let raw = backend.get(key).await.unwrap().unwrap();
        let chunk: Chunk = serde_json::from_value(raw).unwrap();
        sizes.push(chunk.records.len());
    }
    sizes
}

#[tokio::test]
async fn twenty_records_capacity_eight_then_clear() {
    let backend = Arc::new(MemoryBackend::new());
    let store = ClaimStore::open(backend.clone(), config(8)).await.unwrap();
    for i in 0..20 {
        store.append(record(i)).await.unwrap();
    }

    let index = store.index().await;
    assert_eq!(index.total_count, 20);
    assert_eq!(chunk_sizes(&backend, &index).await, vec![8, 8, 4]);
    assert_eq!(index.last_chunk_key.as_ref(), index.chunk_keys.last());

    store.clear().await.unwrap();
    let raw = backend.get("claimline:index").await.unwrap().unwrap();
    assert_eq!(raw["chunkKeys"], json!([]));
    assert_eq!(raw["totalCount"], json!(0));
    assert!(backend.keys("claimline:chunk:").await.unwrap().is_empty());
}

#[tokio::test]
async fn index_is_written_after_its_chunks_and_before_stale_removal() {
    let backend = Arc::new(MemoryBackend::new());
    let store = ClaimStore::open(backend.clone(), config(2)).await.unwrap();
    for i in 0..3 {
        store.append(record(i)).await.unwrap();
    }
    let before = store.index().await;
    let ops_before = backend.ops().len();

    store.append(record(3)).await.unwrap();
    let after = store.index().await;
    let ops = backend.ops()[ops_before..].to_vec();

    let index_at = ops.iter().position(|op| op == "set claimline:index").unwrap();
    for key in &after.chunk_keys {
        let at = ops.iter().position(|op| op == &format!("set {key}")).unwrap();
        assert!(at < index_at, "chunk {key} written after the index");
    }
    for key in &before.chunk_keys {
        let at = ops.iter().position(|op| op == &format!("remove {key}")).unwrap();
        assert!(at > index_at, "stale chunk {key} removed before the index");
    }
    assert!(after.chunk_keys.iter().all(|k| !before.chunk_keys.contains(k)));
}

#[tokio::test]
async fn reopen_restores_records_in_order() {
    let backend = Arc::new(MemoryBackend::new());
    let store = ClaimStore::open(backend.clone(), config(3)).await.unwrap();
    let mut expected = Vec::new();
    for i in 0..7 {
        expected.push(store.append(record(i)).await.unwrap());
    }
    drop(store);

    let reopened = ClaimStore::open(backend, config(3)).await.unwrap();
    let ids: Vec<_> = reopened.load_all().await.into_iter().map(|r| r.claim_id).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn legacy_flat_list_is_imported_once() {
    let backend = Arc::new(MemoryBackend::new());
    let legacy: Vec<ClaimRecord> = (0..5).map(record).collect();
    let mut with_duplicate = legacy.clone();
    with_duplicate.push(legacy[0].clone());
    backend
        .set("claimline:claims", serde_json::to_value(&with_duplicate).unwrap())
        .await
        .unwrap();

    let store = ClaimStore::open(backend.clone(), config(2)).await.unwrap();
    assert_eq!(store.load_all().await, legacy);
    assert_eq!(store.index().await.chunk_keys.len(), 3);
    assert_eq!(store.index().await.next_sequence, 5);
    assert!(backend.get("claimline:claims").await.unwrap().is_none());
    drop(store);

    let again = ClaimStore::open(backend, config(2)).await.unwrap();
    assert_eq!(again.load_all().await, legacy);
}

#[tokio::test]
async fn orphaned_chunks_are_swept_on_open() {
    let backend = Arc::new(MemoryBackend::new());
    let store = ClaimStore::open(backend.clone(), config(2)).await.unwrap();
    store.append(record(0)).await.unwrap();
    drop(store);

    backend
        .set("claimline:chunk:99:0", json!({"records": []}))
        .await
        .unwrap();
    let store = ClaimStore::open(backend.clone(), config(2)).await.unwrap();
    assert_eq!(store.len().await, 1);
    assert_eq!(
        backend.keys("claimline:chunk:").await.unwrap(),
        store.index().await.chunk_keys
    );
}

#[tokio::test]
async fn index_pointing_at_missing_chunk_is_corrupt() {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .set(
            "claimline:index",
            json!({"chunkKeys": ["claimline:chunk:1:0"], "totalCount": 1}),
        )
        .await
        .unwrap();
    let err = ClaimStore::open(backend, config(2)).await.err().unwrap();
    assert!(matches!(err, StoreError::Corrupt(_)));
}

#[tokio::test]
async fn oversized_chunk_is_rejected_before_any_write() {
    let backend = Arc::new(MemoryBackend::new());
    let mut cfg = config(50);
    cfg.max_item_bytes = Some(2_000);
    let store = ClaimStore::open(backend.clone(), cfg).await.unwrap();

    let mut appended = 0;
    let err = loop {
        match store.append(record(appended)).await {
            Ok(_) => appended += 1,
            Err(err) => break err,
        }
    };
    assert!(matches!(err, StoreError::QuotaExceeded { .. }));
    assert_eq!(store.len().await as u64, appended);
    assert_eq!(store.index().await.total_count as u64, appended);
}

#[tokio::test]
async fn file_backend_survives_reopen() {
    let root = std::env::temp_dir().join(format!("claimline-store-{}", uuid::Uuid::new_v4()));
    {
        let backend = Arc::new(FileBackend::open(&root).await.unwrap());
        let store = ClaimStore::open(backend, config(4)).await.unwrap();
        for i in 0..9 {
            store.append(record(i)).await.unwrap();
        }
    }
    let backend = Arc::new(FileBackend::open(&root).await.unwrap());
    let store = ClaimStore::open(backend, config(4)).await.unwrap();
    assert_eq!(store.len().await, 9);
    assert_eq!(store.index().await.chunk_keys.len(), 3);
    let _ = tokio::fs::remove_dir_all(&root).await;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// N records at capacity K load back in order from ceil(N/K) chunks.
    #[test]
    fn chunk_round_trip(n in 0u64..40, k in 1usize..9) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let (ids, index, loaded) = runtime.block_on(async {
            let backend = Arc::new(MemoryBackend::new());
            let store = ClaimStore::open(backend.clone(), config(k)).await.unwrap();
            let mut ids = Vec::new();
            for i in 0..n {
                ids.push(store.append(record(i)).await.unwrap());
            }
            let reopened = ClaimStore::open(backend, config(k)).await.unwrap();
            let loaded: Vec<_> = reopened.load_all().await.into_iter().map(|r| r.claim_id).collect();
            (ids, reopened.index().await, loaded)
        });
        prop_assert_eq!(loaded, ids);
        prop_assert_eq!(index.chunk_keys.len() as u64, n.div_ceil(k as u64));
        prop_assert_eq!(index.total_count as u64, n);
    }
}

//! Persisted layout.

use claimline_types::ClaimRecord;
use serde::{Deserialize, Serialize};

/// Ordered list of chunk keys plus the total record count.
///
/// Iteration order is the order of `chunk_keys`, never the order of key names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkIndex {
    pub chunk_keys: Vec<String>,
    pub total_count: usize,
    #[serde(default)]
    pub last_chunk_key: Option<String>,
    /// Rewrite counter used to mint fresh chunk keys.
    #[serde(default)]
    pub generation: u64,
    /// Next per-store sequence number for claim ids.
    #[serde(default)]
    pub next_sequence: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub records: Vec<ClaimRecord>,
}

/// Split `records` into chunks of `capacity`, preserving order.
pub(crate) fn partition(records: &[ClaimRecord], capacity: usize) -> Vec<Chunk> {
    records
        .chunks(capacity.max(1))
        .map(|slice| Chunk {
            records: slice.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use claimline_types::{CandidateClaim, NodeDescriptor};

    fn records(n: u64) -> Vec<ClaimRecord> {
        (0..n)
            .map(|i| {
                let candidate = CandidateClaim::new("tab", NodeDescriptor::new("I"), "like", NodeDescriptor::new(format!("site-{i}")));
                ClaimRecord::detected(candidate, i, Utc::now())
            })
            .collect()
    }

    #[test]
    fn partition_fills_all_but_last() {
        let sizes: Vec<usize> = partition(&records(20), 8).iter().map(|c| c.records.len()).collect();
        assert_eq!(sizes, vec![8, 8, 4]);
    }

    #[test]
    fn partition_of_nothing_is_empty() {
        assert!(partition(&[], 8).is_empty());
    }

    #[test]
    fn index_serializes_camel_case() {
        let index = ChunkIndex {
            chunk_keys: vec!["claimline:chunk:1:0".into()],
            total_count: 3,
            last_chunk_key: Some("claimline:chunk:1:0".into()),
            generation: 1,
            next_sequence: 3,
        };
        let json = serde_json::to_value(&index).unwrap();
        assert_eq!(json["chunkKeys"][0], "claimline:chunk:1:0");
        assert_eq!(json["totalCount"], 3);
    }
}

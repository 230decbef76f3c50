use serde::{Deserialize, Serialize};

/// Claim store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Key prefix; everything the store writes lives under it.
    pub namespace: String,

    /// Records per chunk.
    pub chunk_capacity: usize,

    /// Per-item size limit enforced before any write. `None` disables the check.
    pub max_item_bytes: Option<usize>,

    /// Key of the older flat record list, imported once on open.
    pub legacy_key: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: "claimline".to_string(),
            chunk_capacity: 10,
            max_item_bytes: Some(64 * 1024),
            legacy_key: Some("claimline:claims".to_string()),
        }
    }
}

impl StoreConfig {
    pub fn with_chunk_capacity(mut self, capacity: usize) -> Self {
        self.chunk_capacity = capacity;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub(crate) fn index_key(&self) -> String {
        format!("{}:index", self.namespace)
    }

    pub(crate) fn chunk_prefix(&self) -> String {
        format!("{}:chunk:", self.namespace)
    }

    pub(crate) fn chunk_key(&self, generation: u64, ordinal: usize) -> String {
        format!("{}{generation}:{ordinal}", self.chunk_prefix())
    }

    /// Capacity clamped to at least one record per chunk.
    pub(crate) fn capacity(&self) -> usize {
        self.chunk_capacity.max(1)
    }
}

use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

/// Key-value persistence the claim store writes through.
///
/// Values are JSON documents. Implementations enforce their own per-item limit
/// (if any) by returning [`StoreError::QuotaExceeded`] from `set`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> StoreResult<()>;

    /// Remove keys; missing keys are ignored.
    async fn remove(&self, keys: &[String]) -> StoreResult<()>;

    /// All keys starting with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// In-memory backend. Deterministic and test-friendly.
#[derive(Default)]
pub struct MemoryBackend {
    items: RwLock<BTreeMap<String, Value>>,
    max_item_bytes: Option<usize>,
    read_only: AtomicBool,
    ops: Mutex<Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(max_item_bytes: usize) -> Self {
        Self {
            max_item_bytes: Some(max_item_bytes),
            ..Self::default()
        }
    }

    /// Reject every `set` and `remove` while enabled.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Ordered log of mutations, as `set <key>` / `remove <key>`.
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().map(|ops| ops.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn log(&self, op: String) -> StoreResult<()> {
        self.ops
            .lock()
            .map_err(|_| StoreError::Backend("ops lock poisoned".to_string()))?
            .push(op);
        Ok(())
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("backend is read-only".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let guard = self
            .items
            .read()
            .map_err(|_| StoreError::Backend("items lock poisoned".to_string()))?;
        Ok(guard.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        self.check_writable()?;
        if let Some(limit) = self.max_item_bytes {
            let size = serde_json::to_vec(&value)?.len();
            if size > limit {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    size,
                    limit,
                });
            }
        }
        self.items
            .write()
            .map_err(|_| StoreError::Backend("items lock poisoned".to_string()))?
            .insert(key.to_string(), value);
        self.log(format!("set {key}"))
    }

    async fn remove(&self, keys: &[String]) -> StoreResult<()> {
        self.check_writable()?;
        let mut guard = self
            .items
            .write()
            .map_err(|_| StoreError::Backend("items lock poisoned".to_string()))?;
        for key in keys {
            guard.remove(key);
        }
        drop(guard);
        for key in keys {
            self.log(format!("remove {key}"))?;
        }
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let guard = self
            .items
            .read()
            .map_err(|_| StoreError::Backend("items lock poisoned".to_string()))?;
        Ok(guard
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

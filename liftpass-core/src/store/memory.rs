//! In-memory key-value storage implementation.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::{KeyValueStore, Secret, StoreError};

/// In-memory store for testing and ephemeral sessions.
///
/// This store is not persistent; data is lost when the process exits.
///
/// Individual keys can be made to fail on read or write with
/// [`fail_reads`](Self::fail_reads) and [`fail_writes`](Self::fail_writes),
/// which is how the partial-write paths of the session are exercised.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `RwLock` and is
/// safe to share across threads.
pub struct MemoryStore {
    data: RwLock<HashMap<String, Secret>>,
    failing_reads: RwLock<HashSet<String>>,
    failing_writes: RwLock<HashSet<String>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::with_data(HashMap::new())
    }

    /// Create a memory store with initial data.
    pub fn with_data(data: HashMap<String, Secret>) -> Self {
        Self {
            data: RwLock::new(data),
            failing_reads: RwLock::new(HashSet::new()),
            failing_writes: RwLock::new(HashSet::new()),
        }
    }

    /// Make every subsequent `get` of `key` fail with a backend error.
    pub fn fail_reads(&self, key: &str) {
        if let Ok(mut keys) = self.failing_reads.write() {
            keys.insert(key.to_string());
        }
    }

    /// Make every subsequent `set` and `remove` of `key` fail with a backend error.
    pub fn fail_writes(&self, key: &str) {
        if let Ok(mut keys) = self.failing_writes.write() {
            keys.insert(key.to_string());
        }
    }

    /// Clear all injected failures.
    pub fn heal(&self) {
        if let Ok(mut keys) = self.failing_reads.write() {
            keys.clear();
        }
        if let Ok(mut keys) = self.failing_writes.write() {
            keys.clear();
        }
    }

    fn check(set: &RwLock<HashSet<String>>, key: &str, op: &str) -> Result<(), StoreError> {
        let failing = set.read().map(|s| s.contains(key)).unwrap_or(false);
        if failing {
            return Err(StoreError::BackendError {
                message: format!("injected {} failure for {}", op, key),
            });
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.data.read().map(|d| d.len()).unwrap_or(0);
        f.debug_struct("MemoryStore")
            .field("keys_count", &count)
            .finish()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        Self::check(&self.failing_reads, key, "read")?;
        let data = self.data.read().map_err(|e| StoreError::BackendError {
            message: format!("lock poisoned: {}", e),
        })?;
        Ok(data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Secret) -> Result<(), StoreError> {
        Self::check(&self.failing_writes, key, "write")?;
        let mut data = self.data.write().map_err(|e| StoreError::BackendError {
            message: format!("lock poisoned: {}", e),
        })?;
        data.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        Self::check(&self.failing_writes, key, "write")?;
        let mut data = self.data.write().map_err(|e| StoreError::BackendError {
            message: format!("lock poisoned: {}", e),
        })?;
        data.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_set_get() {
        let store = MemoryStore::new();
        let secret = Secret::new("test-value");

        store.set("test-key", &secret).await.unwrap();
        let retrieved = store.get("test-key").await.unwrap();

        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().expose(), "test-value");
    }

    #[tokio::test]
    async fn test_memory_store_get_nonexistent() {
        let store = MemoryStore::new();
        let result = store.get("nonexistent").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_memory_store_remove() {
        let store = MemoryStore::new();
        let secret = Secret::new("test-value");

        store.set("test-key", &secret).await.unwrap();
        store.remove("test-key").await.unwrap();

        let result = store.get("test-key").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_memory_store_remove_missing_is_ok() {
        let store = MemoryStore::new();
        store.remove("never-written").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_store_injected_failures() {
        let store = MemoryStore::new();
        store.set("a", &Secret::new("1")).await.unwrap();

        store.fail_reads("a");
        store.fail_writes("b");
        assert!(matches!(store.get("a").await, Err(StoreError::BackendError { .. })));
        assert!(store.set("b", &Secret::new("2")).await.is_err());
        assert!(store.remove("b").await.is_err());

        store.heal();
        assert_eq!(store.get("a").await.unwrap(), Some(Secret::new("1")));
        store.set("b", &Secret::new("2")).await.unwrap();
    }
}

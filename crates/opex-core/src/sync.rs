//! Per-key async mutual exclusion

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A table of independent async locks, one per key.
///
/// Callers holding different keys never wait on each other. Entries are
/// created on first use and kept for the life of the table, so the number of
/// entries grows with the number of distinct keys seen.
pub struct KeyedLocks<K> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    /// Wait for exclusive access to `key`
    pub async fn acquire(&self, key: &K) -> OwnedMutexGuard<()> {
        // Clone the Arc out so no map shard stays locked across the await
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = KeyedLocks::new();
        let _held = locks.acquire(&"a").await;

        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&"a")).await;
        assert!(second.is_err(), "second acquire of a held key must wait");
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _held = locks.acquire(&"a").await;

        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&"b")).await;
        assert!(other.is_ok());
        assert_eq!(locks.len(), 2);
    }
}

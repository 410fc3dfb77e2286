//! Collision-free sequence allocation per (site, discipline, year)

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use super::CounterKey;
use crate::error::{OpexError, Result};
use crate::store::{bounded, DurableStore};
use crate::sync::KeyedLocks;

/// Issues strictly increasing sequence numbers per counter key.
///
/// Calls for the same key run one at a time; calls for different keys run in
/// parallel. Every issued number was committed by the durable store before it
/// is returned. A number whose caller goes away is lost, never reissued.
pub struct SequenceAllocator {
    store: Arc<dyn DurableStore>,
    locks: KeyedLocks<CounterKey>,
    /// Highest value handed out per key by this process
    last_issued: DashMap<CounterKey, u64>,
    timeout: Duration,
}

impl SequenceAllocator {
    pub fn new(store: Arc<dyn DurableStore>, timeout: Duration) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            last_issued: DashMap::new(),
            timeout,
        }
    }

    /// Next number of the discipline-scoped sequence
    pub async fn next_discipline_sequence(&self, site_code: &str, discipline_code: &str, year: i32) -> Result<u64> {
        self.next(&CounterKey::discipline(site_code, discipline_code, year)).await
    }

    /// Next number of the site-wide sequence
    pub async fn next_overall_sequence(&self, site_code: &str, year: i32) -> Result<u64> {
        self.next(&CounterKey::overall(site_code, year)).await
    }

    /// Load the persisted position of `keys` before serving them.
    ///
    /// Optional: a key that was not recovered up front is recovered on its
    /// first allocation.
    pub async fn recover(&self, keys: &[CounterKey]) -> Result<()> {
        for key in keys {
            let _guard = self.locks.acquire(key).await;
            let value = self.load_floor(key).await?;
            log::info!("Recovered counter {} at {}", key, value);
        }
        Ok(())
    }

    /// Last value this allocator issued (or recovered) for `key`
    pub fn last_issued(&self, key: &CounterKey) -> Option<u64> {
        self.last_issued.get(key).map(|v| *v)
    }

    pub async fn next(&self, key: &CounterKey) -> Result<u64> {
        let _guard = self.locks.acquire(key).await;

        let floor = match self.last_issued(key) {
            Some(value) => value,
            None => self.load_floor(key).await?,
        };

        let value = bounded(self.timeout, "counter increment", self.store.increment_counter(key))
            .await
            .map_err(|e| OpexError::AllocationFailure(format!("Could not commit counter {}: {}", key, e)))?;

        // The store went backwards: issuing this would duplicate an identifier
        if value <= floor {
            log::error!("Counter {} regressed from {} to {}", key, floor, value);
            return Err(OpexError::AllocationFailure(format!(
                "Counter {} returned {} after {} was already issued", key, value, floor
            )));
        }

        self.last_issued.insert(key.clone(), value);
        log::debug!("Allocated {} for {}", value, key);
        Ok(value)
    }

    /// Caller must hold the key lock
    async fn load_floor(&self, key: &CounterKey) -> Result<u64> {
        let value = bounded(self.timeout, "counter load", self.store.load_counter(key))
            .await
            .map_err(|e| OpexError::AllocationFailure(format!("Could not recover counter {}: {}", key, e)))?;

        self.last_issued.insert(key.clone(), value);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::collections::HashSet;

    fn allocator(store: Arc<InMemoryStore>) -> Arc<SequenceAllocator> {
        Arc::new(SequenceAllocator::new(store, Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn test_unseen_key_starts_at_one() {
        let allocator = allocator(Arc::new(InMemoryStore::new()));

        assert_eq!(allocator.next_discipline_sequence("NDS", "OP", 2025).await.unwrap(), 1);
        assert_eq!(allocator.next_discipline_sequence("NDS", "OP", 2025).await.unwrap(), 2);
        assert_eq!(allocator.next_discipline_sequence("NDS", "EL", 2025).await.unwrap(), 1);
        assert_eq!(allocator.next_overall_sequence("NDS", 2025).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_year_rollover_uses_new_key() {
        let allocator = allocator(Arc::new(InMemoryStore::new()));

        allocator.next_overall_sequence("NDS", 2025).await.unwrap();
        allocator.next_overall_sequence("NDS", 2025).await.unwrap();
        assert_eq!(allocator.next_overall_sequence("NDS", 2026).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_get_distinct_values() {
        let allocator = allocator(Arc::new(InMemoryStore::new()));
        let n = 64;

        let handles: Vec<_> = (0..n)
            .map(|_| {
                let allocator = allocator.clone();
                tokio::spawn(async move { allocator.next_discipline_sequence("HSD1", "ME", 2025).await })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let value = handle.await.unwrap().unwrap();
            assert!(seen.insert(value), "value {} issued twice", value);
        }

        let expected: HashSet<u64> = (1..=n).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_resumes_after_restart() {
        let store = Arc::new(InMemoryStore::new());
        let key = CounterKey::overall("DHJ", 2025);
        store.set_counter(key.clone(), 41).await;

        let allocator = allocator(store);
        allocator.recover(&[key.clone()]).await.unwrap();
        assert_eq!(allocator.last_issued(&key), Some(41));
        assert_eq!(allocator.next(&key).await.unwrap(), 42);
    }
}

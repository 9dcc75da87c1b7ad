// storage/src/cache.rs

use crate::db::ColumnFamily;
use crate::{StorageError, StorageResult};
use ethers_core::types::H256;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// LRU cache for clean nodes read back from disk
pub struct NodeCache {
    cache: RwLock<LruCache<(ColumnFamily, H256), Arc<Vec<u8>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl NodeCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: RwLock::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, cf: ColumnFamily, key: &H256) -> StorageResult<Option<Arc<Vec<u8>>>> {
        let found = self.lock()?.get(&(cf, *key)).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(found)
    }

    pub fn insert(&self, cf: ColumnFamily, key: H256, node: Arc<Vec<u8>>) -> StorageResult<()> {
        self.lock()?.put((cf, key), node);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cache.read().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> StorageResult<()> {
        self.lock()?.clear();
        Ok(())
    }

    /// Hits and misses since creation
    pub fn stats(&self) -> (u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }

    // lookups reorder entries, so every access takes the write side
    fn lock(&self) -> StorageResult<std::sync::RwLockWriteGuard<'_, LruCache<(ColumnFamily, H256), Arc<Vec<u8>>>>> {
        self.cache
            .write()
            .map_err(|_| StorageError::CacheError("node cache lock poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_eviction() {
        let cache = NodeCache::new(2);
        let (a, b, c) = (H256::repeat_byte(1), H256::repeat_byte(2), H256::repeat_byte(3));

        cache.insert(ColumnFamily::Code, a, Arc::new(vec![1])).unwrap();
        cache.insert(ColumnFamily::Code, b, Arc::new(vec![2])).unwrap();
        assert_eq!(cache.get(ColumnFamily::Code, &a).unwrap().unwrap().as_slice(), &[1]);

        // Should evict b
        cache.insert(ColumnFamily::Code, c, Arc::new(vec![3])).unwrap();
        assert!(cache.get(ColumnFamily::Code, &b).unwrap().is_none());
        assert!(cache.get(ColumnFamily::Code, &a).unwrap().is_some());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats(), (2, 1));
    }

    #[test]
    fn test_keys_are_per_column_family() {
        let cache = NodeCache::new(0);
        let key = H256::repeat_byte(1);

        cache.insert(ColumnFamily::StateNodes, key, Arc::new(vec![1])).unwrap();
        assert!(cache.get(ColumnFamily::StorageNodes, &key).unwrap().is_none());

        cache.clear().unwrap();
        assert!(cache.is_empty());
    }
}

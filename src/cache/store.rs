//! Cache storage.
//!
//! [`CacheStore`] is the contract every backend implements. [`MemoryStore`]
//! is the default: an in-process map with optional LRU bounding.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use metrics::counter;
use tracing::debug;

use super::entry::CacheEntry;
use super::error::CacheError;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";
const METRIC_EVICT: &str = "callcache_evict_total";

/// Key → entry storage used by a single cache instance.
///
/// Operations are synchronous from the caller's side. Implementations own
/// their synchronization: a read that updates bookkeeping (such as recency)
/// and an insert that evicts must each happen atomically.
pub trait CacheStore<T>: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CacheEntry<T>>, CacheError>;

    /// Insert or replace the entry stored under `key`.
    fn set(&self, key: &str, entry: CacheEntry<T>) -> Result<(), CacheError>;

    fn delete(&self, key: &str) -> Result<(), CacheError>;

    fn clear(&self) -> Result<(), CacheError>;

    fn keys(&self) -> Result<Vec<String>, CacheError>;

    fn len(&self) -> Result<usize, CacheError> {
        Ok(self.keys()?.len())
    }

    fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }
}

/// In-memory store with least-recently-used eviction.
///
/// A hit on `get` makes the key most recently used. Inserting a new key into a
/// full store first drops the least recently used key; overwriting an existing
/// key never evicts and moves that key to the most recent position.
pub struct MemoryStore<T> {
    entries: Mutex<LruCache<String, CacheEntry<T>>>,
    max_size: Option<NonZeroUsize>,
}

impl<T> MemoryStore<T> {
    /// Create a store, bounded when `max_size` is set.
    pub fn new(max_size: Option<NonZeroUsize>) -> Self {
        let entries = match max_size {
            Some(limit) => LruCache::new(limit),
            None => LruCache::unbounded(),
        };
        Self {
            entries: Mutex::new(entries),
            max_size,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn with_max_size(max_size: NonZeroUsize) -> Self {
        Self::new(Some(max_size))
    }

    pub fn max_size(&self) -> Option<NonZeroUsize> {
        self.max_size
    }

    /// Insert without the trait's error wrapper, returning the evicted key if any.
    pub(crate) fn insert(&self, key: &str, entry: CacheEntry<T>) -> Option<String> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "set");
        match entries.push(key.to_string(), entry) {
            // `push` hands back the previous value when the key was already present.
            Some((evicted, _)) if evicted != key => {
                debug!(
                    cache = "store",
                    outcome = "evict",
                    key = %evicted,
                    "evicted least recently used entry"
                );
                counter!(METRIC_EVICT).increment(1);
                Some(evicted)
            }
            _ => None,
        }
    }

    pub(crate) fn remove(&self, key: &str) -> bool {
        mutex_lock(&self.entries, SOURCE, "delete").pop(key).is_some()
    }

    pub(crate) fn remove_all(&self) {
        mutex_lock(&self.entries, SOURCE, "clear").clear();
    }

    /// Keys ordered from least to most recently used.
    pub(crate) fn keys_oldest_first(&self) -> Vec<String> {
        mutex_lock(&self.entries, SOURCE, "keys")
            .iter()
            .rev()
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl<T: Clone> MemoryStore<T> {
    pub(crate) fn lookup(&self, key: &str) -> Option<CacheEntry<T>> {
        mutex_lock(&self.entries, SOURCE, "get").get(key).cloned()
    }

    /// Entries ordered from least to most recently used, without touching recency.
    pub(crate) fn snapshot(&self) -> Vec<CacheEntry<T>> {
        mutex_lock(&self.entries, SOURCE, "snapshot")
            .iter()
            .rev()
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// Replace the contents with `entries`, given least recently used first.
    pub(crate) fn restore(&self, entries: Vec<CacheEntry<T>>) {
        let mut cache = mutex_lock(&self.entries, SOURCE, "restore");
        cache.clear();
        for entry in entries {
            cache.push(entry.key.clone(), entry);
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T: Clone + Send + Sync> CacheStore<T> for MemoryStore<T> {
    fn get(&self, key: &str) -> Result<Option<CacheEntry<T>>, CacheError> {
        Ok(self.lookup(key))
    }

    fn set(&self, key: &str, entry: CacheEntry<T>) -> Result<(), CacheError> {
        self.insert(key, entry);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.remove_all();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.keys_oldest_first())
    }

    fn len(&self) -> Result<usize, CacheError> {
        Ok(mutex_lock(&self.entries, SOURCE, "len").len())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use time::{Duration, macros::datetime};

    use super::*;

    fn entry(key: &str, data: &str) -> CacheEntry<String> {
        CacheEntry::new(
            key,
            data.to_string(),
            datetime!(2024-01-01 00:00 UTC),
            Duration::seconds(300),
        )
    }

    fn bounded(limit: usize) -> MemoryStore<String> {
        MemoryStore::with_max_size(NonZeroUsize::new(limit).expect("non-zero limit"))
    }

    #[test]
    fn set_get_delete_roundtrip() {
        let store: MemoryStore<String> = MemoryStore::unbounded();

        assert!(store.get("k1").expect("get").is_none());
        store.set("k1", entry("k1", "v1")).expect("set");

        let cached = store.get("k1").expect("get").expect("cached entry");
        assert_eq!(cached.data, "v1");

        store.delete("k1").expect("delete");
        assert!(store.get("k1").expect("get").is_none());
    }

    #[test]
    fn unbounded_store_never_evicts() {
        let store: MemoryStore<String> = MemoryStore::unbounded();
        for i in 0..1_000 {
            let key = format!("k{i}");
            store.set(&key, entry(&key, "v")).expect("set");
        }
        assert_eq!(store.len().expect("len"), 1_000);
        assert!(store.max_size().is_none());
    }

    #[test]
    fn inserting_past_capacity_evicts_least_recent() {
        let store = bounded(2);
        store.set("k1", entry("k1", "v1")).expect("set");
        store.set("k2", entry("k2", "v2")).expect("set");
        store.set("k3", entry("k3", "v3")).expect("set");

        assert!(store.get("k1").expect("get").is_none());
        assert!(store.get("k2").expect("get").is_some());
        assert!(store.get("k3").expect("get").is_some());
        assert_eq!(store.len().expect("len"), 2);
    }

    #[test]
    fn get_hit_promotes_key() {
        let store = bounded(2);
        store.set("k1", entry("k1", "v1")).expect("set");
        store.set("k2", entry("k2", "v2")).expect("set");

        assert!(store.get("k1").expect("get").is_some());
        store.set("k3", entry("k3", "v3")).expect("set");

        assert!(store.get("k1").expect("get").is_some());
        assert!(store.get("k2").expect("get").is_none());
    }

    #[test]
    fn overwrite_keeps_size_and_promotes() {
        let store = bounded(2);
        store.set("k1", entry("k1", "v1")).expect("set");
        store.set("k2", entry("k2", "v2")).expect("set");

        assert_eq!(store.insert("k1", entry("k1", "v1b")), None);
        assert_eq!(store.len().expect("len"), 2);
        assert_eq!(store.keys().expect("keys"), vec!["k2", "k1"]);

        assert_eq!(store.insert("k3", entry("k3", "v3")), Some("k2".to_string()));
        assert_eq!(
            store.get("k1").expect("get").expect("k1 survives").data,
            "v1b"
        );
    }

    #[test]
    fn keys_are_listed_oldest_first() {
        let store: MemoryStore<String> = MemoryStore::unbounded();
        for key in ["a", "b", "c"] {
            store.set(key, entry(key, "v")).expect("set");
        }
        let _ = store.get("a").expect("get");
        assert_eq!(store.keys().expect("keys"), vec!["b", "c", "a"]);
    }

    #[test]
    fn miss_does_not_change_order() {
        let store = bounded(2);
        store.set("k1", entry("k1", "v1")).expect("set");
        store.set("k2", entry("k2", "v2")).expect("set");
        assert!(store.get("absent").expect("get").is_none());
        assert_eq!(store.keys().expect("keys"), vec!["k1", "k2"]);
    }

    #[test]
    fn clear_empties_the_store() {
        let store = bounded(4);
        store.set("k1", entry("k1", "v1")).expect("set");
        store.set("k2", entry("k2", "v2")).expect("set");
        store.clear().expect("clear");
        assert!(store.is_empty().expect("is_empty"));
        assert!(store.keys().expect("keys").is_empty());
    }

    #[test]
    fn store_recovers_from_poisoned_lock() {
        let store = bounded(2);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .entries
                .lock()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        store.set("k1", entry("k1", "v1")).expect("set");
        assert!(store.get("k1").expect("get").is_some());
    }
}

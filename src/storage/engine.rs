//! Concurrent Ordered Store
//!
//! This module implements the single map every reactor reads and writes.
//!
//! ## Design Decisions
//!
//! 1. **Lock-free skip list**: `crossbeam_skiplist::SkipMap` gives linearizable
//!    get/insert/remove from any number of threads with no external locking.
//! 2. **Byte-lexicographic order**: keys are `Bytes`, whose `Ord` compares
//!    unsigned bytes and sorts a prefix before any longer key.
//! 3. **Cheap clones**: values are `Bytes`, so handing a value back to a
//!    reactor is a reference-count bump.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌───────────┐ ┌───────────┐ ┌───────────┐
//! │ executor 0│ │ executor 1│ │ executor N│
//! └─────┬─────┘ └─────┬─────┘ └─────┬─────┘
//!       │             │             │
//!       ▼             ▼             ▼
//! ┌─────────────────────────────────────────┐
//! │        OrderedStore (SkipMap)           │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Each reactor applies its batches on one executor thread, so ordering per
//! reactor is total. Across reactors the map itself provides last-writer-wins.

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// The shared key/value map.
///
/// Wrap it in an `Arc` and hand a clone to every reactor.
///
/// # Example
///
/// ```
/// use tidekv::storage::OrderedStore;
/// use bytes::Bytes;
///
/// let store = OrderedStore::new();
/// store.put(Bytes::from("a"), Bytes::from("1"));
/// assert_eq!(store.get(b"a"), Some(Bytes::from("1")));
/// assert_eq!(store.remove(b"a"), Some(Bytes::from("1")));
/// assert_eq!(store.get(b"a"), None);
/// ```
pub struct OrderedStore {
    map: SkipMap<Bytes, Bytes>,

    /// Statistics: total GET operations
    get_count: AtomicU64,

    /// Statistics: total PUT operations
    put_count: AtomicU64,

    /// Statistics: total DELETE operations
    del_count: AtomicU64,
}

impl std::fmt::Debug for OrderedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedStore")
            .field("keys", &self.map.len())
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("put_count", &self.put_count.load(Ordering::Relaxed))
            .field("del_count", &self.del_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for OrderedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderedStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
            get_count: AtomicU64::new(0),
            put_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
        }
    }

    /// Gets the value for a key, or `None` if it is absent.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.map.get(key).map(|entry| entry.value().clone())
    }

    /// Inserts or overwrites a key.
    ///
    /// Returns the value now stored, which is what a PUT echoes to the client.
    pub fn put(&self, key: Bytes, value: Bytes) -> Bytes {
        self.put_count.fetch_add(1, Ordering::Relaxed);
        self.map.insert(key, value).value().clone()
    }

    /// Removes a key, returning the value it held.
    pub fn remove(&self, key: &[u8]) -> Option<Bytes> {
        self.del_count.fetch_add(1, Ordering::Relaxed);
        self.map.remove(key).map(|entry| entry.value().clone())
    }

    /// Returns true if the key is present. Not counted in statistics.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Returns the number of keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns a snapshot of the store counters.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.map.len() as u64,
            gets: self.get_count.load(Ordering::Relaxed),
            puts: self.put_count.load(Ordering::Relaxed),
            deletes: self.del_count.load(Ordering::Relaxed),
        }
    }
}

/// Store statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: u64,
    pub gets: u64,
    pub puts: u64,
    pub deletes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let store = OrderedStore::new();

        let echoed = store.put(Bytes::from("key"), Bytes::from("value"));
        assert_eq!(echoed, Bytes::from("value"));
        assert_eq!(store.get(b"key"), Some(Bytes::from("value")));
    }

    #[test]
    fn test_get_nonexistent() {
        let store = OrderedStore::new();
        assert_eq!(store.get(b"nonexistent"), None);
    }

    #[test]
    fn test_put_overwrites() {
        let store = OrderedStore::new();

        store.put(Bytes::from("key"), Bytes::from("old"));
        let echoed = store.put(Bytes::from("key"), Bytes::from("new"));

        assert_eq!(echoed, Bytes::from("new"));
        assert_eq!(store.get(b"key"), Some(Bytes::from("new")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove() {
        let store = OrderedStore::new();

        store.put(Bytes::from("key"), Bytes::from("value"));
        assert_eq!(store.remove(b"key"), Some(Bytes::from("value")));
        assert_eq!(store.get(b"key"), None);
        assert_eq!(store.remove(b"key"), None); // Already removed
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_absent_leaves_store_unchanged() {
        let store = OrderedStore::new();
        store.put(Bytes::from("a"), Bytes::from("1"));

        assert_eq!(store.remove(b"b"), None);
        assert_eq!(store.len(), 1);
        assert!(store.contains(b"a"));
    }

    #[test]
    fn test_byte_keys_are_distinct() {
        let store = OrderedStore::new();

        store.put(Bytes::from_static(b"ab"), Bytes::from("1"));
        store.put(Bytes::from_static(b"a"), Bytes::from("2"));
        store.put(Bytes::from_static(&[0xFF]), Bytes::from("3"));
        store.put(Bytes::new(), Bytes::from("4"));

        assert_eq!(store.len(), 4);
        assert_eq!(store.get(b"a"), Some(Bytes::from("2")));
        assert_eq!(store.get(b"ab"), Some(Bytes::from("1")));
        assert_eq!(store.get(&[0xFF]), Some(Bytes::from("3")));
        assert_eq!(store.get(b""), Some(Bytes::from("4")));
    }

    #[test]
    fn test_stats() {
        let store = OrderedStore::new();

        store.put(Bytes::from("a"), Bytes::from("1"));
        store.get(b"a");
        store.get(b"missing");
        store.remove(b"a");

        assert_eq!(
            store.stats(),
            StorageStats {
                keys: 0,
                gets: 2,
                puts: 1,
                deletes: 1,
            }
        );
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(OrderedStore::new());
        let mut handles = vec![];

        // Spawn multiple writers
        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = Bytes::from(format!("key-{}-{}", i, j));
                    store.put(key.clone(), Bytes::from("value"));
                    assert_eq!(store.get(&key), Some(Bytes::from("value")));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 1000);
    }

    #[test]
    fn test_concurrent_overlapping_keys() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(OrderedStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..200 {
                        store.put(Bytes::from("shared"), Bytes::from(format!("w{}", i)));
                        store.remove(b"shared");
                        store.put(Bytes::from("shared"), Bytes::from(format!("w{}", i)));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // Last writer wins; whichever it was, the key holds one writer's value
        let value = store.get(b"shared").unwrap();
        assert!(value.starts_with(b"w"));
        assert_eq!(store.len(), 1);
    }
}

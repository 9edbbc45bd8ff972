use im::OrdMap;
use meshrpc_core::CacheStore;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

type Entries = OrdMap<String, Arc<[u8]>>;

/// Shared in-memory key/value store.
///
/// Cloning the store shares the same map; use [`snapshot`](Self::snapshot)
/// for an isolated copy.
#[derive(Clone, Default)]
pub struct MemoryCacheStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    entries: RwLock<Entries>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryCacheStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a store from a snapshot. The new store is independent of any
    /// store the snapshot was taken from.
    pub fn from_snapshot(snapshot: &CacheSnapshot) -> Self {
        let store = Self::new();
        *store.inner.entries.write() = snapshot.entries.clone();
        store
    }

    /// Point-in-time copy of all entries.
    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            entries: self.inner.entries.read().clone(),
        }
    }

    /// Remove an entry. Returns true if it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.inner.entries.write().remove(key).is_some()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.entries.read().keys().cloned().collect()
    }

    /// Lookups served so far, hits and misses alike.
    pub fn reads(&self) -> u64 {
        self.inner.reads.load(Ordering::Relaxed)
    }

    /// Writes accepted so far.
    pub fn writes(&self) -> u64 {
        self.inner.writes.load(Ordering::Relaxed)
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.reads.fetch_add(1, Ordering::Relaxed);
        let value = self.inner.entries.read().get(key).map(|v| v.to_vec());
        trace!(key, hit = value.is_some(), "Cache lookup");
        value
    }

    fn set(&self, key: &str, value: &[u8]) {
        self.inner.writes.fetch_add(1, Ordering::Relaxed);
        trace!(key, len = value.len(), "Cache write");
        self.inner
            .entries
            .write()
            .insert(key.to_owned(), Arc::from(value));
    }
}

impl std::fmt::Debug for MemoryCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCacheStore")
            .field("entries", &self.len())
            .field("reads", &self.reads())
            .field("writes", &self.writes())
            .finish()
    }
}

/// Immutable copy of a [`MemoryCacheStore`].
#[derive(Clone, Debug, Default)]
pub struct CacheSnapshot {
    entries: Entries,
}

impl CacheSnapshot {
    /// Value stored under `key` when the snapshot was taken.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(|v| &v[..])
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the snapshot holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

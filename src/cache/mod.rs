//! Caching layer: the key-value store behind the payload cache.
//!
//! [`PayloadStore`] is the seam to whatever backend holds [`CacheEntry`]
//! documents. Access is strictly by key: no scans, no transactions, and the
//! last write to a key wins. [`MemoryStore`] is the bundled in-process backend,
//! bounded by an LRU so entries left behind by earlier builds age out.

use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;

use lru::LruCache;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::payload::CacheEntry;

/// Namespace prefixed to every key so payload entries never collide with other
/// caches sharing a backend.
pub const DEFAULT_NAMESPACE: &str = "payload-cache";

/// Default number of entries a [`MemoryStore`] keeps.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Errors returned by a [`PayloadStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failed: {0}")]
    Backend(String),

    #[error("stored entry is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Async key-value access to cache entries.
///
/// Implementations must be `Send + Sync`; a single store is shared by every
/// request. Timeouts are the backend's concern and surface as
/// [`StoreError::Backend`].
pub trait PayloadStore: Send + Sync {
    /// Returns the entry stored under `key`, if any.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<CacheEntry>>;

    /// Stores `entry` under `key`, replacing any previous entry.
    fn set<'a>(&'a self, key: &'a str, entry: &'a CacheEntry) -> StoreFuture<'a, ()>;
}

/// In-process [`PayloadStore`] keeping entries as JSON documents.
///
/// Holds at most `max_entries` documents; a write past that evicts the least
/// recently used key. Reads count as use.
///
/// # Examples
///
/// ```
/// use payload_gate::cache::{MemoryStore, PayloadStore};
///
/// # async fn demo() {
/// let store = MemoryStore::new().max_entries(500);
/// assert!(store.get("build:/").await.unwrap().is_none());
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    namespace: String,
    entries: RwLock<LruCache<String, String>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store under [`DEFAULT_NAMESPACE`].
    pub fn new() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    /// Creates an empty store whose keys are prefixed with `namespace`.
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entries: RwLock::new(LruCache::new(capacity(DEFAULT_MAX_ENTRIES))),
        }
    }

    /// Caps the store at `max_entries` documents. Zero is treated as one.
    #[must_use]
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.entries.get_mut().resize(capacity(max_entries));
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Maximum number of entries kept.
    pub async fn capacity(&self) -> usize {
        self.entries.read().await.cap().get()
    }

    /// Stores a raw document under `key`, bypassing entry encoding.
    pub async fn insert_raw(&self, key: &str, document: impl Into<String>) {
        let key = self.namespaced(key);
        self.entries.write().await.put(key, document.into());
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

fn capacity(max_entries: usize) -> NonZeroUsize {
    NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN)
}

impl PayloadStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<CacheEntry>> {
        Box::pin(async move {
            let key = self.namespaced(key);
            // Promotes the key, so the lookup takes the write lock.
            let mut entries = self.entries.write().await;
            match entries.get(&key) {
                Some(document) => Ok(Some(serde_json::from_str(document)?)),
                None => Ok(None),
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, entry: &'a CacheEntry) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let document = serde_json::to_string(entry)?;
            let key = self.namespaced(key);
            trace!(key = %key, bytes = document.len(), "storing payload entry");
            let evicted = self.entries.write().await.push(key.clone(), document);
            if let Some((evicted_key, _)) = evicted.filter(|(evicted_key, _)| *evicted_key != key) {
                debug!(key = %evicted_key, "evicted least recently used payload entry");
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::StashedArtifact;
    use std::sync::Arc;

    fn entry(body: &str) -> CacheEntry {
        CacheEntry::from_artifact(StashedArtifact::json(body.to_string()), "b1", 1_000)
    }

    #[tokio::test]
    async fn set_then_get() {
        let store = MemoryStore::new();
        store.set("b1:/pkg/vue", &entry("[1]")).await.unwrap();
        let stored = store.get("b1:/pkg/vue").await.unwrap().unwrap();
        assert_eq!(stored, entry("[1]"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = MemoryStore::new();
        assert!(store.get("b1:/nope").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn last_write_wins() {
        let store = MemoryStore::new();
        store.set("k", &entry("first")).await.unwrap();
        store.set("k", &entry("second")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().body, "second");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn corrupt_document_is_an_error() {
        let store = MemoryStore::new();
        store.insert_raw("k", "{not json").await;
        assert!(matches!(store.get("k").await, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let a = MemoryStore::with_namespace("a");
        a.insert_raw("k", "{}").await;
        assert_eq!(a.namespace(), "a");
        // Raw insert and typed lookup go through the same prefix.
        assert!(matches!(a.get("k").await, Err(StoreError::Corrupt(_))));
        assert!(a.get("a:k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_writers_leave_one_whole_entry() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for body in ["left", "right"] {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.set("b1:/race", &entry(body)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let stored = store.get("b1:/race").await.unwrap().unwrap();
        assert!(stored.body == "left" || stored.body == "right");
        assert_eq!(stored.build_id, "b1");
    }

    #[tokio::test]
    async fn full_store_evicts_least_recently_used() {
        let store = MemoryStore::new().max_entries(2);
        store.set("b1:/a", &entry("a")).await.unwrap();
        store.set("b1:/b", &entry("b")).await.unwrap();

        // Touching `/a` leaves `/b` as the eviction candidate.
        assert!(store.get("b1:/a").await.unwrap().is_some());
        store.set("b1:/c", &entry("c")).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert!(store.get("b1:/b").await.unwrap().is_none());
        assert!(store.get("b1:/a").await.unwrap().is_some());
        assert!(store.get("b1:/c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn old_builds_age_out() {
        let store = MemoryStore::new().max_entries(100);
        for build in 0..50 {
            for route in 0..20 {
                let key = format!("build-{build}:/pkg/{route}");
                store.set(&key, &entry("[1]")).await.unwrap();
            }
        }
        assert_eq!(store.len().await, 100);
        assert!(store.get("build-0:/pkg/0").await.unwrap().is_none());
        assert!(store.get("build-49:/pkg/19").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn zero_capacity_keeps_one_entry() {
        let store = MemoryStore::new().max_entries(0);
        assert_eq!(store.capacity().await, 1);
        store.set("k1", &entry("one")).await.unwrap();
        store.set("k2", &entry("two")).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("k2").await.unwrap().unwrap().body, "two");
    }
}

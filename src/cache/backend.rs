//! Storage backends for the two cache tiers.
//!
//! The fast tier is a key/value store with add-if-absent semantics and a TTL
//! on write. The durable tier is a document store keyed by the same cache key.
//! Both are reached through object-safe async traits so deployments can plug
//! in shared stores; in-process implementations live here.

use std::{collections::HashMap, num::NonZeroUsize, sync::Arc, sync::RwLock};

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;

use super::clock::Clock;
use super::entry::{CacheEntry, expiry};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::backend";

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("{backend} cache backend unavailable: {message}")]
    Unavailable {
        backend: &'static str,
        message: String,
    },
}

impl BackendError {
    pub fn unavailable(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            backend,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait FastCacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Store only when no live entry exists. Returns whether the body was stored.
    async fn add(&self, key: &str, body: &str, ttl_seconds: u64) -> Result<bool, BackendError>;

    async fn set(&self, key: &str, body: &str, ttl_seconds: u64) -> Result<(), BackendError>;

    async fn delete(&self, key: &str) -> Result<bool, BackendError>;

    async fn clear(&self) -> Result<(), BackendError>;
}

/// Durable document store.
///
/// `get_by_id` must return the canonical stored record. Implementations must
/// not answer it from a cache of their own: the fast tier already plays that
/// role and a hidden second copy would survive invalidation.
#[async_trait]
pub trait DurableCacheBackend: Send + Sync {
    async fn get_by_id(&self, key: &str) -> Result<Option<CacheEntry>, BackendError>;

    /// Create or replace.
    async fn put(&self, entry: &CacheEntry) -> Result<(), BackendError>;

    async fn delete_by_id(&self, key: &str) -> Result<bool, BackendError>;

    async fn clear(&self) -> Result<(), BackendError>;
}

#[derive(Debug, Clone)]
struct FastSlot {
    body: String,
    expires_at: Option<OffsetDateTime>,
}

impl FastSlot {
    fn is_live(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }
}

/// In-process fast tier with LRU eviction and lazy expiry.
pub struct MemoryFastCache {
    entries: RwLock<LruCache<String, FastSlot>>,
    clock: Arc<dyn Clock>,
}

impl MemoryFastCache {
    pub fn new(capacity: NonZeroUsize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "fast_len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, body: &str, ttl_seconds: u64) -> FastSlot {
        FastSlot {
            body: body.to_string(),
            expires_at: expiry(self.clock.now(), ttl_seconds),
        }
    }

    fn insert(entries: &mut LruCache<String, FastSlot>, key: &str, slot: FastSlot) {
        if let Some((evicted, _)) = entries.push(key.to_string(), slot) {
            if evicted != key {
                counter!("htmlcache_fast_evict_total").increment(1);
            }
        }
    }
}

#[async_trait]
impl FastCacheBackend for MemoryFastCache {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let now = self.clock.now();
        let mut entries = rw_write(&self.entries, SOURCE, "fast_get");
        let lookup = entries
            .get(key)
            .map(|slot| slot.is_live(now).then(|| slot.body.clone()));
        match lookup {
            Some(Some(body)) => Ok(Some(body)),
            Some(None) => {
                entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn add(&self, key: &str, body: &str, ttl_seconds: u64) -> Result<bool, BackendError> {
        let now = self.clock.now();
        let mut entries = rw_write(&self.entries, SOURCE, "fast_add");
        if entries.peek(key).is_some_and(|slot| slot.is_live(now)) {
            return Ok(false);
        }
        Self::insert(&mut entries, key, self.slot(body, ttl_seconds));
        Ok(true)
    }

    async fn set(&self, key: &str, body: &str, ttl_seconds: u64) -> Result<(), BackendError> {
        let slot = self.slot(body, ttl_seconds);
        Self::insert(&mut rw_write(&self.entries, SOURCE, "fast_set"), key, slot);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        Ok(rw_write(&self.entries, SOURCE, "fast_delete")
            .pop(key)
            .is_some())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        rw_write(&self.entries, SOURCE, "fast_clear").clear();
        Ok(())
    }
}

/// In-process durable tier, for tests and single-node deployments without a
/// database.
#[derive(Default)]
pub struct MemoryDurableCache {
    documents: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryDurableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.documents, SOURCE, "durable_len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DurableCacheBackend for MemoryDurableCache {
    async fn get_by_id(&self, key: &str) -> Result<Option<CacheEntry>, BackendError> {
        Ok(rw_read(&self.documents, SOURCE, "durable_get")
            .get(key)
            .cloned())
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), BackendError> {
        rw_write(&self.documents, SOURCE, "durable_put").insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn delete_by_id(&self, key: &str) -> Result<bool, BackendError> {
        Ok(rw_write(&self.documents, SOURCE, "durable_delete")
            .remove(key)
            .is_some())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        rw_write(&self.documents, SOURCE, "durable_clear").clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use time::Duration;

    use super::*;
    use crate::cache::clock::ManualClock;

    fn fast(capacity: usize) -> (Arc<ManualClock>, MemoryFastCache) {
        let clock = Arc::new(ManualClock::default());
        let cache = MemoryFastCache::new(
            NonZeroUsize::new(capacity).expect("capacity should be non-zero"),
            clock.clone(),
        );
        (clock, cache)
    }

    #[tokio::test]
    async fn add_never_overwrites_a_live_entry() {
        let (_, cache) = fast(8);

        assert!(cache.add("/a", "first", 60).await.unwrap());
        assert!(!cache.add("/a", "second", 60).await.unwrap());
        assert_eq!(cache.get("/a").await.unwrap().as_deref(), Some("first"));

        cache.set("/a", "third", 60).await.unwrap();
        assert_eq!(cache.get("/a").await.unwrap().as_deref(), Some("third"));
    }

    #[tokio::test]
    async fn entries_expire_lazily() {
        let (clock, cache) = fast(8);
        cache.add("/a", "body", 1).await.unwrap();
        assert_eq!(cache.get("/a").await.unwrap().as_deref(), Some("body"));

        clock.advance(Duration::seconds(1));
        assert!(cache.get("/a").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn add_replaces_an_expired_entry() {
        let (clock, cache) = fast(8);
        cache.add("/a", "old", 1).await.unwrap();
        clock.advance(Duration::seconds(5));

        assert!(cache.add("/a", "new", 1).await.unwrap());
        assert_eq!(cache.get("/a").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn least_recently_used_entry_is_evicted() {
        let (_, cache) = fast(2);
        cache.add("/1", "one", 60).await.unwrap();
        cache.add("/2", "two", 60).await.unwrap();
        assert!(cache.get("/1").await.unwrap().is_some());

        cache.add("/3", "three", 60).await.unwrap();

        assert!(cache.get("/2").await.unwrap().is_none());
        assert!(cache.get("/1").await.unwrap().is_some());
        assert!(cache.get("/3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn durable_put_replaces() {
        let store = MemoryDurableCache::new();
        let created = OffsetDateTime::UNIX_EPOCH;
        store
            .put(&CacheEntry::new("/a", "one", 60, created))
            .await
            .unwrap();
        store
            .put(&CacheEntry::new("/a", "two", 60, created))
            .await
            .unwrap();

        let entry = store.get_by_id("/a").await.unwrap().expect("stored entry");
        assert_eq!(entry.body, "two");
        assert_eq!(store.len(), 1);

        assert!(store.delete_by_id("/a").await.unwrap());
        assert!(!store.delete_by_id("/a").await.unwrap());
    }

    #[tokio::test]
    async fn fast_cache_recovers_from_poisoned_lock() {
        let (_, cache) = fast(4);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = cache
                .entries
                .write()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        cache.add("/a", "body", 60).await.unwrap();
        assert!(cache.get("/a").await.unwrap().is_some());
    }
}

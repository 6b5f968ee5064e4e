//! Two-tier cache store adapter.
//!
//! Backend failures never reach the caller: a failed read is a miss and a
//! failed write is logged and dropped.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use super::backend::{BackendError, DurableCacheBackend, FastCacheBackend};
use super::clock::Clock;
use super::entry::CacheEntry;
use super::keys::CacheKey;

#[derive(Clone)]
pub struct CacheStore {
    fast: Arc<dyn FastCacheBackend>,
    durable: Option<Arc<dyn DurableCacheBackend>>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    pub fn new(fast: Arc<dyn FastCacheBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            fast,
            durable: None,
            clock,
        }
    }

    pub fn with_durable(mut self, durable: Arc<dyn DurableCacheBackend>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn has_durable(&self) -> bool {
        self.durable.is_some()
    }

    pub async fn fast_get(&self, key: &CacheKey) -> Option<String> {
        match self.fast.get(key.as_str()).await {
            Ok(Some(body)) => {
                counter!("htmlcache_fast_hit_total").increment(1);
                debug!(cache = "fast", outcome = "hit", key = %key);
                Some(body)
            }
            Ok(None) => {
                counter!("htmlcache_fast_miss_total").increment(1);
                debug!(cache = "fast", outcome = "miss", key = %key);
                None
            }
            Err(error) => {
                backend_failed("fast_get", key, &error);
                None
            }
        }
    }

    /// Add semantics: an existing live entry is left in place.
    pub async fn fast_put(&self, key: &CacheKey, body: &str, ttl_seconds: u64) {
        match self.fast.add(key.as_str(), body, ttl_seconds).await {
            Ok(stored) => debug!(cache = "fast", stored, key = %key, "fast tier add"),
            Err(error) => backend_failed("fast_put", key, &error),
        }
    }

    /// Reads the durable tier; an expired entry is deleted and reported as a miss.
    pub async fn durable_get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let durable = self.durable.as_ref()?;

        let entry = match durable.get_by_id(key.as_str()).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                counter!("htmlcache_durable_miss_total").increment(1);
                return None;
            }
            Err(error) => {
                backend_failed("durable_get", key, &error);
                return None;
            }
        };

        if entry.is_expired(self.clock.now()) {
            counter!("htmlcache_durable_expired_total").increment(1);
            debug!(cache = "durable", outcome = "expired", key = %key);
            if let Err(error) = durable.delete_by_id(key.as_str()).await {
                backend_failed("durable_delete", key, &error);
            }
            return None;
        }

        counter!("htmlcache_durable_hit_total").increment(1);
        debug!(cache = "durable", outcome = "hit", key = %key);
        Some(entry)
    }

    /// Create or replace, stamping the entry with the current time.
    pub async fn durable_put(&self, key: &CacheKey, body: &str, ttl_seconds: u64) {
        let Some(durable) = self.durable.as_ref() else {
            return;
        };

        let entry = CacheEntry::new(key.as_str(), body, ttl_seconds, self.clock.now());
        if let Err(error) = durable.put(&entry).await {
            backend_failed("durable_put", key, &error);
        }
    }

    /// Drop every entry from both tiers.
    pub async fn reset(&self) {
        if let Err(error) = self.fast.clear().await {
            warn!(op = "fast_clear", error = %error, "failed to clear fast tier");
        }
        if let Some(durable) = self.durable.as_ref() {
            if let Err(error) = durable.clear().await {
                warn!(op = "durable_clear", error = %error, "failed to clear durable tier");
            }
        }
    }
}

fn backend_failed(op: &'static str, key: &CacheKey, error: &BackendError) {
    counter!("htmlcache_backend_error_total").increment(1);
    warn!(op, key = %key, error = %error, "cache backend call failed, continuing without it");
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use async_trait::async_trait;
    use time::Duration;

    use super::*;
    use crate::cache::backend::{MemoryDurableCache, MemoryFastCache};
    use crate::cache::clock::ManualClock;

    struct Fixture {
        clock: Arc<ManualClock>,
        durable: Arc<MemoryDurableCache>,
        store: CacheStore,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let fast = Arc::new(MemoryFastCache::new(NonZeroUsize::MIN, clock.clone()));
        let durable = Arc::new(MemoryDurableCache::new());
        let store = CacheStore::new(fast, clock.clone()).with_durable(durable.clone());
        Fixture {
            clock,
            durable,
            store,
        }
    }

    struct Unreachable;

    #[async_trait]
    impl FastCacheBackend for Unreachable {
        async fn get(&self, _: &str) -> Result<Option<String>, BackendError> {
            Err(BackendError::unavailable("fast", "connection refused"))
        }
        async fn add(&self, _: &str, _: &str, _: u64) -> Result<bool, BackendError> {
            Err(BackendError::unavailable("fast", "connection refused"))
        }
        async fn set(&self, _: &str, _: &str, _: u64) -> Result<(), BackendError> {
            Err(BackendError::unavailable("fast", "connection refused"))
        }
        async fn delete(&self, _: &str) -> Result<bool, BackendError> {
            Err(BackendError::unavailable("fast", "connection refused"))
        }
        async fn clear(&self) -> Result<(), BackendError> {
            Err(BackendError::unavailable("fast", "connection refused"))
        }
    }

    #[tokio::test]
    async fn durable_entry_round_trips_until_expiry() {
        let fx = fixture();
        let key = CacheKey::from("test-key");

        assert!(fx.store.durable_get(&key).await.is_none());

        fx.store.durable_put(&key, "test text δ", 10).await;
        let entry = fx.store.durable_get(&key).await.expect("live entry");
        assert_eq!(entry.body, "test text δ");
        assert_eq!(entry.ttl_seconds, 10);
        assert_eq!(entry.created_at, fx.clock.now());

        fx.clock.advance(Duration::seconds(10));
        assert!(fx.store.durable_get(&key).await.is_none());
        assert!(fx.durable.is_empty(), "expired entry should be deleted");
    }

    #[tokio::test]
    async fn fast_put_keeps_first_writer() {
        let fx = fixture();
        let key = CacheKey::from("/race");

        fx.store.fast_put(&key, "first", 60).await;
        fx.store.fast_put(&key, "second", 60).await;
        assert_eq!(fx.store.fast_get(&key).await.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn durable_tier_is_optional() {
        let clock = Arc::new(ManualClock::default());
        let fast = Arc::new(MemoryFastCache::new(NonZeroUsize::MIN, clock.clone()));
        let store = CacheStore::new(fast, clock);
        let key = CacheKey::from("/a");

        store.durable_put(&key, "body", 60).await;
        assert!(!store.has_durable());
        assert!(store.durable_get(&key).await.is_none());
    }

    #[tokio::test]
    async fn unavailable_backend_degrades_to_miss() {
        let store = CacheStore::new(Arc::new(Unreachable), Arc::new(ManualClock::default()));
        let key = CacheKey::from("/a");

        store.fast_put(&key, "body", 60).await;
        assert!(store.fast_get(&key).await.is_none());
        store.reset().await;
    }

    #[tokio::test]
    async fn reset_clears_both_tiers() {
        let fx = fixture();
        let key = CacheKey::from("/a");
        fx.store.fast_put(&key, "body", 60).await;
        fx.store.durable_put(&key, "body", 60).await;

        fx.store.reset().await;

        assert!(fx.store.fast_get(&key).await.is_none());
        assert!(fx.store.durable_get(&key).await.is_none());
    }
}

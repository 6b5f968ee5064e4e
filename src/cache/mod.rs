//! Page cache.
//!
//! Two tiers sit in front of a render action:
//!
//! - **Fast tier**: low-latency key/value store with add-if-absent writes.
//! - **Durable tier**: optional document store, consulted on a fast miss.
//!
//! Entries expire lazily on read. Freshly rendered markup is minified before
//! it is stored; cached markup is served as stored.
//!
//! ```toml
//! [cache]
//! ttl_seconds = 86400
//! minify = true
//! include_comments = false
//! use_durable_tier = false
//! ```

mod backend;
mod clock;
mod config;
mod deployment;
mod entry;
mod keys;
mod lock;
mod middleware;
mod render;
mod store;

pub use backend::{
    BackendError, DurableCacheBackend, FastCacheBackend, MemoryDurableCache, MemoryFastCache,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheOptions, SkipCheck};
pub use deployment::{DeploymentCheck, EnvDeployment, FixedDeployment};
pub use entry::{CacheEntry, DEFAULT_TTL_SECONDS};
pub use keys::CacheKey;
pub use middleware::{
    CacheState, PageRequest, X_CACHE, response_cache_layer, should_store_response,
};
pub use render::{
    CachedRender, PageSource, RenderAction, RenderCache, RequestContext, ServedPage,
};
pub use store::CacheStore;

//! Cache-and-render orchestration.
//!
//! [`RenderCache::wrap`] composes a render action with the two cache tiers:
//! fast lookup, durable lookup, render on a full miss, minify, write back to
//! the tiers that missed. Only the render path runs application logic and only
//! the render path minifies; cached bodies are served as stored.

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use tracing::{debug, instrument, warn};

use crate::minify::minify;

use super::config::CacheOptions;
use super::deployment::DeploymentCheck;
use super::keys::CacheKey;
use super::store::CacheStore;

/// What the cache needs to know about an inbound request.
pub trait RequestContext: Send + Sync {
    fn path(&self) -> &str;

    fn query(&self) -> &str;

    /// Privileged callers always see freshly rendered pages.
    fn is_privileged(&self) -> bool {
        false
    }
}

/// Produces the markup for a request.
///
/// An error means the response must not be cached; it is handed back to the
/// caller untouched.
#[async_trait]
pub trait RenderAction<C: ?Sized + Sync>: Send + Sync {
    type Error: Send;

    async fn render(&self, context: &C) -> Result<String, Self::Error>;
}

/// Where a served body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSource {
    Fast,
    Durable,
    Rendered,
    /// Caching inactive for this request (development mode or privileged caller).
    Uncached,
    /// The skip check matched.
    Bypassed,
}

impl PageSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "hit-fast",
            Self::Durable => "hit-durable",
            Self::Rendered => "miss",
            Self::Uncached => "uncached",
            Self::Bypassed => "bypass",
        }
    }
}

/// A body ready to be written to the caller's output channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedPage {
    pub body: String,
    pub source: PageSource,
    /// Set only for cache hits, when a content type override is configured.
    pub content_type: Option<String>,
}

impl ServedPage {
    fn fresh(body: String, source: PageSource) -> Self {
        Self {
            body,
            source,
            content_type: None,
        }
    }
}

/// Explicit cache state: constructed at start-up, shared by every wrapped
/// action, cleared with [`reset`](Self::reset).
#[derive(Clone)]
pub struct RenderCache {
    store: CacheStore,
    deployment: Arc<dyn DeploymentCheck>,
}

impl RenderCache {
    pub fn new(store: CacheStore, deployment: Arc<dyn DeploymentCheck>) -> Self {
        Self { store, deployment }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub async fn reset(&self) {
        self.store.reset().await;
    }

    pub fn wrap<C, A>(&self, options: CacheOptions<C>, action: A) -> CachedRender<C, A>
    where
        C: RequestContext + ?Sized,
        A: RenderAction<C>,
    {
        CachedRender {
            cache: self.clone(),
            options,
            action,
        }
    }

    fn caching_active<C: RequestContext + ?Sized>(&self, context: &C) -> bool {
        !self.deployment.is_development() && !context.is_privileged()
    }
}

/// A render action composed with the cache.
pub struct CachedRender<C: ?Sized, A> {
    cache: RenderCache,
    options: CacheOptions<C>,
    action: A,
}

impl<C, A> CachedRender<C, A>
where
    C: RequestContext + ?Sized,
    A: RenderAction<C>,
{
    #[instrument(skip_all, fields(path = %context.path()))]
    pub async fn call(&self, context: &C) -> Result<ServedPage, A::Error> {
        if self.options.should_skip(context) {
            debug!(cache = "render", outcome = "bypass", "skip check matched");
            let body = self.action.render(context).await?;
            return Ok(ServedPage::fresh(body, PageSource::Bypassed));
        }

        if !self.cache.caching_active(context) {
            debug!(cache = "render", outcome = "uncached", "caching inactive");
            let body = self.render(context).await?;
            return Ok(ServedPage::fresh(body, PageSource::Uncached));
        }

        let key = CacheKey::from_request(context.path(), context.query());
        let store = self.cache.store();
        let ttl_seconds = self.options.ttl_seconds;

        if let Some(body) = store.fast_get(&key).await {
            return Ok(self.from_cache(body, PageSource::Fast));
        }

        if self.options.use_durable_tier {
            if let Some(entry) = store.durable_get(&key).await {
                store.fast_put(&key, &entry.body, ttl_seconds).await;
                return Ok(self.from_cache(entry.body, PageSource::Durable));
            }
        }

        let body = self.render(context).await?;
        if !body.is_empty() {
            store.fast_put(&key, &body, ttl_seconds).await;
            if self.options.use_durable_tier {
                store.durable_put(&key, &body, ttl_seconds).await;
            }
        }

        Ok(ServedPage::fresh(body, PageSource::Rendered))
    }

    fn from_cache(&self, body: String, source: PageSource) -> ServedPage {
        ServedPage {
            body,
            source,
            content_type: self.options.content_type.clone(),
        }
    }

    /// Runs the action and minifies its output, falling back to the raw
    /// markup when it cannot be parsed.
    async fn render(&self, context: &C) -> Result<String, A::Error> {
        let started = Instant::now();
        let body = self.action.render(context).await?;
        histogram!("htmlcache_render_ms").record(started.elapsed().as_secs_f64() * 1000.0);

        if !self.options.minify {
            return Ok(body);
        }

        match minify(&body, &self.options.minify_options()) {
            Ok(minified) => Ok(minified),
            Err(error) => {
                counter!("htmlcache_minify_error_total").increment(1);
                warn!(error = %error, html = %body, "HTML parse error, using unminified markup");
                Ok(body)
            }
        }
    }
}

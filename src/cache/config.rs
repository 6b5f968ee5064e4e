//! Per-route cache options.

use std::{fmt, sync::Arc};

use crate::minify::MinifyOptions;

use super::entry::DEFAULT_TTL_SECONDS;

/// Predicate deciding that a request must bypass the cache entirely.
pub type SkipCheck<C> = Arc<dyn Fn(&C) -> bool + Send + Sync>;

/// Options recognised when wrapping a render action.
pub struct CacheOptions<C: ?Sized> {
    /// Entry lifetime in both tiers.
    pub ttl_seconds: u64,
    /// Minify freshly rendered markup before caching it.
    pub minify: bool,
    /// Keep comments when minifying.
    pub include_comments: bool,
    /// Consult and populate the durable tier.
    pub use_durable_tier: bool,
    /// When it returns true the action runs with no cache interaction.
    pub skip_check: Option<SkipCheck<C>>,
    /// Content type reported for pages served from cache.
    pub content_type: Option<String>,
}

impl<C: ?Sized> CacheOptions<C> {
    pub fn skip_when(mut self, check: impl Fn(&C) -> bool + Send + Sync + 'static) -> Self {
        self.skip_check = Some(Arc::new(check));
        self
    }

    pub(crate) fn should_skip(&self, context: &C) -> bool {
        self.skip_check.as_ref().is_some_and(|check| check(context))
    }

    pub fn minify_options(&self) -> MinifyOptions {
        MinifyOptions::with_comments(self.include_comments)
    }
}

impl<C: ?Sized> Default for CacheOptions<C> {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL_SECONDS,
            minify: true,
            include_comments: false,
            use_durable_tier: false,
            skip_check: None,
            content_type: None,
        }
    }
}

impl<C: ?Sized> Clone for CacheOptions<C> {
    fn clone(&self) -> Self {
        Self {
            ttl_seconds: self.ttl_seconds,
            minify: self.minify,
            include_comments: self.include_comments,
            use_durable_tier: self.use_durable_tier,
            skip_check: self.skip_check.clone(),
            content_type: self.content_type.clone(),
        }
    }
}

impl<C: ?Sized> fmt::Debug for CacheOptions<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("ttl_seconds", &self.ttl_seconds)
            .field("minify", &self.minify)
            .field("include_comments", &self.include_comments)
            .field("use_durable_tier", &self.use_durable_tier)
            .field("skip_check", &self.skip_check.is_some())
            .field("content_type", &self.content_type)
            .finish()
    }
}

impl<C: ?Sized> From<&crate::config::CacheSettings> for CacheOptions<C> {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            ttl_seconds: settings.ttl_seconds.get(),
            minify: settings.minify,
            include_comments: settings.include_comments,
            use_durable_tier: settings.use_durable_tier,
            skip_check: None,
            content_type: settings.content_type.clone(),
        }
    }
}

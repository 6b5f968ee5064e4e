use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use htmlcache::cache::{
    CacheEntry, CacheKey, CacheOptions, CacheStore, Clock, DurableCacheBackend, FixedDeployment,
    ManualClock, MemoryDurableCache, MemoryFastCache, PageSource, RenderAction, RenderCache,
    RequestContext,
};
use time::{Duration, macros::datetime};

struct Page {
    path: &'static str,
    query: &'static str,
}

impl Page {
    fn at(path: &'static str) -> Self {
        Self { path, query: "" }
    }
}

impl RequestContext for Page {
    fn path(&self) -> &str {
        self.path
    }

    fn query(&self) -> &str {
        self.query
    }
}

/// Render action whose output depends on how many times it has run.
struct Script {
    calls: Arc<AtomicUsize>,
    outcome: fn(usize) -> Result<String, &'static str>,
}

impl Script {
    fn new(outcome: fn(usize) -> Result<String, &'static str>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: calls.clone(),
                outcome,
            },
            calls,
        )
    }
}

#[async_trait]
impl RenderAction<Page> for Script {
    type Error = &'static str;

    async fn render(&self, _: &Page) -> Result<String, &'static str> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.outcome)(call)
    }
}

struct Fixture {
    clock: Arc<ManualClock>,
    durable: Arc<MemoryDurableCache>,
    cache: RenderCache,
}

fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 0:00 UTC)));
    let durable = Arc::new(MemoryDurableCache::new());
    let cache = cache_over(clock.clone(), durable.clone());
    Fixture {
        clock,
        durable,
        cache,
    }
}

/// A fresh fast tier in front of an existing durable tier, as after a restart.
fn cache_over(clock: Arc<ManualClock>, durable: Arc<MemoryDurableCache>) -> RenderCache {
    let capacity = NonZeroUsize::new(64).expect("non-zero capacity");
    let fast = Arc::new(MemoryFastCache::new(capacity, clock.clone()));
    let store = CacheStore::new(fast, clock).with_durable(durable);
    RenderCache::new(store, Arc::new(FixedDeployment { development: false }))
}

fn durable_options() -> CacheOptions<Page> {
    CacheOptions {
        use_durable_tier: true,
        ..CacheOptions::default()
    }
}

fn greeting(_: usize) -> Result<String, &'static str> {
    Ok("<html>\n  <body>\n    <p>Hello,   world</p>\n  </body>\n</html>".to_string())
}

#[tokio::test]
async fn repeated_requests_render_once() {
    let fx = fixture();
    let (action, calls) = Script::new(greeting);
    let wrapped = fx.cache.wrap(durable_options(), action);
    let page = Page::at("/hello");

    let first = wrapped.call(&page).await.expect("render");
    let second = wrapped.call(&page).await.expect("cached");

    assert_eq!(first.source, PageSource::Rendered);
    assert_eq!(second.source, PageSource::Fast);
    assert_eq!(first.body, second.body);
    assert_eq!(second.body, "<html> <body> <p>Hello, world</p> </body> </html>");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn query_string_is_part_of_the_key() {
    let fx = fixture();
    let (action, calls) = Script::new(|call| Ok(format!("<p>{call}</p>")));
    let wrapped = fx.cache.wrap(CacheOptions::default(), action);

    let plain = wrapped.call(&Page::at("/list")).await.expect("render");
    let paged = wrapped
        .call(&Page {
            path: "/list",
            query: "page=2",
        })
        .await
        .expect("render");

    assert_eq!(plain.body, "<p>0</p>");
    assert_eq!(paged.body, "<p>1</p>");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn entries_expire_after_their_ttl() {
    let fx = fixture();
    let (action, calls) = Script::new(|call| Ok(format!("<p>version {call}</p>")));
    let options = CacheOptions {
        ttl_seconds: 1,
        ..durable_options()
    };
    let wrapped = fx.cache.wrap(options, action);
    let page = Page::at("/ttl");

    assert_eq!(wrapped.call(&page).await.expect("render").body, "<p>version 0</p>");
    assert_eq!(wrapped.call(&page).await.expect("hit").source, PageSource::Fast);

    fx.clock.advance(Duration::seconds(1));

    let refreshed = wrapped.call(&page).await.expect("render");
    assert_eq!(refreshed.source, PageSource::Rendered);
    assert_eq!(refreshed.body, "<p>version 1</p>");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn durable_tier_survives_a_cold_fast_tier() {
    let fx = fixture();
    let (action, calls) = Script::new(greeting);
    fx.cache
        .wrap(durable_options(), action)
        .call(&Page::at("/"))
        .await
        .expect("render");
    assert_eq!(fx.durable.len(), 1);

    let restarted = cache_over(fx.clock.clone(), fx.durable.clone());
    let (action, restarted_calls) = Script::new(greeting);
    let wrapped = restarted.wrap(durable_options(), action);

    let from_durable = wrapped.call(&Page::at("/")).await.expect("durable hit");
    let from_fast = wrapped.call(&Page::at("/")).await.expect("fast hit");

    assert_eq!(from_durable.source, PageSource::Durable);
    assert_eq!(from_fast.source, PageSource::Fast);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(restarted_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn durable_tier_is_ignored_unless_enabled() {
    let fx = fixture();
    let (action, _) = Script::new(greeting);
    fx.cache
        .wrap(CacheOptions::default(), action)
        .call(&Page::at("/"))
        .await
        .expect("render");

    assert!(fx.durable.is_empty());
}

#[tokio::test]
async fn expired_durable_entries_are_deleted_on_read() {
    let fx = fixture();
    let stale = CacheEntry::new(
        "/old",
        "<p>stale</p>",
        60,
        fx.clock.now() - Duration::minutes(5),
    );
    fx.durable.put(&stale).await.expect("seed entry");

    let (action, calls) = Script::new(|_| Ok("<p>fresh</p>".to_string()));
    let page = fx
        .cache
        .wrap(durable_options(), action)
        .call(&Page::at("/old"))
        .await
        .expect("render");

    assert_eq!(page.source, PageSource::Rendered);
    assert_eq!(page.body, "<p>fresh</p>");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stored = fx
        .cache
        .store()
        .durable_get(&CacheKey::from("/old"))
        .await
        .expect("fresh entry");
    assert_eq!(stored.body, "<p>fresh</p>");
}

#[tokio::test]
async fn skip_check_bypasses_reads_and_writes() {
    let fx = fixture();
    let (action, calls) = Script::new(|_| Ok("<p>  admin  </p>".to_string()));
    let options = durable_options().skip_when(|page: &Page| page.path.starts_with("/admin"));
    let wrapped = fx.cache.wrap(options, action);

    for _ in 0..2 {
        let page = wrapped.call(&Page::at("/admin")).await.expect("render");
        assert_eq!(page.source, PageSource::Bypassed);
        assert_eq!(page.body, "<p>  admin  </p>");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(fx.cache.store().fast_get(&CacheKey::from("/admin")).await.is_none());
    assert!(fx.durable.is_empty());
}

#[tokio::test]
async fn failed_renders_are_not_cached() {
    let fx = fixture();
    let (action, calls) = Script::new(|call| match call {
        0 => Err("database down"),
        _ => Ok("<p>recovered</p>".to_string()),
    });
    let wrapped = fx.cache.wrap(durable_options(), action);
    let page = Page::at("/flaky");

    assert_eq!(wrapped.call(&page).await, Err("database down"));

    let recovered = wrapped.call(&page).await.expect("render");
    assert_eq!(recovered.source, PageSource::Rendered);
    assert_eq!(recovered.body, "<p>recovered</p>");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn empty_output_is_not_cached() {
    let fx = fixture();
    let (action, calls) = Script::new(|_| Ok(String::new()));
    let wrapped = fx.cache.wrap(durable_options(), action);
    let page = Page::at("/empty");

    for _ in 0..2 {
        let served = wrapped.call(&page).await.expect("render");
        assert_eq!(served.source, PageSource::Rendered);
        assert!(served.body.is_empty());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(fx.durable.is_empty());
}

#[tokio::test]
async fn content_type_override_applies_to_cache_hits() {
    let fx = fixture();
    let (action, _) = Script::new(greeting);
    let options = CacheOptions {
        content_type: Some("text/html; charset=iso-8859-1".to_string()),
        ..CacheOptions::default()
    };
    let wrapped = fx.cache.wrap(options, action);

    let rendered = wrapped.call(&Page::at("/")).await.expect("render");
    let cached = wrapped.call(&Page::at("/")).await.expect("hit");

    assert_eq!(rendered.content_type, None);
    assert_eq!(
        cached.content_type.as_deref(),
        Some("text/html; charset=iso-8859-1")
    );
}

#[tokio::test]
async fn unparseable_markup_is_served_and_cached_unminified() {
    let fx = fixture();
    let (action, calls) = Script::new(|_| Ok("<p>  broken  </p><div class=\"x".to_string()));
    let wrapped = fx.cache.wrap(CacheOptions::default(), action);
    let page = Page::at("/broken");

    let rendered = wrapped.call(&page).await.expect("render");
    let cached = wrapped.call(&page).await.expect("hit");

    assert_eq!(rendered.body, "<p>  broken  </p><div class=\"x");
    assert_eq!(cached.source, PageSource::Fast);
    assert_eq!(cached.body, rendered.body);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn minification_can_be_disabled() {
    let fx = fixture();
    let (action, _) = Script::new(greeting);
    let options = CacheOptions {
        minify: false,
        ..CacheOptions::default()
    };
    let wrapped = fx.cache.wrap(options, action);

    let page = wrapped.call(&Page::at("/")).await.expect("render");
    assert_eq!(page.body, greeting(0).expect("fixture markup"));
}

#[tokio::test]
async fn comments_survive_when_requested() {
    let fx = fixture();
    let (action, _) = Script::new(|_| Ok("<p>a</p>  <!-- keep -->  <p>b</p>".to_string()));
    let options = CacheOptions {
        include_comments: true,
        ..CacheOptions::default()
    };

    let page = fx
        .cache
        .wrap(options, action)
        .call(&Page::at("/"))
        .await
        .expect("render");
    assert_eq!(page.body, "<p>a</p> <!-- keep --> <p>b</p>");
}

#[tokio::test]
async fn reset_drops_both_tiers() {
    let fx = fixture();
    let (action, calls) = Script::new(greeting);
    let wrapped = fx.cache.wrap(durable_options(), action);

    wrapped.call(&Page::at("/")).await.expect("render");
    fx.cache.reset().await;
    assert!(fx.durable.is_empty());

    let page = wrapped.call(&Page::at("/")).await.expect("render");
    assert_eq!(page.source, PageSource::Rendered);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn development_deployment_renders_every_time_but_still_minifies() {
    let clock = Arc::new(ManualClock::default());
    let fast = Arc::new(MemoryFastCache::new(NonZeroUsize::MIN, clock.clone()));
    let cache = RenderCache::new(
        CacheStore::new(fast, clock),
        Arc::new(FixedDeployment { development: true }),
    );
    let (action, calls) = Script::new(greeting);
    let wrapped = cache.wrap(CacheOptions::default(), action);

    for _ in 0..3 {
        let page = wrapped.call(&Page::at("/")).await.expect("render");
        assert_eq!(page.source, PageSource::Uncached);
        assert_eq!(page.body, "<html> <body> <p>Hello, world</p> </body> </html>");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the cache emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "htmlcache_fast_hit_total",
            Unit::Count,
            "Total number of fast tier hits."
        );
        describe_counter!(
            "htmlcache_fast_miss_total",
            Unit::Count,
            "Total number of fast tier misses."
        );
        describe_counter!(
            "htmlcache_fast_evict_total",
            Unit::Count,
            "Total number of fast tier evictions due to capacity."
        );
        describe_counter!(
            "htmlcache_durable_hit_total",
            Unit::Count,
            "Total number of durable tier hits."
        );
        describe_counter!(
            "htmlcache_durable_miss_total",
            Unit::Count,
            "Total number of durable tier misses."
        );
        describe_counter!(
            "htmlcache_durable_expired_total",
            Unit::Count,
            "Total number of expired durable entries deleted on read."
        );
        describe_counter!(
            "htmlcache_minify_error_total",
            Unit::Count,
            "Total number of rendered pages served unminified after a parse error."
        );
        describe_counter!(
            "htmlcache_backend_error_total",
            Unit::Count,
            "Total number of cache backend operations that failed."
        );
        describe_histogram!(
            "htmlcache_render_ms",
            Unit::Milliseconds,
            "Render action latency in milliseconds."
        );
    });
}

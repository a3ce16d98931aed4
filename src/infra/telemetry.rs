use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

const CACHE_TARGET: &str = env!("CARGO_CRATE_NAME");
const OTHER_TARGETS_LEVEL: &str = "warn";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set. Otherwise events from this crate are logged at
/// `logging.level` and everything else at `warn`.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(logging.level))
            .map_err(|err| InfraError::telemetry(format!("invalid log filter: {err}")))?,
    };

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("subscriber already installed: {err}")))
}

fn default_directives(level: LevelFilter) -> String {
    format!("{OTHER_TARGETS_LEVEL},{CACHE_TARGET}={level}")
}

/// Register descriptions for the cache counters with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "callcache_hit_total",
            Unit::Count,
            "Total number of calls served from a live cache entry."
        );
        describe_counter!(
            "callcache_miss_total",
            Unit::Count,
            "Total number of cacheable calls that had to call the origin."
        );
        describe_counter!(
            "callcache_bypass_total",
            Unit::Count,
            "Total number of calls whose verb is not cacheable."
        );
        describe_counter!(
            "callcache_evict_total",
            Unit::Count,
            "Total number of entries evicted due to capacity."
        );
        describe_counter!(
            "callcache_refresh_total",
            Unit::Count,
            "Total number of successful forced refreshes."
        );
    });
}

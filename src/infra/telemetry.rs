use std::io::{IsTerminal, stderr};
use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing::Subscriber;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Installs the process-wide subscriber for the CLI.
///
/// Output goes to stderr; stdout carries the JSON result. Closing `view` spans are
/// logged with their busy/idle time.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default())
        .with(output_layer(logging.format))
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("subscriber already installed: {err}")))
}

fn output_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let base = fmt::layer()
        .with_writer(stderr)
        .with_span_events(FmtSpan::CLOSE);
    match format {
        LogFormat::Json => base.json().with_current_span(false).boxed(),
        LogFormat::Compact => base.compact().with_ansi(stderr().is_terminal()).boxed(),
    }
}

/// Register descriptions for every render cache metric. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "render_cache_hit_total",
            Unit::Count,
            "Objects served from the render cache."
        );
        describe_counter!(
            "render_cache_miss_total",
            Unit::Count,
            "Objects rendered because no usable cache entry was found."
        );
        describe_counter!(
            "render_cache_store_error_total",
            Unit::Count,
            "Failed cache store reads and writes, labelled by operation."
        );
        describe_counter!(
            "render_cache_evict_total",
            Unit::Count,
            "In-memory entries evicted once a bin reached capacity."
        );
        describe_histogram!(
            "render_cache_view_ms",
            Unit::Milliseconds,
            "Wall time of one batched render pass."
        );
    });
}

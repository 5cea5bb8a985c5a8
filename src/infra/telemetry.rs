use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing::Subscriber;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Chatty dependencies stay at `warn` unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: [&str; 2] = ["hyper=warn", "tower_http=warn"];

/// Install the global subscriber: level from settings, refined by `RUST_LOG`,
/// compact or JSON lines, plus span traces for error reports.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    tracing_subscriber::registry()
        .with(env_filter(logging))
        .with(ErrorLayer::default())
        .with(format_layer(logging.format))
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("failed to install subscriber: {err}")))
}

fn env_filter(logging: &LoggingSettings) -> EnvFilter {
    let mut filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return filter;
    }
    for directive in QUIET_TARGETS {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

fn format_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    }
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "mdexport_export_total",
            Unit::Count,
            "Export requests by format and result."
        );
        describe_histogram!(
            "mdexport_export_ms",
            Unit::Milliseconds,
            "Export latency including time spent waiting for a conversion permit."
        );
        describe_gauge!(
            "mdexport_export_inflight",
            Unit::Count,
            "Conversions currently holding a permit."
        );
        describe_counter!(
            "mdexport_preview_total",
            Unit::Count,
            "Preview renders by result."
        );
    });
}

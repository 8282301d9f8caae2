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

pub const METRIC_DELIVERIES_TOTAL: &str = "tidings_deliveries_total";
pub const METRIC_DISPATCH_TICKS_TOTAL: &str = "tidings_dispatch_ticks_total";
pub const METRIC_DISPATCH_TICK_MS: &str = "tidings_dispatch_tick_ms";

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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_DELIVERIES_TOTAL,
            Unit::Count,
            "Dispatch outcomes per due task, labelled by outcome."
        );
        describe_counter!(
            METRIC_DISPATCH_TICKS_TOTAL,
            Unit::Count,
            "Dispatch ticks run, labelled by result."
        );
        describe_histogram!(
            METRIC_DISPATCH_TICK_MS,
            Unit::Milliseconds,
            "Wall time of one dispatch tick in milliseconds."
        );
    });
}

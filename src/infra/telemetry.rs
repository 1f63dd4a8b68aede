use std::sync::Once;

use metrics::{Unit, describe_counter};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Error)]
#[error("telemetry initialization failed: {0}")]
pub struct TelemetryError(String);

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(logging.level).into())
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
        .map_err(|err| TelemetryError(format!("failed to install tracing subscriber: {err}")))
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "kasha_cache_status_total",
            Unit::Count,
            "Resolved requests by cache status label."
        );
        describe_counter!(
            "kasha_dispatch_total",
            Unit::Count,
            "Render jobs published to the broker, by delivery mode."
        );
        describe_counter!(
            "kasha_passthrough_total",
            Unit::Count,
            "Requests forwarded to the live proxy for excluded paths."
        );
        describe_counter!(
            "kasha_fallback_fetch_total",
            Unit::Count,
            "Fallback pre-fetches answered directly from the origin."
        );
        describe_counter!(
            "kasha_lock_wait_timeout_total",
            Unit::Count,
            "Lock waits that hit the timeout deadline."
        );
        describe_counter!(
            "kasha_reply_discarded_total",
            Unit::Count,
            "Worker replies dropped for unknown or already-resolved correlation ids."
        );
        describe_counter!(
            "kasha_callback_attempt_total",
            Unit::Count,
            "Webhook callback POST attempts."
        );
        describe_counter!(
            "kasha_callback_gave_up_total",
            Unit::Count,
            "Webhook deliveries abandoned after exhausting retries."
        );
    });
}

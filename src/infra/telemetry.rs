use std::io;
use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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
///
/// Events go to stderr; stdout carries command output.
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
            .with_writer(io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(io::stderr)
            .boxed(),
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
            "townsite_media_cache_hit_total",
            Unit::Count,
            "Total number of media requests answered from the resolution cache."
        );
        describe_counter!(
            "townsite_media_cache_miss_total",
            Unit::Count,
            "Total number of media ids newly queued for resolution."
        );
        describe_counter!(
            "townsite_media_batch_dispatched_total",
            Unit::Count,
            "Total number of resolve calls sent for a chunk of ids."
        );
        describe_histogram!(
            "townsite_media_batch_size",
            Unit::Count,
            "Number of ids carried by each resolve call."
        );
        describe_histogram!(
            "townsite_media_resolve_ms",
            Unit::Milliseconds,
            "Resolve call latency in milliseconds."
        );
        describe_counter!(
            "townsite_media_chunk_failed_total",
            Unit::Count,
            "Total number of resolve calls that failed as a whole."
        );
        describe_counter!(
            "townsite_media_unresolved_total",
            Unit::Count,
            "Total number of ids marked errored after their chunk settled."
        );
        describe_counter!(
            "townsite_media_callback_panic_total",
            Unit::Count,
            "Total number of ready callbacks that panicked."
        );
        describe_gauge!(
            "townsite_media_pending_ids",
            Unit::Count,
            "Current number of ids waiting for the batch window to close."
        );
    });
}

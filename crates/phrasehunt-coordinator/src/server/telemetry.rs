//! # Telemetry Features
//!
//! Console logging through `tracing_subscriber::fmt` is always installed.
//! OpenTelemetry metrics are optional.
//!
//! ## Feature matrix
//!
//! - `metrics`: Enables OpenTelemetry counters for block and agent activity.
//! - `stdout`: Exports those metrics to stdout every few seconds.
//!
//! ## Feature constraints
//!
//! - `stdout` requires `metrics`.
//!
//! ## Counters
//!
//! - `blocks_assigned`, `blocks_completed`, `blocks_requeued`
//! - `agents_connected` (up/down)
//! - `phrases_found`
//!
//! With `metrics` disabled every `increment_*` helper compiles to a no-op.
//!
//! ## Example usage
//!
//! ```bash
//! cargo run -p phrasehunt-coordinator --features metrics,stdout -- --full-search ...
//! ```

#[cfg(all(feature = "stdout", not(feature = "metrics")))]
compile_error!("The 'stdout' feature requires 'metrics' to be enabled.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::{
    InstrumentationScope, KeyValue,
    metrics::{Counter, Meter, UpDownCounter},
};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::{Resource, metrics as sdkmetrics};
#[cfg(feature = "metrics")]
use opentelemetry_semantic_conventions as semvcns;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

pub struct TelemetryProviders {
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and stops the exporters.
    pub fn shutdown(self) {
        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        )
        .try_init()?;

    #[cfg(feature = "metrics")]
    {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let scope = InstrumentationScope::builder("phrasehunt-coordinator")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(semvcns::SCHEMA_URL)
            .build();
        init_metric_handles(opentelemetry::global::meter_with_scope(scope));
    }

    Ok(TelemetryProviders {
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "metrics")]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("phrasehunt-coordinator")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> sdkmetrics::SdkMeterProvider {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        let exporter = opentelemetry_stdout::MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();
        builder.with_reader(reader)
    };

    builder.build()
}

#[cfg(feature = "metrics")]
static BLOCKS_ASSIGNED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static BLOCKS_COMPLETED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static BLOCKS_REQUEUED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static AGENTS_CONNECTED: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static PHRASES_FOUND: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = BLOCKS_ASSIGNED.set(
        meter
            .u64_counter("blocks_assigned")
            .with_description("Blocks handed to agents")
            .build(),
    );
    let _ = BLOCKS_COMPLETED.set(
        meter
            .u64_counter("blocks_completed")
            .with_description("Blocks reported fully scanned")
            .build(),
    );
    let _ = BLOCKS_REQUEUED.set(
        meter
            .u64_counter("blocks_requeued")
            .with_description("Blocks reclaimed from stale or departed agents")
            .build(),
    );
    let _ = AGENTS_CONNECTED.set(
        meter
            .i64_up_down_counter("agents_connected")
            .with_description("Registered agents")
            .build(),
    );
    let _ = PHRASES_FOUND.set(
        meter
            .u64_counter("phrases_found")
            .with_description("Phrases deriving the target address")
            .build(),
    );
}

#[cfg(feature = "metrics")]
pub fn increment_blocks_assigned() {
    if let Some(counter) = BLOCKS_ASSIGNED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_blocks_assigned() {}

#[cfg(feature = "metrics")]
pub fn increment_blocks_completed() {
    if let Some(counter) = BLOCKS_COMPLETED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_blocks_completed() {}

#[cfg(feature = "metrics")]
pub fn increment_blocks_requeued(count: u64) {
    if let Some(counter) = BLOCKS_REQUEUED.get() {
        counter.add(count, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_blocks_requeued(_count: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_agents_connected() {
    if let Some(counter) = AGENTS_CONNECTED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_agents_connected() {}

#[cfg(feature = "metrics")]
pub fn decrement_agents_connected() {
    if let Some(counter) = AGENTS_CONNECTED.get() {
        counter.add(-1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_agents_connected() {}

#[cfg(feature = "metrics")]
pub fn increment_phrases_found() {
    if let Some(counter) = PHRASES_FOUND.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_phrases_found() {}

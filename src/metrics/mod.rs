//! Prometheus metrics module
//!
//! Recording goes through the `metrics` facade, so the engine can record
//! unconditionally; without an installed recorder every call is a no-op.
//! [`SubscriberMetrics`] installs the Prometheus recorder and renders it.

use crate::engine::CycleSummary;
use crate::error::SubscriberError;
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;

/// Subscriber metrics exporter
#[derive(Clone)]
pub struct SubscriberMetrics {
    handle: Arc<PrometheusHandle>,
}

impl SubscriberMetrics {
    /// Install the Prometheus recorder (once per process)
    pub fn install() -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;

        Self::register_metrics();

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    fn register_metrics() {
        describe_counter!(
            "subscriber_records_emitted_total",
            Unit::Count,
            "Records handed to the downstream consumer"
        );
        describe_counter!(
            "subscriber_errors_total",
            Unit::Count,
            "Engine-level errors by type"
        );
        describe_counter!(
            "subscriber_catalog_resolutions_total",
            Unit::Count,
            "Successful shard catalog resolutions"
        );
        describe_counter!(
            "subscriber_cycles_total",
            Unit::Count,
            "Poll cycles by outcome"
        );
        describe_counter!(
            "subscriber_records_published_total",
            Unit::Count,
            "Records published to NATS"
        );

        describe_histogram!(
            "subscriber_cycle_duration_seconds",
            Unit::Seconds,
            "Wall time of one poll cycle"
        );
        describe_histogram!(
            "subscriber_publish_duration_seconds",
            Unit::Seconds,
            "Time to publish one record to NATS"
        );

        describe_gauge!(
            "subscriber_tracked_shards",
            Unit::Count,
            "Shards in the current tracked set"
        );
        describe_gauge!(
            "subscriber_paused",
            Unit::Count,
            "Polling paused by downstream backpressure (1=paused)"
        );
        describe_gauge!(
            "subscriber_nats_connected",
            Unit::Count,
            "NATS connection status (1=connected, 0=disconnected)"
        );
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

pub fn record_emitted(shard_id: &str, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        "subscriber_records_emitted_total",
        "shard_id" => shard_id.to_string()
    )
    .increment(count as u64);
}

pub fn record_error(error: &SubscriberError) {
    counter!(
        "subscriber_errors_total",
        "error_type" => error.error_type_label()
    )
    .increment(1);
}

pub fn record_resolution(shards: usize) {
    counter!("subscriber_catalog_resolutions_total").increment(1);
    gauge!("subscriber_tracked_shards").set(shards as f64);
}

pub fn record_cycle(summary: &CycleSummary, duration: Duration) {
    counter!(
        "subscriber_cycles_total",
        "outcome" => summary.outcome.as_label()
    )
    .increment(1);
    histogram!("subscriber_cycle_duration_seconds").record(duration.as_secs_f64());
}

pub fn set_paused(paused: bool) {
    gauge!("subscriber_paused").set(if paused { 1.0 } else { 0.0 });
}

pub fn record_publish(duration: Duration) {
    counter!("subscriber_records_published_total").increment(1);
    histogram!("subscriber_publish_duration_seconds").record(duration.as_secs_f64());
}

pub fn set_nats_connected(connected: bool) {
    gauge!("subscriber_nats_connected").set(if connected { 1.0 } else { 0.0 });
}

//! Prometheus metrics for engine operations.
//!
//! Metric families emitted by the engines:
//!
//! - `signalpath_assignments_total{variant_id}`: new variant
//!   assignments persisted
//! - `signalpath_experiment_events_total{event_type, variant_id}`:
//!   recorded experiment events
//! - `signalpath_attributions_total{model}`: attribution computations
//! - `signalpath_unattributed_conversions_total`: conversions with an
//!   empty touchpoint window
//! - `signalpath_errors_total{code, category, severity}`: engine errors

use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Register descriptions for every engine metric family.
pub fn describe_engine_metrics() {
    describe_counter!(
        "signalpath_assignments_total",
        "New variant assignments persisted, labeled by variant"
    );
    describe_counter!(
        "signalpath_experiment_events_total",
        "Experiment events appended, labeled by event type and variant"
    );
    describe_counter!(
        "signalpath_attributions_total",
        "Attribution computations performed, labeled by model"
    );
    describe_counter!(
        "signalpath_unattributed_conversions_total",
        "Conversions whose attribution window contained no touchpoints"
    );
    describe_counter!(
        "signalpath_errors_total",
        "Engine errors, labeled by code, category, and severity"
    );
}

/// Install the Prometheus exporter on the given address.
///
/// Exposes a scrape endpoint at `http://{addr}/metrics`.
pub fn install_prometheus_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_engine_metrics();
    Ok(())
}

//! Prometheus export for the `metrics` facade.
//!
//! Counters are recorded inline where things happen (`alloctl_requests_submitted_total`,
//! `alloctl_allocations_total`, `alloctl_releases_total`, `alloctl_match_races_total`). The gauges
//! in this module are refreshed from [`EngineStats`] after each scheduler sweep and on every
//! scrape of `/internal/metrics`. Without an installed recorder every call is a no-op.

use std::sync::OnceLock;

use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;

use crate::engine::EngineStats;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder on first use and return its handle.
///
/// If another recorder is already installed the returned handle renders nothing; the counters
/// then go to that recorder.
pub fn get_or_install_prometheus_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                describe_metrics();
                handle
            }
            Err(e) => {
                warn!(error = %e, "Could not install Prometheus recorder, metrics will not be exported");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

fn describe_metrics() {
    describe_counter!("alloctl_requests_submitted_total", "Requests accepted at intake");
    describe_counter!("alloctl_allocations_total", "Allocations committed");
    describe_counter!("alloctl_releases_total", "Allocations released");
    describe_counter!(
        "alloctl_match_races_total",
        "Reservation attempts lost to a concurrent matcher pass"
    );
    describe_gauge!("alloctl_queue_depth", "Requests waiting, per resource type");
    describe_gauge!("alloctl_resources", "Resources per type and status");
    describe_gauge!("alloctl_active_allocations", "Allocations currently held");
}

/// Publish queue depth and pool status gauges.
pub fn record_engine_stats(stats: &EngineStats) {
    for (resource_type, depth) in &stats.queue_depth {
        gauge!("alloctl_queue_depth", "resource_type" => resource_type.to_string()).set(*depth as f64);
    }
    for ((resource_type, status), count) in &stats.resources {
        gauge!(
            "alloctl_resources",
            "resource_type" => resource_type.to_string(),
            "status" => status.as_str()
        )
        .set(*count as f64);
    }
    gauge!("alloctl_active_allocations").set(stats.active_allocations as f64);
}

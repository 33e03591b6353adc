//! Prometheus metrics.
//!
//! Recording goes through the `metrics` facade; the Prometheus recorder is
//! installed once per process and rendered by `GET /metrics`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

use crate::cache::CacheStatus;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder (first call only) and return its handle.
pub fn init() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if let Err(e) = ::metrics::set_global_recorder(recorder) {
                warn!("Metrics recorder already installed: {}", e);
            }
            handle
        })
        .clone()
}

pub fn record_request(endpoint: &'static str, status: u16) {
    ::metrics::counter!(
        "edge_requests_total",
        "endpoint" => endpoint,
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_duration(endpoint: &'static str, start: Instant) {
    ::metrics::histogram!("edge_request_duration_seconds", "endpoint" => endpoint)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_status(endpoint: &'static str, status: CacheStatus) {
    ::metrics::counter!(
        "edge_cache_results_total",
        "endpoint" => endpoint,
        "result" => status.as_str()
    )
    .increment(1);
}

pub fn record_origin_error(endpoint: &'static str, kind: &'static str) {
    ::metrics::counter!(
        "edge_origin_errors_total",
        "endpoint" => endpoint,
        "kind" => kind
    )
    .increment(1);
}

pub fn record_coalesced(endpoint: &'static str) {
    ::metrics::counter!("edge_coalesced_requests_total", "endpoint" => endpoint).increment(1);
}

pub fn record_cache_store_error(op: &'static str) {
    ::metrics::counter!("edge_cache_store_errors_total", "op" => op).increment(1);
}

//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the mixtape server:
//! - HTTP request metrics (latency, counts, in flight)
//! - Download streams currently being delivered
//! - Progress store size (collected dynamically)
//!
//! Core metrics (batches, acquisitions, subprocesses) are registered here too.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use regex_lite::Regex;

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
///
/// For streamed downloads this covers the time until headers are sent.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "mixtape_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mixtape_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mixtape_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Download Metrics
// =============================================================================

/// Download bodies currently streaming to a client.
pub static DOWNLOAD_STREAMS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mixtape_download_streams_active",
        "Number of download responses still streaming",
    )
    .unwrap()
});

/// Progress records held in memory (collected dynamically).
pub static PROGRESS_RECORDS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mixtape_progress_records",
        "Number of progress records held in memory",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Downloads
    registry
        .register(Box::new(DOWNLOAD_STREAMS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(PROGRESS_RECORDS.clone()))
        .unwrap();

    // Core metrics (batches, acquisitions, subprocesses)
    for metric in mixtape_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Refresh gauges derived from application state before encoding.
pub fn collect_metrics(state: &AppState) {
    PROGRESS_RECORDS.set(state.service().progress_store().len() as i64);
}

static IDENTIFIER_ROUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(/api/v1/(?:download|progress))/[^/]+$").expect("valid route regex")
});

/// Normalize a path for metric labels (replace identifiers with placeholders).
pub fn normalize_path(path: &str) -> String {
    IDENTIFIER_ROUTE.replace(path, "$1/{id}").into_owned()
}

//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Batches (terminal outcomes, archive bytes delivered)
//! - Acquisitions (results and durations per identifier)
//! - Extractor subprocesses currently alive

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Batch Metrics
// =============================================================================

/// Batches by terminal state.
pub static BATCHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mixtape_batches_total", "Total batches by terminal state"),
        &["outcome"], // "completed", "failed", "aborted"
    )
    .unwrap()
});

/// Archive bytes delivered to consumers.
pub static ARCHIVE_BYTES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "mixtape_archive_bytes_total",
        "Total archive bytes streamed to consumers",
    )
    .unwrap()
});

// =============================================================================
// Acquisition Metrics
// =============================================================================

/// Acquisitions by result.
pub static ACQUISITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mixtape_acquisitions_total", "Total acquisitions by result"),
        &["result"], // "success", "extraction", "timeout", "output_missing", ...
    )
    .unwrap()
});

/// Acquisition duration in seconds.
pub static ACQUISITION_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "mixtape_acquisition_duration_seconds",
            "Duration of single-identifier acquisitions",
        )
        .buckets(vec![1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["result"],
    )
    .unwrap()
});

/// Extractor subprocesses currently registered with a batch.
pub static SUBPROCESSES_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mixtape_subprocesses_active",
        "Extractor subprocesses currently running",
    )
    .unwrap()
});

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Batches
        Box::new(BATCHES_TOTAL.clone()),
        Box::new(ARCHIVE_BYTES_TOTAL.clone()),
        // Acquisitions
        Box::new(ACQUISITIONS_TOTAL.clone()),
        Box::new(ACQUISITION_DURATION_SECONDS.clone()),
        Box::new(SUBPROCESSES_ACTIVE.clone()),
    ]
}

//! Prometheus metrics for the orchestration core.
//!
//! This module provides metrics for:
//! - Process supervision (spawns, forced kills)
//! - Worker requests (outcomes, latency, stray responses)
//! - Helper stages
//! - Batches and their items

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Registry holding every core metric.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    for metric in all_metrics() {
        registry.register(metric).unwrap();
    }
    registry
});

// =============================================================================
// Process Supervision
// =============================================================================

/// Spawn attempts by role and result.
pub static PROCESSES_SPAWNED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "notesheet_processes_spawned_total",
            "Total child process spawn attempts",
        ),
        &["role", "result"], // result: "spawned", "failed", "rejected"
    )
    .unwrap()
});

/// Forced terminations by role.
pub static FORCED_KILLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "notesheet_forced_kills_total",
            "Total forced process terminations",
        ),
        &["role"],
    )
    .unwrap()
});

/// Worker sessions by startup result.
pub static WORKER_SESSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("notesheet_worker_sessions_total", "Total worker sessions"),
        &["result"], // "ready", "launch_failed", "exited", "startup_timeout"
    )
    .unwrap()
});

// =============================================================================
// Worker Requests
// =============================================================================

/// Requests by outcome.
pub static WORKER_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("notesheet_worker_requests_total", "Total worker requests"),
        &["outcome"],
    )
    .unwrap()
});

/// Time from registration to completion, by outcome.
pub static REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "notesheet_worker_request_duration_seconds",
            "Duration of worker requests",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["outcome"],
    )
    .unwrap()
});

/// Responses whose id was not pending.
pub static UNMATCHED_RESPONSES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "notesheet_unmatched_responses_total",
        "Total worker responses dropped because no request was pending",
    )
    .unwrap()
});

/// Data messages that could not be decoded.
pub static MALFORMED_MESSAGES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "notesheet_malformed_messages_total",
        "Total malformed data messages from the worker",
    )
    .unwrap()
});

// =============================================================================
// Helpers
// =============================================================================

/// Helper runs by stage and result.
pub static HELPER_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("notesheet_helper_runs_total", "Total helper process runs"),
        &["stage", "result"], // result: "success", "failed", "timeout"
    )
    .unwrap()
});

/// Helper run duration by stage.
pub static HELPER_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "notesheet_helper_duration_seconds",
            "Duration of helper process runs",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["stage"],
    )
    .unwrap()
});

// =============================================================================
// Batches
// =============================================================================

/// Batches by final status.
pub static BATCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("notesheet_batches_total", "Total batches processed"),
        &["status"], // "success", "partial_success", "failure"
    )
    .unwrap()
});

/// Items by result.
pub static BATCH_ITEMS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("notesheet_batch_items_total", "Total batch items processed"),
        &["result"], // "success" or a failure code
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Supervision
        Box::new(PROCESSES_SPAWNED.clone()),
        Box::new(FORCED_KILLS.clone()),
        Box::new(WORKER_SESSIONS.clone()),
        // Requests
        Box::new(WORKER_REQUESTS.clone()),
        Box::new(REQUEST_DURATION.clone()),
        Box::new(UNMATCHED_RESPONSES.clone()),
        Box::new(MALFORMED_MESSAGES.clone()),
        // Helpers
        Box::new(HELPER_RUNS.clone()),
        Box::new(HELPER_DURATION.clone()),
        // Batches
        Box::new(BATCHES.clone()),
        Box::new(BATCH_ITEMS.clone()),
    ]
}

/// Encode all core metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

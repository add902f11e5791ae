//! Prometheus metrics for the archivist server.
//!
//! Covers task delivery, the archival lifecycle and chunk resolution.
//! The `/metrics` endpoint is unauthenticated and should only be reachable
//! by the scraper.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Task dispatcher

pub static TASKS_PUBLISHED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "archivist_tasks_published_total",
            "Tasks published to the dispatcher",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

/// Terminal and retry transitions, labelled by kind and outcome
/// (`succeeded`, `retried`, `exhausted`, `unhandled`).
pub static TASK_OUTCOMES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "archivist_task_outcomes_total",
            "Task delivery outcomes",
        ),
        &["kind", "outcome"],
    )
    .expect("metric creation failed")
});

pub static TASK_PANICS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "archivist_task_panics_total",
        "Task handlers that panicked",
    )
    .expect("metric creation failed")
});

pub static TASKS_IN_FLIGHT: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "archivist_tasks_in_flight",
        "Task handlers currently running",
    )
    .expect("metric creation failed")
});

pub static TASK_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "archivist_task_duration_seconds",
            "Time spent in a single handler attempt",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        &["kind"],
    )
    .expect("metric creation failed")
});

// Archival lifecycle

pub static NODES_ARCHIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "archivist_nodes_archived_total",
        "Nodes that received their archival location",
    )
    .expect("metric creation failed")
});

pub static ARCHIVAL_REPLAYS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "archivist_archival_replays_total",
        "Archival confirmations for nodes that were already archived",
    )
    .expect("metric creation failed")
});

pub static ARCHIVAL_UNKNOWN_NODES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "archivist_archival_unknown_nodes_total",
        "Archival confirmations for nodes the store does not know",
    )
    .expect("metric creation failed")
});

pub static OBJECTS_ARCHIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "archivist_objects_archived_total",
        "Objects flagged archived after cache warm-up",
    )
    .expect("metric creation failed")
});

pub static NODES_PRUNED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "archivist_nodes_pruned_total",
        "Node payloads cleared after archival",
    )
    .expect("metric creation failed")
});

pub static CACHE_WARM_BYTES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "archivist_cache_warm_bytes_total",
        "Bytes written to the object cache by warm-ups",
    )
    .expect("metric creation failed")
});

pub static CACHE_WARM_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "archivist_cache_warm_failures_total",
        "Cache warm-ups that failed or timed out",
    )
    .expect("metric creation failed")
});

pub static SWEEP_RUNS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "archivist_sweep_runs_total",
        "Archival status sweeps completed",
    )
    .expect("metric creation failed")
});

pub static SWEEP_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "archivist_sweep_duration_seconds",
            "Time taken by one archival status sweep",
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
    )
    .expect("metric creation failed")
});

// Chunk resolution

/// Chunk lookups by where the bytes came from (`local`, `blockstore`, `missing`).
pub static CHUNK_RESOLUTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "archivist_chunk_resolutions_total",
            "Chunk lookups by source",
        ),
        &["source"],
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(TASKS_PUBLISHED.clone()),
            Box::new(TASK_OUTCOMES.clone()),
            Box::new(TASK_PANICS.clone()),
            Box::new(TASKS_IN_FLIGHT.clone()),
            Box::new(TASK_DURATION.clone()),
            Box::new(NODES_ARCHIVED.clone()),
            Box::new(ARCHIVAL_REPLAYS.clone()),
            Box::new(ARCHIVAL_UNKNOWN_NODES.clone()),
            Box::new(OBJECTS_ARCHIVED.clone()),
            Box::new(NODES_PRUNED.clone()),
            Box::new(CACHE_WARM_BYTES.clone()),
            Box::new(CACHE_WARM_FAILURES.clone()),
            Box::new(SWEEP_RUNS.clone()),
            Box::new(SWEEP_DURATION.clone()),
            Box::new(CHUNK_RESOLUTIONS.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Count a task outcome.
pub fn record_task_outcome(kind: &str, outcome: &str) {
    TASK_OUTCOMES.with_label_values(&[kind, outcome]).inc();
}

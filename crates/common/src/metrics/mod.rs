//! Metrics and observability utilities
//!
//! Prometheus-style metrics for engine connections, resolution stages
//! and executions, with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all GeoResolve metrics
pub const METRICS_PREFIX: &str = "georesolve";

/// Buckets for engine-side resolution latency (in seconds).
/// Context and observable resolution routinely take minutes.
pub const RESOLUTION_BUCKETS: &[f64] = &[
    0.5,    // 500ms
    1.0,    // 1s
    2.5,    // 2.5s
    5.0,    // 5s
    10.0,   // 10s
    30.0,   // 30s
    60.0,   // 1m
    120.0,  // 2m
    300.0,  // 5m
    900.0,  // 15m
    1800.0, // 30m
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_connection_attempts_total", METRICS_PREFIX),
        Unit::Count,
        "Engine connection attempts by candidate and outcome"
    );

    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Duration of each pipeline stage in seconds"
    );

    describe_counter!(
        format!("{}_executions_total", METRICS_PREFIX),
        Unit::Count,
        "Executions by outcome and failing stage"
    );

    describe_histogram!(
        format!("{}_execution_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end execution latency in seconds"
    );

    describe_counter!(
        format!("{}_exported_bytes_total", METRICS_PREFIX),
        Unit::Bytes,
        "Bytes written by the exporter"
    );

    tracing::info!("Metrics registered");
}

/// Record one connection attempt
pub fn record_connection_attempt(candidate: &str, outcome: &str) {
    counter!(
        format!("{}_connection_attempts_total", METRICS_PREFIX),
        "candidate" => candidate.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Times a single pipeline stage
pub struct StageTimer {
    start: Instant,
    stage: &'static str,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        Self {
            start: Instant::now(),
            stage,
        }
    }

    /// Record stage completion
    pub fn finish(self, success: bool) {
        let status = if success { "success" } else { "error" };
        histogram!(
            format!("{}_stage_duration_seconds", METRICS_PREFIX),
            "stage" => self.stage,
            "status" => status
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}

/// Record the end of an execution. `failed_stage` is `None` on success.
pub fn record_execution(duration_secs: f64, failed_stage: Option<&str>) {
    let outcome = if failed_stage.is_some() { "failed" } else { "succeeded" };

    counter!(
        format!("{}_executions_total", METRICS_PREFIX),
        "outcome" => outcome,
        "stage" => failed_stage.unwrap_or("none").to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_execution_duration_seconds", METRICS_PREFIX),
        "outcome" => outcome
    )
    .record(duration_secs);
}

/// Record bytes written by an export
pub fn record_export(bytes: u64, format: &str) {
    counter!(
        format!("{}_exported_bytes_total", METRICS_PREFIX),
        "format" => format.to_string()
    )
    .increment(bytes);
}

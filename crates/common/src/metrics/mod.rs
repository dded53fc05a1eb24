//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with standardized naming conventions for the
//! sync engine and the query orchestrator.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Caselake metrics
pub const METRICS_PREFIX: &str = "caselake";

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Sync metrics
    describe_counter!(
        format!("{}_sync_entities_total", METRICS_PREFIX),
        Unit::Count,
        "Entities processed by the collector, by entity type and outcome"
    );

    describe_histogram!(
        format!("{}_sync_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Collector run latency in seconds"
    );

    // Metadata extraction metrics
    describe_counter!(
        format!("{}_metadata_rows_total", METRICS_PREFIX),
        Unit::Count,
        "Metadata rows upserted, by outcome"
    );

    // Tool dispatch metrics
    describe_counter!(
        format!("{}_tool_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Tool executions, by tool and terminal status"
    );

    describe_histogram!(
        format!("{}_dispatch_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Whole-dispatch latency in seconds"
    );

    // Composition metrics
    describe_counter!(
        format!("{}_compositions_total", METRICS_PREFIX),
        Unit::Count,
        "Answer compositions, by outcome"
    );

    describe_counter!(
        format!("{}_context_truncations_total", METRICS_PREFIX),
        Unit::Count,
        "Context sections truncated under token budget pressure"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record one collector run
pub fn record_sync(duration_secs: f64, mode: &str, written: u64, failed: u64, stale: u64) {
    counter!(
        format!("{}_sync_entities_total", METRICS_PREFIX),
        "mode" => mode.to_string(),
        "outcome" => "written"
    )
    .increment(written);

    counter!(
        format!("{}_sync_entities_total", METRICS_PREFIX),
        "mode" => mode.to_string(),
        "outcome" => "failed"
    )
    .increment(failed);

    counter!(
        format!("{}_sync_entities_total", METRICS_PREFIX),
        "mode" => mode.to_string(),
        "outcome" => "stale"
    )
    .increment(stale);

    histogram!(
        format!("{}_sync_duration_seconds", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .record(duration_secs);
}

/// Record one metadata extraction
pub fn record_extraction(success: bool) {
    let outcome = if success { "upserted" } else { "failed" };
    counter!(
        format!("{}_metadata_rows_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record one tool execution
pub fn record_tool_run(tool: &str, status: &str) {
    counter!(
        format!("{}_tool_runs_total", METRICS_PREFIX),
        "tool" => tool.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record one whole dispatch
pub fn record_dispatch(duration_secs: f64, degraded: bool) {
    histogram!(
        format!("{}_dispatch_duration_seconds", METRICS_PREFIX),
        "degraded" => degraded.to_string()
    )
    .record(duration_secs);
}

/// Record one answer composition
pub fn record_composition(outcome: &str, truncated_sections: u64) {
    counter!(
        format!("{}_compositions_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    if truncated_sections > 0 {
        counter!(format!("{}_context_truncations_total", METRICS_PREFIX))
            .increment(truncated_sections);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_metrics() {
        let metrics = RequestMetrics::start("POST", "/v1/chat");
        std::thread::sleep(std::time::Duration::from_millis(5));
        metrics.finish(200);
        // Just verify it runs without panic
    }

    #[test]
    fn test_record_helpers() {
        record_sync(1.2, "backfill", 10, 1, 2);
        record_extraction(true);
        record_tool_run("case_aggregation", "succeeded");
        record_dispatch(0.8, false);
        record_composition("succeeded", 1);
    }
}

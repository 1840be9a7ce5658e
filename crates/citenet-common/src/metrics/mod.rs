//! Metrics and observability utilities
//!
//! Provides counters and histograms with standardized naming
//! for the expansion engine's capability traffic and graph growth.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all CiteNet metrics
pub const METRICS_PREFIX: &str = "citenet";

/// Buckets for capability-call latency (remote services, typically slow)
pub const CAPABILITY_BUCKETS: &[f64] = &[
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.000, // 2s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_papers_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Papers inserted into the graph store"
    );

    describe_counter!(
        format!("{}_papers_merged_total", METRICS_PREFIX),
        Unit::Count,
        "Duplicate papers merged on ingestion"
    );

    describe_counter!(
        format!("{}_edges_inserted_total", METRICS_PREFIX),
        Unit::Count,
        "Citation edges inserted into the graph store"
    );

    describe_counter!(
        format!("{}_capability_calls_total", METRICS_PREFIX),
        Unit::Count,
        "Outbound capability calls, labeled by capability and operation"
    );

    describe_counter!(
        format!("{}_capability_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Capability calls retried after a transient failure"
    );

    describe_counter!(
        format!("{}_score_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Relevance scores served from the content-keyed cache"
    );

    describe_counter!(
        format!("{}_rounds_completed_total", METRICS_PREFIX),
        Unit::Count,
        "Expansion rounds sealed"
    );

    describe_histogram!(
        format!("{}_capability_call_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Capability call latency in seconds"
    );
}

/// Timer for capability-call latency
pub struct CallTimer {
    capability: &'static str,
    operation: &'static str,
    start: Instant,
}

impl CallTimer {
    /// Start timing one capability call
    pub fn start(capability: &'static str, operation: &'static str) -> Self {
        counter!(
            format!("{}_capability_calls_total", METRICS_PREFIX),
            "capability" => capability,
            "operation" => operation
        )
        .increment(1);

        Self {
            capability,
            operation,
            start: Instant::now(),
        }
    }

    /// Record the elapsed time
    pub fn finish(self) {
        histogram!(
            format!("{}_capability_call_duration_seconds", METRICS_PREFIX),
            "capability" => self.capability,
            "operation" => self.operation
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_call_timer() {
        let timer = CallTimer::start("retrieval", "search");
        timer.finish();
    }
}

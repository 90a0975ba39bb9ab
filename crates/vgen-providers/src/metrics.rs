//! Provider call metrics.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total provider calls by provider, operation and outcome.
    pub const REQUESTS_TOTAL: &str = "vgen_provider_requests_total";

    /// Provider call latency in seconds.
    pub const LATENCY_SECONDS: &str = "vgen_provider_latency_seconds";
}

/// Record a completed provider call.
pub fn record_call(provider: &str, operation: &str, outcome: &str, latency_secs: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "provider" => provider.to_string(),
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "provider" => provider.to_string(),
        "operation" => operation.to_string()
    )
    .record(latency_secs);
}

//! Store metrics collection.
//!
//! Request counters by operation, table and status, latency histograms and
//! retry counters.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total store requests by operation, table and status.
    pub const REQUESTS_TOTAL: &str = "vgen_store_requests_total";

    /// Total retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "vgen_store_retries_total";

    /// Request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "vgen_store_latency_seconds";

    /// Writes found server-side after a statement timeout.
    pub const TIMEOUT_RECOVERIES_TOTAL: &str = "vgen_store_timeout_recoveries_total";
}

/// Record metrics for a completed store request.
pub fn record_request(operation: &str, table: &str, status: u16, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "table" => table.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

/// Record a retry attempt.
pub fn record_retry(operation: &str) {
    counter!(
        names::RETRIES_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record the outcome of a statement-timeout re-query.
pub fn record_timeout_recovery(table: &str, found: bool) {
    counter!(
        names::TIMEOUT_RECOVERIES_TOTAL,
        "table" => table.to_string(),
        "found" => found.to_string()
    )
    .increment(1);
}

//! Task lifecycle metrics.

use metrics::counter;

/// Metric name constants for consistency.
pub mod names {
    /// Tasks submitted by provider and outcome.
    pub const SUBMISSIONS_TOTAL: &str = "vgen_task_submissions_total";

    /// Status transitions written by the reconciler, by source and target.
    pub const TRANSITIONS_TOTAL: &str = "vgen_task_transitions_total";

    /// Reconcile passes run.
    pub const RECONCILE_PASSES_TOTAL: &str = "vgen_reconcile_passes_total";

    /// Migrations by outcome.
    pub const MIGRATIONS_TOTAL: &str = "vgen_migrations_total";
}

pub fn record_submission(provider: &str, outcome: &str) {
    counter!(
        names::SUBMISSIONS_TOTAL,
        "provider" => provider.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// `source` is `poll`, `fallback` or `callback`.
pub fn record_transition(provider: &str, source: &str, to: &str) {
    counter!(
        names::TRANSITIONS_TOTAL,
        "provider" => provider.to_string(),
        "source" => source.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

pub fn record_reconcile_pass() {
    counter!(names::RECONCILE_PASSES_TOTAL).increment(1);
}

pub fn record_migration(outcome: &str) {
    counter!(names::MIGRATIONS_TOTAL, "outcome" => outcome.to_string()).increment(1);
}

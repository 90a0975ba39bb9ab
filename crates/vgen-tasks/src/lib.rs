//! Task lifecycle services.
//!
//! - `TaskSubmitter`: validate, gate on credits, persist, dispatch, bill
//! - `StatusReconciler`: poll providers, translate statuses, apply the
//!   staleness fallback, accept pushed updates
//! - `ResultMigrator`: copy finished media into owned storage exactly once

pub mod error;
pub mod metrics;
pub mod migrator;
pub mod reconciler;
pub mod submitter;

#[cfg(test)]
mod testing;

pub use error::{TaskError, TaskResult};
pub use migrator::{MigrationOutcome, MigrationResult, ResultMigrator};
pub use reconciler::{plan_update, ReconcileReport, ReconcilerConfig, StatusReconciler, UpdateOutcome};
pub use submitter::{ProviderRouting, SubmitOutcome, TaskSubmitter, INPUT_IMAGE_PLACEHOLDER};

//! Task service errors.

use thiserror::Error;
use vgen_models::{TaskId, TaskValidationError};
use vgen_providers::ProviderError;
use vgen_storage::StorageError;
use vgen_store::StoreError;

pub type TaskResult<T> = Result<T, TaskError>;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Validation(#[from] TaskValidationError),

    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: i32, available: i64 },

    #[error("No provider configured for {0}")]
    NoProvider(String),

    /// The definition row was written before dispatch failed and stays
    /// without a status row.
    #[error("Provider dispatch failed for task {task_id}: {source}")]
    ProviderDispatch {
        task_id: TaskId,
        #[source]
        source: ProviderError,
    },

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task {task_id} is not eligible for migration: {reason}")]
    NotEligible { task_id: TaskId, reason: String },

    #[error("Migration of task {0} is already claimed")]
    AlreadyClaimed(TaskId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl TaskError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Errors the caller caused, as opposed to infrastructure failures.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TaskError::Validation(_)
                | TaskError::InsufficientCredits { .. }
                | TaskError::NotFound(_)
                | TaskError::NotEligible { .. }
                | TaskError::AlreadyClaimed(_)
        )
    }
}

//! The persistence seam used by the task services.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vgen_models::{
    NewTaskDefinition, NewTaskStatus, ProviderKind, StatusPatch, TaskDefinition, TaskId,
    TaskStatus,
};

use crate::error::StoreResult;

/// A dispatched task: its definition plus its status row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedTask {
    pub definition: TaskDefinition,
    pub status: TaskStatus,
}

/// A task definition with its status row, if dispatch produced one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskWithStatus {
    pub definition: TaskDefinition,
    pub status: Option<TaskStatus>,
}

/// Typed access to task definitions, status rows, favorites and credits.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a definition. A statement timeout is resolved by looking the
    /// row up again before failing.
    async fn insert_definition(&self, new: NewTaskDefinition) -> StoreResult<TaskDefinition>;

    async fn get_definition(&self, task_id: TaskId) -> StoreResult<Option<TaskDefinition>>;

    /// A user's tasks with their status rows, newest first.
    async fn list_definitions_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<TaskWithStatus>>;

    /// Overwrite the prompt with a display title. Returns false when no row
    /// matched.
    async fn rename_definition(&self, task_id: TaskId, title: &str) -> StoreResult<bool>;

    /// Delete status rows, then favorites, then the definition.
    async fn delete_definition_cascade(&self, task_id: TaskId) -> StoreResult<()>;

    /// Insert a status row. A statement timeout is resolved by looking the
    /// row up by `task_id` before failing.
    async fn insert_status(&self, new: NewTaskStatus) -> StoreResult<TaskStatus>;

    async fn get_status_for_task(&self, task_id: TaskId) -> StoreResult<Option<TaskStatus>>;

    /// Find the task a provider id belongs to.
    async fn find_by_external_id(
        &self,
        provider: ProviderKind,
        external_task_id: &str,
    ) -> StoreResult<Option<TrackedTask>>;

    /// Apply a generation-status patch unless the row is already terminal.
    /// Returns the updated row, or `None` when the guard rejected the write.
    async fn update_status(&self, status_id: i64, patch: &StatusPatch)
        -> StoreResult<Option<TaskStatus>>;

    /// Non-terminal dispatched tasks for the given providers, least recently
    /// updated first.
    async fn list_reconcilable(
        &self,
        limit: usize,
        providers: &[ProviderKind],
    ) -> StoreResult<Vec<TrackedTask>>;

    /// Mark a completed row as uploading if its migration state allows it.
    /// Returns whether this caller won the claim.
    async fn claim_migration(&self, status_id: i64) -> StoreResult<bool>;

    /// Write the result of a claimed migration.
    async fn finish_migration(&self, status_id: i64, patch: &StatusPatch) -> StoreResult<()>;

    /// Completed tasks whose results still live at the provider.
    async fn list_migratable(&self, limit: usize) -> StoreResult<Vec<TrackedTask>>;

    /// Current credit balance. A user without a profile row has zero.
    async fn get_credit_balance(&self, user_id: &str) -> StoreResult<i64>;

    /// Charge the credits recorded for a task. Atomic server-side.
    async fn deduct_credits(&self, task_id: TaskId, amount: i32) -> StoreResult<()>;

    async fn add_favorite(&self, user_id: &str, task_id: TaskId) -> StoreResult<()>;

    async fn remove_favorite(&self, user_id: &str, task_id: TaskId) -> StoreResult<()>;

    /// Whether the backing store is reachable.
    async fn health_check(&self) -> bool {
        true
    }
}

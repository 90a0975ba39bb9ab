//! In-process `TaskStore`.
//!
//! Mirrors the Supabase semantics that callers rely on: guarded status
//! writes, conditional migration claims, `updated_at` bumps on every write
//! and oldest-first reconcile batches. Also counts writes and deductions so
//! tests can assert on side effects.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use vgen_models::{
    GenerationStatus, MigrationStatus, NewTaskDefinition, NewTaskStatus, ProviderKind,
    StatusPatch, TaskDefinition, TaskId, TaskStatus,
};

use crate::error::{StoreError, StoreResult};
use crate::store::{TaskStore, TaskWithStatus, TrackedTask};

#[derive(Default)]
struct Inner {
    next_task_id: TaskId,
    next_status_id: i64,
    definitions: BTreeMap<TaskId, TaskDefinition>,
    statuses: BTreeMap<i64, TaskStatus>,
    favorites: HashSet<(String, TaskId)>,
    credits: HashMap<String, i64>,
    deductions: Vec<(TaskId, i32)>,
    status_writes: usize,
    fail_deductions: bool,
}

impl Inner {
    fn tracked(&self, status: &TaskStatus) -> Option<TrackedTask> {
        self.definitions.get(&status.task_id).map(|d| TrackedTask {
            definition: d.clone(),
            status: status.clone(),
        })
    }

    fn status_for_task(&self, task_id: TaskId) -> Option<&TaskStatus> {
        self.statuses
            .values()
            .filter(|s| s.task_id == task_id)
            .max_by_key(|s| s.id)
    }
}

/// Task store held in memory.
#[derive(Default)]
pub struct MemoryTaskStore {
    inner: Mutex<Inner>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a user's credit balance (creates the profile).
    pub async fn set_credits(&self, user_id: &str, credits: i64) {
        self.inner
            .lock()
            .await
            .credits
            .insert(user_id.to_string(), credits);
    }

    /// Make every `deduct_credits` call fail.
    pub async fn fail_deductions(&self, fail: bool) {
        self.inner.lock().await.fail_deductions = fail;
    }

    /// Overwrite `updated_at` without counting a write.
    pub async fn set_updated_at(&self, status_id: i64, at: DateTime<Utc>) {
        if let Some(status) = self.inner.lock().await.statuses.get_mut(&status_id) {
            status.updated_at = at;
        }
    }

    /// Overwrite a status row wholesale without counting a write.
    pub async fn put_status(&self, status: TaskStatus) {
        let mut inner = self.inner.lock().await;
        inner.next_status_id = inner.next_status_id.max(status.id);
        inner.statuses.insert(status.id, status);
    }

    pub async fn definitions(&self) -> Vec<TaskDefinition> {
        self.inner.lock().await.definitions.values().cloned().collect()
    }

    pub async fn statuses(&self) -> Vec<TaskStatus> {
        self.inner.lock().await.statuses.values().cloned().collect()
    }

    pub async fn deductions(&self) -> Vec<(TaskId, i32)> {
        self.inner.lock().await.deductions.clone()
    }

    pub async fn is_favorite(&self, user_id: &str, task_id: TaskId) -> bool {
        self.inner
            .lock()
            .await
            .favorites
            .contains(&(user_id.to_string(), task_id))
    }

    /// Number of status-row updates applied so far.
    pub async fn status_writes(&self) -> usize {
        self.inner.lock().await.status_writes
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert_definition(&self, new: NewTaskDefinition) -> StoreResult<TaskDefinition> {
        let mut inner = self.inner.lock().await;
        inner.next_task_id += 1;
        let definition = new.into_definition(inner.next_task_id, Utc::now());
        inner.definitions.insert(definition.id, definition.clone());
        Ok(definition)
    }

    async fn get_definition(&self, task_id: TaskId) -> StoreResult<Option<TaskDefinition>> {
        Ok(self.inner.lock().await.definitions.get(&task_id).cloned())
    }

    async fn list_definitions_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<TaskWithStatus>> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<TaskWithStatus> = inner
            .definitions
            .values()
            .filter(|d| d.is_owned_by(user_id))
            .map(|d| TaskWithStatus {
                definition: d.clone(),
                status: inner.status_for_task(d.id).cloned(),
            })
            .collect();

        tasks.sort_by(|a, b| {
            b.definition
                .created_at
                .cmp(&a.definition.created_at)
                .then(b.definition.id.cmp(&a.definition.id))
        });
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn rename_definition(&self, task_id: TaskId, title: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.definitions.get_mut(&task_id) {
            Some(definition) => {
                definition.prompt = Some(title.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_definition_cascade(&self, task_id: TaskId) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.statuses.retain(|_, s| s.task_id != task_id);
        inner.favorites.retain(|(_, t)| *t != task_id);
        inner.definitions.remove(&task_id);
        Ok(())
    }

    async fn insert_status(&self, new: NewTaskStatus) -> StoreResult<TaskStatus> {
        let mut inner = self.inner.lock().await;
        if !inner.definitions.contains_key(&new.task_id) {
            return Err(StoreError::Conflict(format!(
                "task {} does not exist",
                new.task_id
            )));
        }

        inner.next_status_id += 1;
        let now = Utc::now();
        let status = TaskStatus {
            id: inner.next_status_id,
            task_id: new.task_id,
            external_task_id: new.external_task_id,
            status: new.status,
            result_url: None,
            thumbnail_url: None,
            error_message: None,
            r2_status: None,
            created_at: now,
            updated_at: now,
        };
        inner.statuses.insert(status.id, status.clone());
        Ok(status)
    }

    async fn get_status_for_task(&self, task_id: TaskId) -> StoreResult<Option<TaskStatus>> {
        Ok(self.inner.lock().await.status_for_task(task_id).cloned())
    }

    async fn find_by_external_id(
        &self,
        provider: ProviderKind,
        external_task_id: &str,
    ) -> StoreResult<Option<TrackedTask>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .statuses
            .values()
            .filter(|s| s.external_task_id.as_deref() == Some(external_task_id))
            .filter_map(|s| inner.tracked(s))
            .find(|t| t.definition.provider == provider))
    }

    async fn update_status(
        &self,
        status_id: i64,
        patch: &StatusPatch,
    ) -> StoreResult<Option<TaskStatus>> {
        let mut inner = self.inner.lock().await;
        let updated = match inner.statuses.get_mut(&status_id) {
            Some(status) if !status.is_terminal() => {
                status.apply(patch, Utc::now());
                Some(status.clone())
            }
            _ => None,
        };
        if updated.is_some() {
            inner.status_writes += 1;
        }
        Ok(updated)
    }

    async fn list_reconcilable(
        &self,
        limit: usize,
        providers: &[ProviderKind],
    ) -> StoreResult<Vec<TrackedTask>> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<TrackedTask> = inner
            .statuses
            .values()
            .filter(|s| !s.is_terminal() && s.external_task_id.is_some())
            .filter_map(|s| inner.tracked(s))
            .filter(|t| providers.contains(&t.definition.provider))
            .collect();

        tasks.sort_by_key(|t| t.status.updated_at);
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn claim_migration(&self, status_id: i64) -> StoreResult<bool> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let claimed = match inner.statuses.get_mut(&status_id) {
            Some(status)
                if status.status == GenerationStatus::Completed
                    && status.migration_claimable_at(now) =>
            {
                status.apply(&StatusPatch::migration(MigrationStatus::Uploading), now);
                true
            }
            _ => false,
        };
        if claimed {
            inner.status_writes += 1;
        }
        Ok(claimed)
    }

    async fn finish_migration(&self, status_id: i64, patch: &StatusPatch) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.statuses.get_mut(&status_id) {
            Some(status) if status.r2_status == Some(MigrationStatus::Uploading) => {
                status.apply(patch, Utc::now());
            }
            _ => {
                return Err(StoreError::not_found(format!(
                    "status {} is not being migrated",
                    status_id
                )))
            }
        }
        inner.status_writes += 1;
        Ok(())
    }

    async fn list_migratable(&self, limit: usize) -> StoreResult<Vec<TrackedTask>> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<TrackedTask> = inner
            .statuses
            .values()
            .filter(|s| s.is_migratable())
            .filter_map(|s| inner.tracked(s))
            .collect();

        tasks.sort_by_key(|t| t.status.updated_at);
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn get_credit_balance(&self, user_id: &str) -> StoreResult<i64> {
        Ok(self
            .inner
            .lock()
            .await
            .credits
            .get(user_id)
            .copied()
            .unwrap_or(0))
    }

    async fn deduct_credits(&self, task_id: TaskId, amount: i32) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.fail_deductions {
            return Err(StoreError::Unavailable {
                status: 503,
                message: "deduct_credits unavailable".to_string(),
            });
        }

        let user_id = inner
            .definitions
            .get(&task_id)
            .map(|d| d.user_id.clone())
            .ok_or_else(|| StoreError::not_found(format!("task {}", task_id)))?;

        *inner.credits.entry(user_id).or_insert(0) -= i64::from(amount);
        inner.deductions.push((task_id, amount));
        Ok(())
    }

    async fn add_favorite(&self, user_id: &str, task_id: TaskId) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .favorites
            .insert((user_id.to_string(), task_id));
        Ok(())
    }

    async fn remove_favorite(&self, user_id: &str, task_id: TaskId) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .favorites
            .remove(&(user_id.to_string(), task_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vgen_models::{AdditionalParams, AspectRatio, TaskType};

    fn new_definition(provider: ProviderKind) -> NewTaskDefinition {
        NewTaskDefinition {
            user_id: "user-1".into(),
            task_type: TaskType::TextToVideo,
            model: "kling-v1".into(),
            high_quality: false,
            prompt: Some("a cat".into()),
            negative_prompt: None,
            aspect_ratio: AspectRatio::Square,
            cfg: 0.5,
            credits: 1,
            start_img_path: None,
            end_img_path: None,
            provider,
            additional_params: AdditionalParams::default(),
        }
    }

    async fn dispatched(store: &MemoryTaskStore, provider: ProviderKind) -> TaskStatus {
        let definition = store.insert_definition(new_definition(provider)).await.unwrap();
        store
            .insert_status(NewTaskStatus {
                task_id: definition.id,
                external_task_id: Some(format!("ext-{}", definition.id)),
                status: GenerationStatus::Pending,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_terminal_rows_reject_writes() {
        let store = MemoryTaskStore::new();
        let status = dispatched(&store, ProviderKind::Official).await;

        let done = store
            .update_status(status.id, &StatusPatch::status(GenerationStatus::Failed))
            .await
            .unwrap();
        assert!(done.is_some());

        let again = store
            .update_status(status.id, &StatusPatch::status(GenerationStatus::Processing))
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(store.status_writes().await, 1);
    }

    #[tokio::test]
    async fn test_reconcilable_oldest_first_and_filtered() {
        let store = MemoryTaskStore::new();
        let first = dispatched(&store, ProviderKind::Official).await;
        let second = dispatched(&store, ProviderKind::Aggregator).await;
        let unknown = dispatched(&store, ProviderKind::Unknown).await;

        store
            .set_updated_at(second.id, Utc::now() - Duration::hours(2))
            .await;
        store
            .set_updated_at(unknown.id, Utc::now() - Duration::hours(3))
            .await;

        let batch = store
            .list_reconcilable(10, ProviderKind::SUPPORTED)
            .await
            .unwrap();
        let ids: Vec<i64> = batch.iter().map(|t| t.status.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_claim_only_once() {
        let store = MemoryTaskStore::new();
        let status = dispatched(&store, ProviderKind::Official).await;
        let mut patch = StatusPatch::status(GenerationStatus::Completed);
        patch.result_url = Some("https://cdn/v.mp4".into());
        store.update_status(status.id, &patch).await.unwrap();

        assert!(store.claim_migration(status.id).await.unwrap());
        assert!(!store.claim_migration(status.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cascade_delete_removes_everything() {
        let store = MemoryTaskStore::new();
        let status = dispatched(&store, ProviderKind::Official).await;
        store.add_favorite("user-1", status.task_id).await.unwrap();

        store.delete_definition_cascade(status.task_id).await.unwrap();

        assert!(store.definitions().await.is_empty());
        assert!(store.statuses().await.is_empty());
        assert!(!store.is_favorite("user-1", status.task_id).await);
    }
}

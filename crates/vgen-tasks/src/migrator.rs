//! Copy finished provider media into owned object storage.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use vgen_models::{GenerationStatus, MigrationStatus, StatusPatch, TaskId};
use vgen_storage::{media_key, MediaRole, ObjectStore};
use vgen_store::{TaskStore, TrackedTask};

use crate::error::{TaskError, TaskResult};
use crate::metrics::record_migration;

/// Default number of rows migrated per batch.
pub const DEFAULT_MIGRATION_BATCH_SIZE: usize = 10;

/// URLs written after a successful migration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationOutcome {
    pub task_id: TaskId,
    pub video_url: String,
    /// `None` when the task had no thumbnail or copying it failed.
    pub thumbnail_url: Option<String>,
}

/// Per-task entry in a batch report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationResult {
    pub task_id: TaskId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrationResult {
    fn from_result(task_id: TaskId, result: TaskResult<MigrationOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                task_id,
                success: true,
                video_url: Some(outcome.video_url),
                thumbnail_url: outcome.thumbnail_url,
                error: None,
            },
            Err(e) => Self {
                task_id,
                success: false,
                video_url: None,
                thumbnail_url: None,
                error: Some(e.to_string()),
            },
        }
    }
}

pub struct ResultMigrator {
    store: Arc<dyn TaskStore>,
    objects: Arc<dyn ObjectStore>,
    batch_size: usize,
}

impl ResultMigrator {
    pub fn new(store: Arc<dyn TaskStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            objects,
            batch_size: DEFAULT_MIGRATION_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Migrate one task by id.
    pub async fn migrate(&self, task_id: TaskId) -> TaskResult<MigrationOutcome> {
        let definition = self
            .store
            .get_definition(task_id)
            .await?
            .ok_or_else(|| TaskError::not_found(format!("task {}", task_id)))?;
        let status = self
            .store
            .get_status_for_task(task_id)
            .await?
            .ok_or_else(|| TaskError::not_found(format!("status for task {}", task_id)))?;

        self.migrate_tracked(&TrackedTask { definition, status })
            .await
    }

    /// Migrate a task whose rows the caller already holds.
    ///
    /// The row is claimed before any copy starts. A failed video copy marks
    /// the row `failed` and leaves `result_url` pointing at the provider.
    /// When the final write itself fails the row is marked `failed` too, so
    /// the next batch copies it again instead of leaving it `uploading`.
    pub async fn migrate_tracked(&self, task: &TrackedTask) -> TaskResult<MigrationOutcome> {
        let task_id = task.definition.id;
        let status = &task.status;

        let source = match (&status.status, &status.result_url) {
            (GenerationStatus::Completed, Some(url)) => url.clone(),
            (GenerationStatus::Completed, None) => {
                return Err(not_eligible(task_id, "no result url"));
            }
            (other, _) => {
                return Err(not_eligible(task_id, format!("status is {}", other)));
            }
        };
        if !status.migration_claimable_at(Utc::now()) {
            let r2 = status
                .r2_status
                .map(|s| s.to_string())
                .unwrap_or_default();
            return Err(not_eligible(task_id, format!("r2_status is {}", r2)));
        }

        if !self.store.claim_migration(status.id).await? {
            record_migration("already_claimed");
            return Err(TaskError::AlreadyClaimed(task_id));
        }

        let user_id = task.definition.user_id.as_str();
        let video_url = match self
            .copy(&source, user_id, task_id, MediaRole::Video)
            .await
        {
            Ok(url) => url,
            Err(e) => {
                error!(task_id, "Video migration failed: {}", e);
                let patch = StatusPatch::migration(MigrationStatus::Failed);
                if let Err(store_err) = self.store.finish_migration(status.id, &patch).await {
                    error!(task_id, "Could not record migration failure: {}", store_err);
                }
                record_migration("failure");
                return Err(e.into());
            }
        };

        let thumbnail_url = match &status.thumbnail_url {
            Some(thumb) => match self
                .copy(thumb, user_id, task_id, MediaRole::Thumbnail)
                .await
            {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(task_id, "Thumbnail migration failed, keeping provider url: {}", e);
                    None
                }
            },
            None => None,
        };

        let patch = StatusPatch {
            result_url: Some(video_url.clone()),
            thumbnail_url: thumbnail_url.clone(),
            r2_status: Some(MigrationStatus::Completed),
            ..Default::default()
        };
        if let Err(e) = self.store.finish_migration(status.id, &patch).await {
            error!(task_id, "Could not record migrated urls: {}", e);
            let failed = StatusPatch::migration(MigrationStatus::Failed);
            if let Err(store_err) = self.store.finish_migration(status.id, &failed).await {
                error!(task_id, "Could not record migration failure: {}", store_err);
            }
            record_migration("failure");
            return Err(e.into());
        }

        record_migration("success");
        info!(task_id, video_url = %video_url, "Migrated task media");

        Ok(MigrationOutcome {
            task_id,
            video_url,
            thumbnail_url,
        })
    }

    async fn copy(
        &self,
        source: &str,
        user_id: &str,
        task_id: TaskId,
        role: MediaRole,
    ) -> vgen_storage::StorageResult<String> {
        let key = media_key(user_id, task_id, role);
        self.objects
            .put_from_url(source, &key, role.content_type())
            .await
    }

    /// Migrate up to one batch of eligible tasks, one at a time.
    pub async fn migrate_all_pending(&self) -> TaskResult<Vec<MigrationResult>> {
        let tasks = self.store.list_migratable(self.batch_size).await?;
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        info!(count = tasks.len(), "Migrating completed tasks");

        let mut results = Vec::with_capacity(tasks.len());
        for task in &tasks {
            let task_id = task.definition.id;
            let result = self.migrate_tracked(task).await;
            results.push(MigrationResult::from_result(task_id, result));
        }

        let failed = results.iter().filter(|r| !r.success).count();
        if failed > 0 {
            warn!(failed, total = results.len(), "Migration batch finished with failures");
        }

        Ok(results)
    }
}

fn not_eligible(task_id: TaskId, reason: impl Into<String>) -> TaskError {
    TaskError::NotEligible {
        task_id,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FlakyFinishStore, MockObjects};
    use chrono::Duration;
    use vgen_models::{
        AdditionalParams, AspectRatio, NewTaskDefinition, NewTaskStatus, ProviderKind, TaskType,
    };
    use vgen_storage::StorageError;
    use vgen_store::MemoryTaskStore;

    const PROVIDER_URL: &str = "https://cdn.provider.test/out.mp4";

    async fn completed_task(store: &MemoryTaskStore, thumbnail: bool) -> TaskId {
        let definition = store
            .insert_definition(NewTaskDefinition {
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
                provider: ProviderKind::Official,
                additional_params: AdditionalParams::default(),
            })
            .await
            .unwrap();

        let status = store
            .insert_status(NewTaskStatus {
                task_id: definition.id,
                external_task_id: Some("ext-1".into()),
                status: GenerationStatus::Pending,
            })
            .await
            .unwrap();

        let mut patch = StatusPatch::status(GenerationStatus::Completed);
        patch.result_url = Some(PROVIDER_URL.into());
        if thumbnail {
            patch.thumbnail_url = Some("https://cdn.provider.test/cover.jpg".into());
        }
        store.update_status(status.id, &patch).await.unwrap();
        definition.id
    }

    fn public(key: &str) -> String {
        format!("https://media.test/{}", key)
    }

    #[tokio::test]
    async fn test_migrate_overwrites_urls() {
        let store = Arc::new(MemoryTaskStore::new());
        let task_id = completed_task(&store, true).await;

        let mut objects = MockObjects::new();
        objects
            .expect_put_from_url()
            .times(2)
            .returning(|_, key, _| Ok(public(key)));

        let migrator = ResultMigrator::new(store.clone(), Arc::new(objects));
        let outcome = migrator.migrate(task_id).await.unwrap();

        let expected_video = public(&format!("videos/user-1/{}/video.mp4", task_id));
        let expected_thumb = public(&format!("videos/user-1/{}/thumbnail.jpg", task_id));
        assert_eq!(outcome.video_url, expected_video);
        assert_eq!(outcome.thumbnail_url.as_deref(), Some(expected_thumb.as_str()));

        let status = store.get_status_for_task(task_id).await.unwrap().unwrap();
        assert_eq!(status.r2_status, Some(MigrationStatus::Completed));
        assert_eq!(status.result_url.as_deref(), Some(expected_video.as_str()));
        assert_eq!(status.thumbnail_url.as_deref(), Some(expected_thumb.as_str()));
    }

    #[tokio::test]
    async fn test_failed_copy_preserves_provider_url() {
        let store = Arc::new(MemoryTaskStore::new());
        let task_id = completed_task(&store, false).await;

        let mut objects = MockObjects::new();
        objects
            .expect_put_from_url()
            .times(1)
            .returning(|_, _, _| Err(StorageError::source_fetch("HTTP 403")));

        let migrator = ResultMigrator::new(store.clone(), Arc::new(objects));
        let err = migrator.migrate(task_id).await.unwrap_err();
        assert!(matches!(err, TaskError::Storage(_)));

        let status = store.get_status_for_task(task_id).await.unwrap().unwrap();
        assert_eq!(status.r2_status, Some(MigrationStatus::Failed));
        assert_eq!(status.result_url.as_deref(), Some(PROVIDER_URL));
    }

    #[tokio::test]
    async fn test_failed_migration_is_retried_later() {
        let store = Arc::new(MemoryTaskStore::new());
        let task_id = completed_task(&store, false).await;

        let mut objects = MockObjects::new();
        let mut attempts = 0;
        objects.expect_put_from_url().times(2).returning(move |_, key, _| {
            attempts += 1;
            if attempts == 1 {
                Err(StorageError::upload_failed("timeout"))
            } else {
                Ok(public(key))
            }
        });

        let migrator = ResultMigrator::new(store.clone(), Arc::new(objects));
        assert!(migrator.migrate(task_id).await.is_err());

        let results = migrator.migrate_all_pending().await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
    }

    #[tokio::test]
    async fn test_thumbnail_failure_is_best_effort() {
        let store = Arc::new(MemoryTaskStore::new());
        let task_id = completed_task(&store, true).await;

        let mut objects = MockObjects::new();
        objects
            .expect_put_from_url()
            .withf(|_, key, _| key.ends_with("video.mp4"))
            .times(1)
            .returning(|_, key, _| Ok(public(key)));
        objects
            .expect_put_from_url()
            .withf(|_, key, _| key.ends_with("thumbnail.jpg"))
            .times(1)
            .returning(|_, _, _| Err(StorageError::source_fetch("gone")));

        let migrator = ResultMigrator::new(store.clone(), Arc::new(objects));
        let outcome = migrator.migrate(task_id).await.unwrap();
        assert!(outcome.thumbnail_url.is_none());

        let status = store.get_status_for_task(task_id).await.unwrap().unwrap();
        assert_eq!(status.r2_status, Some(MigrationStatus::Completed));
        assert_eq!(
            status.thumbnail_url.as_deref(),
            Some("https://cdn.provider.test/cover.jpg")
        );
    }

    #[tokio::test]
    async fn test_already_migrated_is_not_eligible() {
        let store = Arc::new(MemoryTaskStore::new());
        let task_id = completed_task(&store, false).await;

        let mut objects = MockObjects::new();
        objects
            .expect_put_from_url()
            .times(1)
            .returning(|_, key, _| Ok(public(key)));

        let migrator = ResultMigrator::new(store.clone(), Arc::new(objects));
        migrator.migrate(task_id).await.unwrap();

        let err = migrator.migrate(task_id).await.unwrap_err();
        assert!(matches!(err, TaskError::NotEligible { .. }));
    }

    #[tokio::test]
    async fn test_unfinished_task_is_not_eligible() {
        let store = Arc::new(MemoryTaskStore::new());
        let definition_id = completed_task(&store, false).await;
        let mut status = store
            .get_status_for_task(definition_id)
            .await
            .unwrap()
            .unwrap();
        status.status = GenerationStatus::Processing;
        store.put_status(status).await;

        let mut objects = MockObjects::new();
        objects.expect_put_from_url().never();

        let migrator = ResultMigrator::new(store.clone(), Arc::new(objects));
        let err = migrator.migrate(definition_id).await.unwrap_err();
        assert!(matches!(err, TaskError::NotEligible { .. }));
    }

    #[tokio::test]
    async fn test_lost_claim_reports_already_claimed() {
        let store = Arc::new(MemoryTaskStore::new());
        let task_id = completed_task(&store, false).await;
        let snapshot = TrackedTask {
            definition: store.get_definition(task_id).await.unwrap().unwrap(),
            status: store.get_status_for_task(task_id).await.unwrap().unwrap(),
        };
        store.claim_migration(snapshot.status.id).await.unwrap();

        let mut objects = MockObjects::new();
        objects.expect_put_from_url().never();

        let migrator = ResultMigrator::new(store.clone(), Arc::new(objects));
        let err = migrator.migrate_tracked(&snapshot).await.unwrap_err();
        assert!(matches!(err, TaskError::AlreadyClaimed(id) if id == task_id));
    }

    #[tokio::test]
    async fn test_batch_reports_partial_failure() {
        let store = Arc::new(MemoryTaskStore::new());
        let first = completed_task(&store, false).await;
        let second = completed_task(&store, false).await;

        let mut objects = MockObjects::new();
        let failing = format!("videos/user-1/{}/video.mp4", first);
        objects
            .expect_put_from_url()
            .times(2)
            .returning(move |_, key, _| {
                if key == failing {
                    Err(StorageError::upload_failed("bucket full"))
                } else {
                    Ok(public(key))
                }
            });

        let migrator = ResultMigrator::new(store.clone(), Arc::new(objects));
        let results = migrator.migrate_all_pending().await.unwrap();

        assert_eq!(results.len(), 2);
        let by_id = |id| results.iter().find(|r| r.task_id == id).unwrap();
        assert!(!by_id(first).success);
        assert!(by_id(first).error.is_some());
        assert!(by_id(second).success);
    }

    #[tokio::test]
    async fn test_failed_url_write_marks_row_failed() {
        let memory = Arc::new(MemoryTaskStore::new());
        let task_id = completed_task(&memory, false).await;

        let mut objects = MockObjects::new();
        objects
            .expect_put_from_url()
            .times(2)
            .returning(|_, key, _| Ok(public(key)));
        let objects: Arc<dyn ObjectStore> = Arc::new(objects);

        let flaky = Arc::new(FlakyFinishStore::new(memory.clone()));
        let migrator = ResultMigrator::new(flaky, objects.clone());
        let err = migrator.migrate(task_id).await.unwrap_err();
        assert!(matches!(err, TaskError::Store(_)));

        let status = memory.get_status_for_task(task_id).await.unwrap().unwrap();
        assert_eq!(status.r2_status, Some(MigrationStatus::Failed));
        assert_eq!(status.result_url.as_deref(), Some(PROVIDER_URL));

        let migrator = ResultMigrator::new(memory.clone(), objects);
        let results = migrator.migrate_all_pending().await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].success);

        let status = memory.get_status_for_task(task_id).await.unwrap().unwrap();
        assert_eq!(status.r2_status, Some(MigrationStatus::Completed));
    }

    #[tokio::test]
    async fn test_abandoned_upload_is_reclaimed() {
        let store = Arc::new(MemoryTaskStore::new());
        let task_id = completed_task(&store, false).await;
        let status = store.get_status_for_task(task_id).await.unwrap().unwrap();
        assert!(store.claim_migration(status.id).await.unwrap());

        let mut objects = MockObjects::new();
        objects
            .expect_put_from_url()
            .times(1)
            .returning(|_, key, _| Ok(public(key)));
        let migrator = ResultMigrator::new(store.clone(), Arc::new(objects));

        // A live claim is left alone.
        assert!(migrator.migrate_all_pending().await.unwrap().is_empty());
        let err = migrator.migrate(task_id).await.unwrap_err();
        assert!(matches!(err, TaskError::NotEligible { .. }));

        store
            .set_updated_at(status.id, Utc::now() - Duration::hours(1))
            .await;

        let results = migrator.migrate_all_pending().await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].success);

        let status = store.get_status_for_task(task_id).await.unwrap().unwrap();
        assert_eq!(status.r2_status, Some(MigrationStatus::Completed));
    }
}

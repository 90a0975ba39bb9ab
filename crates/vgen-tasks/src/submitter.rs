//! Task submission.
//!
//! Order of operations: validate, check credits (image-to-video only),
//! persist the definition, dispatch, persist the status row, deduct credits.
//! Nothing is written when validation or the credit check fails. A dispatch
//! failure leaves the definition without a status row.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;
use vgen_models::{
    AdditionalParams, CreateTaskParams, GenerationStatus, InputImage, NewTaskDefinition,
    NewTaskStatus, ProviderKind, TaskId, TaskType,
};
use vgen_providers::{GenerationRequest, ProviderAdapter, ProviderRegistry};
use vgen_storage::{input_key, ObjectStore};
use vgen_store::TaskStore;

use crate::error::{TaskError, TaskResult};
use crate::metrics::record_submission;

/// Stored in place of an input image path when the upload did not succeed.
pub const INPUT_IMAGE_PLACEHOLDER: &str = "upload-failed";

/// Which provider handles each task type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderRouting {
    pub text_to_video: ProviderKind,
    pub image_to_video: ProviderKind,
}

impl Default for ProviderRouting {
    fn default() -> Self {
        Self {
            text_to_video: ProviderKind::Official,
            image_to_video: ProviderKind::Aggregator,
        }
    }
}

impl ProviderRouting {
    /// Read `TEXT_TO_VIDEO_PROVIDER` and `IMAGE_TO_VIDEO_PROVIDER`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |name: &str, fallback: ProviderKind| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(fallback)
        };

        Self {
            text_to_video: read("TEXT_TO_VIDEO_PROVIDER", defaults.text_to_video),
            image_to_video: read("IMAGE_TO_VIDEO_PROVIDER", defaults.image_to_video),
        }
    }

    pub fn preferred(&self, task_type: TaskType) -> ProviderKind {
        match task_type {
            TaskType::TextToVideo => self.text_to_video,
            TaskType::ImageToVideo => self.image_to_video,
        }
    }
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitOutcome {
    pub task_id: TaskId,
    pub external_task_id: String,
    pub status: GenerationStatus,
    pub credits: i32,
    pub provider: ProviderKind,
}

pub struct TaskSubmitter {
    store: Arc<dyn TaskStore>,
    providers: ProviderRegistry,
    objects: Option<Arc<dyn ObjectStore>>,
    routing: ProviderRouting,
}

impl TaskSubmitter {
    pub fn new(store: Arc<dyn TaskStore>, providers: ProviderRegistry) -> Self {
        Self {
            store,
            providers,
            objects: None,
            routing: ProviderRouting::default(),
        }
    }

    /// Upload input images here before persisting the definition.
    pub fn with_object_store(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    pub fn with_routing(mut self, routing: ProviderRouting) -> Self {
        self.routing = routing;
        self
    }

    /// The preferred adapter for the task type, or any registered one.
    fn select_adapter(&self, task_type: TaskType) -> TaskResult<Arc<dyn ProviderAdapter>> {
        let preferred = self.routing.preferred(task_type);
        self.providers
            .get(preferred)
            .or_else(|| {
                self.providers
                    .kinds()
                    .into_iter()
                    .find_map(|kind| self.providers.get(kind))
            })
            .ok_or_else(|| TaskError::NoProvider(task_type.to_string()))
    }

    async fn store_input_image(&self, user_id: &str, image: &InputImage) -> String {
        let Some(objects) = &self.objects else {
            warn!(user_id = %user_id, "No object store configured, storing image placeholder");
            return INPUT_IMAGE_PLACEHOLDER.to_string();
        };

        let key = input_key(user_id, &Uuid::new_v4().to_string(), image.extension());
        match objects
            .put_bytes(image.data.clone(), &key, &image.content_type)
            .await
        {
            Ok(_) => key,
            Err(e) => {
                warn!(user_id = %user_id, "Input image upload failed, storing placeholder: {}", e);
                INPUT_IMAGE_PLACEHOLDER.to_string()
            }
        }
    }

    /// Create, dispatch and bill one generation task.
    pub async fn submit(&self, user_id: &str, params: CreateTaskParams) -> TaskResult<SubmitOutcome> {
        params.check()?;

        let adapter = self.select_adapter(params.task_type)?;
        let provider = adapter.kind();
        let credits = params.credits();

        if params.task_type == TaskType::ImageToVideo {
            let available = self.store.get_credit_balance(user_id).await?;
            if available < i64::from(credits) {
                info!(user_id = %user_id, required = credits, available, "Insufficient credits");
                return Err(TaskError::InsufficientCredits {
                    required: credits,
                    available,
                });
            }
        }

        let (start_img_path, end_img_path) = match params.task_type {
            TaskType::ImageToVideo => {
                let start = match &params.start_image {
                    Some(image) => Some(self.store_input_image(user_id, image).await),
                    None => None,
                };
                let end = match &params.end_image {
                    Some(image) => Some(self.store_input_image(user_id, image).await),
                    None => None,
                };
                (start, end)
            }
            TaskType::TextToVideo => (None, None),
        };

        let definition = self
            .store
            .insert_definition(NewTaskDefinition {
                user_id: user_id.to_string(),
                task_type: params.task_type,
                model: params.model_name().to_string(),
                high_quality: params.high_quality,
                prompt: params.prompt_text().map(str::to_string),
                negative_prompt: params.negative_prompt_text().map(str::to_string),
                aspect_ratio: params.aspect_ratio,
                cfg: params.cfg,
                credits,
                start_img_path,
                end_img_path,
                provider,
                additional_params: AdditionalParams {
                    duration: Some(params.duration),
                    api_endpoint: Some(adapter.api_endpoint().to_string()),
                    camera_control: params.camera_control.clone(),
                    extra: Default::default(),
                },
            })
            .await?;

        let task_id = definition.id;

        let external_task_id = match adapter.submit(&GenerationRequest::from_params(&params)).await {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    orphaned_task_id = task_id,
                    provider = %provider,
                    "Provider dispatch failed, definition left without status: {}",
                    e
                );
                record_submission(provider.as_str(), "dispatch_failed");
                return Err(TaskError::ProviderDispatch { task_id, source: e });
            }
        };

        let status = self
            .store
            .insert_status(NewTaskStatus {
                task_id,
                external_task_id: Some(external_task_id.clone()),
                status: GenerationStatus::Pending,
            })
            .await
            .map_err(|e| {
                error!(
                    task_id,
                    external_task_id = %external_task_id,
                    "Task dispatched but status row could not be written: {}",
                    e
                );
                e
            })?;

        if let Err(e) = self.store.deduct_credits(task_id, credits).await {
            warn!(task_id, credits, "Credit deduction failed: {}", e);
        }

        record_submission(provider.as_str(), "success");
        info!(
            task_id,
            external_task_id = %external_task_id,
            provider = %provider,
            user_id = %user_id,
            credits,
            "Task submitted"
        );

        Ok(SubmitOutcome {
            task_id,
            external_task_id,
            status: status.status,
            credits,
            provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockObjects, ScriptedProvider};
    use vgen_models::{AspectRatio, VideoDuration};
    use vgen_providers::ProviderError;
    use vgen_storage::StorageError;
    use vgen_store::MemoryTaskStore;

    fn png() -> InputImage {
        InputImage::new(vec![0x89, 0x50, 0x4e, 0x47], "image/png")
    }

    fn submitter_with(store: &Arc<MemoryTaskStore>, provider: Arc<ScriptedProvider>) -> TaskSubmitter {
        TaskSubmitter::new(store.clone(), ProviderRegistry::new().with(provider))
    }

    #[tokio::test]
    async fn test_text_to_video_happy_path() {
        let store = Arc::new(MemoryTaskStore::new());
        let provider = ScriptedProvider::new(ProviderKind::Official)
            .on_submit(|request| {
                assert_eq!(request.prompt, "a cat");
                assert_eq!(request.aspect_ratio, AspectRatio::Square);
                Ok("ext-1".to_string())
            })
            .shared();
        let submitter = submitter_with(&store, provider.clone());

        let mut params = CreateTaskParams::text_to_video("a cat");
        params.aspect_ratio = AspectRatio::Square;
        let outcome = submitter.submit("user-1", params).await.unwrap();

        assert_eq!(outcome.credits, 1);
        assert_eq!(outcome.status, GenerationStatus::Pending);
        assert_eq!(outcome.external_task_id, "ext-1");
        assert_eq!(outcome.provider, ProviderKind::Official);
        assert_eq!(provider.submits(), 1);

        let definitions = store.definitions().await;
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].provider, ProviderKind::Official);
        assert_eq!(
            definitions[0].additional_params.api_endpoint.as_deref(),
            Some("https://provider.test")
        );
        assert_eq!(
            definitions[0].additional_params.duration,
            Some(VideoDuration::Five)
        );

        let statuses = store.statuses().await;
        assert_eq!(statuses[0].external_task_id.as_deref(), Some("ext-1"));
        assert_eq!(store.deductions().await, vec![(outcome.task_id, 1)]);
    }

    #[tokio::test]
    async fn test_validation_failure_writes_nothing() {
        let store = Arc::new(MemoryTaskStore::new());
        let provider = ScriptedProvider::new(ProviderKind::Official).shared();
        let submitter = submitter_with(&store, provider.clone());

        let err = submitter
            .submit("user-1", CreateTaskParams::text_to_video("  "))
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::Validation(_)));
        assert!(store.definitions().await.is_empty());
        assert_eq!(provider.submits(), 0);
    }

    #[tokio::test]
    async fn test_insufficient_credits_writes_nothing() {
        let store = Arc::new(MemoryTaskStore::new());
        store.set_credits("user-1", 2).await;
        let provider = ScriptedProvider::new(ProviderKind::Aggregator).shared();
        let submitter = submitter_with(&store, provider.clone());

        let mut params = CreateTaskParams::image_to_video("a cat", png());
        params.high_quality = true;
        let err = submitter.submit("user-1", params).await.unwrap_err();

        match err {
            TaskError::InsufficientCredits {
                required,
                available,
            } => {
                assert_eq!(required, 3);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.definitions().await.is_empty());
        assert!(store.statuses().await.is_empty());
        assert_eq!(provider.submits(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_failure_leaves_orphan_definition() {
        let store = Arc::new(MemoryTaskStore::new());
        let provider = ScriptedProvider::new(ProviderKind::Official)
            .on_submit(|_| Err(ProviderError::Timeout(30)))
            .shared();
        let submitter = submitter_with(&store, provider);

        let err = submitter
            .submit("user-1", CreateTaskParams::text_to_video("a cat"))
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::ProviderDispatch { .. }));
        assert_eq!(store.definitions().await.len(), 1);
        assert!(store.statuses().await.is_empty());
        assert!(store.deductions().await.is_empty());
    }

    #[tokio::test]
    async fn test_deduction_failure_is_not_surfaced() {
        let store = Arc::new(MemoryTaskStore::new());
        store.fail_deductions(true).await;
        let provider = ScriptedProvider::new(ProviderKind::Official).shared();
        let submitter = submitter_with(&store, provider);

        let outcome = submitter
            .submit("user-1", CreateTaskParams::text_to_video("a cat"))
            .await
            .unwrap();
        assert_eq!(outcome.external_task_id, "ext-1");
        assert_eq!(store.statuses().await.len(), 1);
    }

    #[tokio::test]
    async fn test_image_upload_failure_stores_placeholder() {
        let store = Arc::new(MemoryTaskStore::new());
        store.set_credits("user-1", 10).await;
        let provider = ScriptedProvider::new(ProviderKind::Aggregator).shared();

        let mut objects = MockObjects::new();
        objects
            .expect_put_bytes()
            .times(1)
            .returning(|_, _, _| Err(StorageError::upload_failed("bucket down")));

        let submitter = submitter_with(&store, provider).with_object_store(Arc::new(objects));

        let mut params = CreateTaskParams::image_to_video("a cat", png());
        params.duration = VideoDuration::Ten;
        let outcome = submitter.submit("user-1", params).await.unwrap();

        assert_eq!(outcome.credits, 2);
        let definition = &store.definitions().await[0];
        assert_eq!(
            definition.start_img_path.as_deref(),
            Some(INPUT_IMAGE_PLACEHOLDER)
        );
        assert_eq!(store.get_credit_balance("user-1").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_image_uploaded_under_input_key() {
        let store = Arc::new(MemoryTaskStore::new());
        store.set_credits("user-1", 10).await;
        let provider = ScriptedProvider::new(ProviderKind::Aggregator).shared();

        let mut objects = MockObjects::new();
        objects
            .expect_put_bytes()
            .withf(|data, key, content_type| {
                data.len() == 4
                    && key.starts_with("inputs/user-1/")
                    && key.ends_with(".png")
                    && content_type.ends_with("png")
            })
            .times(1)
            .returning(|_, key, _| Ok(format!("https://media.test/{}", key)));

        let submitter = submitter_with(&store, provider).with_object_store(Arc::new(objects));
        submitter
            .submit("user-1", CreateTaskParams::image_to_video("a cat", png()))
            .await
            .unwrap();

        let definition = &store.definitions().await[0];
        assert!(definition
            .start_img_path
            .as_deref()
            .unwrap()
            .starts_with("inputs/user-1/"));
        assert!(definition.end_img_path.is_none());
    }

    #[tokio::test]
    async fn test_routing_falls_back_to_registered_provider() {
        let store = Arc::new(MemoryTaskStore::new());
        let provider = ScriptedProvider::new(ProviderKind::Aggregator)
            .on_submit(|_| Ok("agg-9".to_string()))
            .shared();
        let submitter = submitter_with(&store, provider);

        let outcome = submitter
            .submit("user-1", CreateTaskParams::text_to_video("a cat"))
            .await
            .unwrap();
        assert_eq!(outcome.provider, ProviderKind::Aggregator);
        assert_eq!(store.definitions().await[0].provider, ProviderKind::Aggregator);
    }

    #[tokio::test]
    async fn test_no_provider_registered() {
        let store = Arc::new(MemoryTaskStore::new());
        let submitter = TaskSubmitter::new(store.clone(), ProviderRegistry::new());

        let err = submitter
            .submit("user-1", CreateTaskParams::text_to_video("a cat"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::NoProvider(_)));
        assert!(store.definitions().await.is_empty());
    }

    #[test]
    fn test_default_routing() {
        let routing = ProviderRouting::default();
        assert_eq!(routing.preferred(TaskType::TextToVideo), ProviderKind::Official);
        assert_eq!(routing.preferred(TaskType::ImageToVideo), ProviderKind::Aggregator);
    }
}

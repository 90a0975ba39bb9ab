//! Submit, reconcile and migrate a task against a fake provider API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use serde_json::json;
use vgen_models::{
    AspectRatio, CreateTaskParams, GenerationStatus, InputImage, MigrationStatus, ProviderKind,
};
use vgen_providers::{OfficialConfig, OfficialProvider, ProviderRegistry};
use vgen_storage::{ObjectStore, StorageResult};
use vgen_store::{MemoryTaskStore, TaskStore};
use vgen_tasks::{ReconcilerConfig, ResultMigrator, StatusReconciler, TaskError, TaskSubmitter};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mock! {
    pub Objects {}
    #[async_trait]
    impl ObjectStore for Objects {
        async fn put_from_url(&self, source_url: &str, key: &str, content_type: &str) -> StorageResult<String>;
        async fn put_bytes(&self, data: Vec<u8>, key: &str, content_type: &str) -> StorageResult<String>;
        async fn health_check(&self) -> bool;
    }
}

const VIDEO_URL: &str = "https://cdn.kling.test/out/kling-1.mp4";

fn registry(server: &MockServer) -> ProviderRegistry {
    let config = OfficialConfig::new("ak", "sk").with_base_url(server.uri());
    ProviderRegistry::new().with(Arc::new(OfficialProvider::new(config).unwrap()))
}

fn listing(status: &str) -> serde_json::Value {
    let mut task = json!({ "task_id": "kling-1", "task_status": status });
    if status == "succeed" {
        task["task_result"] = json!({ "videos": [{ "id": "v1", "url": VIDEO_URL, "duration": "5" }] });
    }
    json!({ "code": 0, "message": "SUCCEED", "data": [task] })
}

#[tokio::test]
async fn test_text_to_video_lifecycle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/videos/text2video"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "message": "SUCCEED",
            "data": { "task_id": "kling-1", "task_status": "submitted" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/videos/text2video"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing("processing")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/videos/text2video"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing("succeed")))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryTaskStore::new());
    let providers = registry(&server);

    // Submit
    let submitter = TaskSubmitter::new(store.clone(), providers.clone());
    let mut params = CreateTaskParams::text_to_video("a cat");
    params.aspect_ratio = AspectRatio::Square;
    params.cfg = 0.5;
    let outcome = submitter.submit("user-1", params).await.unwrap();

    assert_eq!(outcome.credits, 1);
    assert_eq!(outcome.status, GenerationStatus::Pending);
    assert_eq!(outcome.external_task_id, "kling-1");
    assert_eq!(outcome.provider, ProviderKind::Official);
    let task_id = outcome.task_id;

    // Reconcile
    let reconciler = StatusReconciler::new(
        store.clone(),
        providers,
        ReconcilerConfig {
            call_delay: Duration::ZERO,
            ..Default::default()
        },
    );

    let report = reconciler.run_pass().await.unwrap();
    assert_eq!(report.updated, 1);
    let status = store.get_status_for_task(task_id).await.unwrap().unwrap();
    assert_eq!(status.status, GenerationStatus::Processing);

    let report = reconciler.run_pass().await.unwrap();
    assert_eq!(report.updated, 1);
    let status = store.get_status_for_task(task_id).await.unwrap().unwrap();
    assert_eq!(status.status, GenerationStatus::Completed);
    assert_eq!(status.result_url.as_deref(), Some(VIDEO_URL));

    let report = reconciler.run_pass().await.unwrap();
    assert_eq!(report.examined, 0);

    // Migrate
    let mut objects = MockObjects::new();
    objects
        .expect_put_from_url()
        .withf(|source, _, content_type| source.ends_with("kling-1.mp4") && content_type.ends_with("mp4"))
        .times(1)
        .returning(|_, key, _| Ok(format!("https://media.vgen.test/{}", key)));
    let migrator = ResultMigrator::new(store.clone(), Arc::new(objects));

    let migrated = migrator.migrate(task_id).await.unwrap();
    let expected = format!("https://media.vgen.test/videos/user-1/{}/video.mp4", task_id);
    assert_eq!(migrated.video_url, expected);

    let status = store.get_status_for_task(task_id).await.unwrap().unwrap();
    assert_eq!(status.r2_status, Some(MigrationStatus::Completed));
    assert_eq!(status.result_url.as_deref(), Some(expected.as_str()));
    assert_eq!(store.deductions().await, vec![(task_id, 1)]);
}

#[tokio::test]
async fn test_insufficient_credits_creates_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryTaskStore::new());
    let submitter = TaskSubmitter::new(store.clone(), registry(&server));

    let image = InputImage::new(vec![0xff, 0xd8, 0xff], "image/jpeg");
    let err = submitter
        .submit("broke-user", CreateTaskParams::image_to_video("a cat", image))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TaskError::InsufficientCredits {
            required: 1,
            available: 0
        }
    ));
    assert!(store.definitions().await.is_empty());
    assert!(store.statuses().await.is_empty());
    assert!(store.deductions().await.is_empty());
}

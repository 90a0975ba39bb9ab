//! Test doubles shared by the service tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use mockall::mock;
use vgen_models::{
    AdditionalParams, AspectRatio, GenerationStatus, MigrationStatus, NewTaskDefinition,
    NewTaskStatus, ProviderKind, StatusPatch, TaskDefinition, TaskId, TaskStatus, TaskType,
};
use vgen_providers::{
    GenerationRequest, PollTarget, ProviderAdapter, ProviderError, ProviderPoll, ProviderResult,
};
use vgen_storage::{ObjectStore, StorageResult};
use vgen_store::{
    MemoryTaskStore, StoreError, StoreResult, TaskStore, TaskWithStatus, TrackedTask,
};

mock! {
    pub Objects {}
    #[async_trait]
    impl ObjectStore for Objects {
        async fn put_from_url(&self, source_url: &str, key: &str, content_type: &str) -> StorageResult<String>;
        async fn put_bytes(&self, data: Vec<u8>, key: &str, content_type: &str) -> StorageResult<String>;
        async fn health_check(&self) -> bool;
    }
}

type SubmitFn = Box<dyn Fn(&GenerationRequest) -> ProviderResult<String> + Send + Sync>;
type PollFn = Box<dyn Fn(&PollTarget) -> ProviderResult<ProviderPoll> + Send + Sync>;

/// Provider whose answers come from closures, counting calls.
pub struct ScriptedProvider {
    kind: ProviderKind,
    submit: SubmitFn,
    poll: PollFn,
    submits: AtomicUsize,
    polls: AtomicUsize,
    polled: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            submit: Box::new(|_| Ok("ext-1".to_string())),
            poll: Box::new(|t| Err(ProviderError::TaskNotFound(t.external_task_id.clone()))),
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            polled: Mutex::new(Vec::new()),
        }
    }

    pub fn on_submit(
        mut self,
        f: impl Fn(&GenerationRequest) -> ProviderResult<String> + Send + Sync + 'static,
    ) -> Self {
        self.submit = Box::new(f);
        self
    }

    pub fn on_poll(
        mut self,
        f: impl Fn(&PollTarget) -> ProviderResult<ProviderPoll> + Send + Sync + 'static,
    ) -> Self {
        self.poll = Box::new(f);
        self
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn polled_ids(&self) -> Vec<String> {
        self.polled.lock().unwrap().clone()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn api_endpoint(&self) -> &str {
        "https://provider.test"
    }

    async fn submit(&self, request: &GenerationRequest) -> ProviderResult<String> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        (self.submit)(request)
    }

    async fn poll(&self, target: &PollTarget) -> ProviderResult<ProviderPoll> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.polled
            .lock()
            .unwrap()
            .push(target.external_task_id.clone());
        (self.poll)(target)
    }
}

/// Insert a dispatched task, then backdate its status row to `status`
/// last written `age_hours` ago.
pub async fn seed_task(
    store: &MemoryTaskStore,
    provider: ProviderKind,
    status: GenerationStatus,
    age_hours: i64,
) -> TaskStatus {
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
            provider,
            additional_params: AdditionalParams::default(),
        })
        .await
        .unwrap();

    let mut row = store
        .insert_status(NewTaskStatus {
            task_id: definition.id,
            external_task_id: Some(format!("ext-{}", definition.id)),
            status: GenerationStatus::Pending,
        })
        .await
        .unwrap();

    row.status = status;
    row.updated_at = Utc::now() - Duration::hours(age_hours);
    store.put_status(row.clone()).await;
    row
}

/// Memory store whose `finish_migration` rejects the completed-urls write.
/// Every other call, including the `failed` write, reaches the inner store.
pub struct FlakyFinishStore {
    inner: Arc<MemoryTaskStore>,
}

impl FlakyFinishStore {
    pub fn new(inner: Arc<MemoryTaskStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl TaskStore for FlakyFinishStore {
    async fn insert_definition(&self, new: NewTaskDefinition) -> StoreResult<TaskDefinition> {
        self.inner.insert_definition(new).await
    }

    async fn get_definition(&self, task_id: TaskId) -> StoreResult<Option<TaskDefinition>> {
        self.inner.get_definition(task_id).await
    }

    async fn list_definitions_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<TaskWithStatus>> {
        self.inner.list_definitions_for_user(user_id, limit).await
    }

    async fn rename_definition(&self, task_id: TaskId, title: &str) -> StoreResult<bool> {
        self.inner.rename_definition(task_id, title).await
    }

    async fn delete_definition_cascade(&self, task_id: TaskId) -> StoreResult<()> {
        self.inner.delete_definition_cascade(task_id).await
    }

    async fn insert_status(&self, new: NewTaskStatus) -> StoreResult<TaskStatus> {
        self.inner.insert_status(new).await
    }

    async fn get_status_for_task(&self, task_id: TaskId) -> StoreResult<Option<TaskStatus>> {
        self.inner.get_status_for_task(task_id).await
    }

    async fn find_by_external_id(
        &self,
        provider: ProviderKind,
        external_task_id: &str,
    ) -> StoreResult<Option<TrackedTask>> {
        self.inner.find_by_external_id(provider, external_task_id).await
    }

    async fn update_status(
        &self,
        status_id: i64,
        patch: &StatusPatch,
    ) -> StoreResult<Option<TaskStatus>> {
        self.inner.update_status(status_id, patch).await
    }

    async fn list_reconcilable(
        &self,
        limit: usize,
        providers: &[ProviderKind],
    ) -> StoreResult<Vec<TrackedTask>> {
        self.inner.list_reconcilable(limit, providers).await
    }

    async fn claim_migration(&self, status_id: i64) -> StoreResult<bool> {
        self.inner.claim_migration(status_id).await
    }

    async fn finish_migration(&self, status_id: i64, patch: &StatusPatch) -> StoreResult<()> {
        if patch.r2_status == Some(MigrationStatus::Completed) {
            return Err(StoreError::Unavailable {
                status: 503,
                message: "upstream connect error".into(),
            });
        }
        self.inner.finish_migration(status_id, patch).await
    }

    async fn list_migratable(&self, limit: usize) -> StoreResult<Vec<TrackedTask>> {
        self.inner.list_migratable(limit).await
    }

    async fn get_credit_balance(&self, user_id: &str) -> StoreResult<i64> {
        self.inner.get_credit_balance(user_id).await
    }

    async fn deduct_credits(&self, task_id: TaskId, amount: i32) -> StoreResult<()> {
        self.inner.deduct_credits(task_id, amount).await
    }

    async fn add_favorite(&self, user_id: &str, task_id: TaskId) -> StoreResult<()> {
        self.inner.add_favorite(user_id, task_id).await
    }

    async fn remove_favorite(&self, user_id: &str, task_id: TaskId) -> StoreResult<()> {
        self.inner.remove_favorite(user_id, task_id).await
    }
}

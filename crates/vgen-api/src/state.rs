//! Application state.

use std::sync::Arc;

use tracing::{info, warn};
use vgen_providers::ProviderRegistry;
use vgen_storage::{ObjectStore, R2Client};
use vgen_store::{SupabaseClient, SupabaseTaskStore, TaskStore};
use vgen_tasks::{ProviderRouting, ReconcilerConfig, ResultMigrator, StatusReconciler, TaskSubmitter};

use crate::auth::JwtVerifier;
use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn TaskStore>,
    pub providers: ProviderRegistry,
    pub objects: Option<Arc<dyn ObjectStore>>,
    pub submitter: Arc<TaskSubmitter>,
    pub reconciler: Arc<StatusReconciler>,
    pub migrator: Option<Arc<ResultMigrator>>,
    pub jwt: Arc<JwtVerifier>,
}

impl AppState {
    /// Create application state from environment variables.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let client = SupabaseClient::from_env()?;
        let store: Arc<dyn TaskStore> = Arc::new(SupabaseTaskStore::new(client));

        let providers = ProviderRegistry::from_env()?;
        if providers.is_empty() {
            warn!("No video providers configured, task submission will fail");
        }

        let objects: Option<Arc<dyn ObjectStore>> = match R2Client::from_env() {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!("Object storage disabled, results stay at provider URLs: {}", e);
                None
            }
        };

        info!(providers = ?providers.kinds(), "Application state ready");

        Ok(Self::from_parts(
            config,
            store,
            providers,
            objects,
            ProviderRouting::from_env(),
            ReconcilerConfig::from_env(),
        ))
    }

    /// Wire services over already-built backends.
    pub fn from_parts(
        config: ApiConfig,
        store: Arc<dyn TaskStore>,
        providers: ProviderRegistry,
        objects: Option<Arc<dyn ObjectStore>>,
        routing: ProviderRouting,
        reconciler_config: ReconcilerConfig,
    ) -> Self {
        let migrator = objects
            .as_ref()
            .map(|objects| Arc::new(ResultMigrator::new(Arc::clone(&store), Arc::clone(objects))));

        let mut submitter = TaskSubmitter::new(Arc::clone(&store), providers.clone()).with_routing(routing);
        if let Some(objects) = &objects {
            submitter = submitter.with_object_store(Arc::clone(objects));
        }

        let mut reconciler = StatusReconciler::new(Arc::clone(&store), providers.clone(), reconciler_config);
        if let Some(migrator) = &migrator {
            reconciler = reconciler.with_migrator(Arc::clone(migrator));
        }

        let jwt = Arc::new(JwtVerifier::new(&config.jwt_secret));

        Self {
            config,
            store,
            providers,
            objects,
            submitter: Arc::new(submitter),
            reconciler: Arc::new(reconciler),
            migrator,
            jwt,
        }
    }
}

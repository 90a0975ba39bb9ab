//! The provider seam and the registry that routes by stored provider tag.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use vgen_models::ProviderKind;

use crate::aggregator::{AggregatorConfig, AggregatorProvider};
use crate::error::ProviderResult;
use crate::official::{OfficialConfig, OfficialProvider};
use crate::types::{GenerationRequest, PollTarget, ProviderPoll};

/// A video generation backend.
///
/// `submit` dispatches a job and returns the provider's task id. `poll`
/// reports where that job stands in the unified status vocabulary; errors for
/// which [`crate::ProviderError::is_unavailable`] holds mean "could not ask",
/// not "the job failed".
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Base URL stamped into `additional_params.api_endpoint`.
    fn api_endpoint(&self) -> &str;

    async fn submit(&self, request: &GenerationRequest) -> ProviderResult<String>;

    async fn poll(&self, target: &PollTarget) -> ProviderResult<ProviderPoll>;
}

/// Configured adapters keyed by provider tag.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own kind, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Registered kinds in a stable order.
    pub fn kinds(&self) -> Vec<ProviderKind> {
        ProviderKind::SUPPORTED
            .iter()
            .copied()
            .filter(|k| self.adapters.contains_key(k))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Build from environment variables. Providers whose credentials are
    /// missing are left out.
    pub fn from_env() -> ProviderResult<Self> {
        let mut registry = Self::new();

        match OfficialConfig::from_env() {
            Some(config) => {
                registry.register(Arc::new(OfficialProvider::new(config)?));
                info!("Official provider configured");
            }
            None => warn!("KLING_ACCESS_KEY/KLING_SECRET_KEY not set, official provider disabled"),
        }

        match AggregatorConfig::from_env() {
            Some(config) => {
                registry.register(Arc::new(AggregatorProvider::new(config)?));
                info!("Aggregator provider configured");
            }
            None => warn!("AI302_API_KEY not set, aggregator provider disabled"),
        }

        Ok(registry)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

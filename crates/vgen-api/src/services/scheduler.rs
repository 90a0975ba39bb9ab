//! Timer-driven reconcile and migrate passes.
//!
//! The same passes are reachable through the cron endpoints. Deployments that
//! drive them from an external scheduler leave `ENABLE_BACKGROUND_RECONCILE`
//! unset.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use vgen_tasks::{ResultMigrator, StatusReconciler};

use crate::state::AppState;

pub struct BackgroundScheduler {
    reconciler: Arc<StatusReconciler>,
    migrator: Option<Arc<ResultMigrator>>,
    reconcile_interval: Duration,
    migrate_interval: Duration,
    enabled: bool,
}

impl BackgroundScheduler {
    pub fn new(state: &AppState) -> Self {
        Self {
            reconciler: Arc::clone(&state.reconciler),
            migrator: state.migrator.clone(),
            reconcile_interval: state.config.reconcile_interval,
            migrate_interval: state.config.migrate_interval,
            enabled: state.config.enable_background_reconcile,
        }
    }

    /// Spawn the loops. Returns no handles when background work is disabled.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        if !self.enabled {
            info!("Background reconcile is disabled");
            return Vec::new();
        }

        let this = Arc::new(self);
        let mut handles = Vec::with_capacity(2);

        let reconcile = Arc::clone(&this);
        handles.push(tokio::spawn(async move {
            reconcile.reconcile_loop().await;
        }));

        if this.migrator.is_some() {
            let migrate = Arc::clone(&this);
            handles.push(tokio::spawn(async move {
                migrate.migrate_loop().await;
            }));
        }

        handles
    }

    async fn reconcile_loop(&self) {
        info!("Starting reconcile loop (interval: {:?})", self.reconcile_interval);
        let mut ticker = interval(self.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(e) = self.reconcile_once().await {
                error!("Reconcile pass error: {}", e);
            }
        }
    }

    async fn migrate_loop(&self) {
        info!("Starting migrate loop (interval: {:?})", self.migrate_interval);
        let mut ticker = interval(self.migrate_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(e) = self.migrate_once().await {
                error!("Migration batch error: {}", e);
            }
        }
    }

    /// Run a single reconcile pass.
    pub async fn reconcile_once(&self) -> anyhow::Result<()> {
        let report = self.reconciler.run_pass().await?;
        if report.examined > 0 {
            info!(
                examined = report.examined,
                updated = report.updated,
                fallback = report.fallback,
                errors = report.errors,
                "Reconcile pass complete"
            );
        }
        Ok(())
    }

    /// Run a single migration batch. Returns how many tasks moved.
    pub async fn migrate_once(&self) -> anyhow::Result<usize> {
        let Some(migrator) = &self.migrator else {
            return Ok(0);
        };

        let results = migrator.migrate_all_pending().await?;
        let migrated = results.iter().filter(|r| r.success).count();
        if !results.is_empty() {
            info!(
                migrated,
                failed = results.len() - migrated,
                "Migration batch complete"
            );
        }
        Ok(migrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use vgen_providers::ProviderRegistry;
    use vgen_store::{MemoryTaskStore, TaskStore};
    use vgen_tasks::{ProviderRouting, ReconcilerConfig};

    fn state(enabled: bool) -> AppState {
        let config = ApiConfig {
            enable_background_reconcile: enabled,
            ..ApiConfig::default()
        };
        let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        AppState::from_parts(
            config,
            store,
            ProviderRegistry::new(),
            None,
            ProviderRouting::default(),
            ReconcilerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_disabled_spawns_nothing() {
        let handles = BackgroundScheduler::new(&state(false)).spawn();
        assert!(handles.is_empty());
    }

    #[tokio::test]
    async fn test_single_passes_without_backends() {
        let scheduler = BackgroundScheduler::new(&state(true));
        scheduler.reconcile_once().await.unwrap();
        assert_eq!(scheduler.migrate_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_enabled_without_storage_runs_reconcile_only() {
        let handles = BackgroundScheduler::new(&state(true)).spawn();
        assert_eq!(handles.len(), 1);
        for handle in handles {
            handle.abort();
        }
    }
}

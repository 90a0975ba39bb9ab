//! Status reconciliation.
//!
//! A pass reads the least recently updated non-terminal tasks, asks each
//! task's provider where it stands, and writes the translated status back.
//! Writes only ever move a task forward. When a provider cannot answer, the
//! staleness policy decides instead. Official tasks get the staleness check
//! before polling too, since that listing rarely shows old tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use vgen_models::{
    GenerationStatus, ProviderKind, StaleTransition, StalenessPolicy, StatusPatch, TaskStatus,
};
use vgen_providers::{PollTarget, ProviderPoll, ProviderRegistry};
use vgen_store::{TaskStore, TrackedTask};

use crate::error::{TaskError, TaskResult};
use crate::metrics::{record_reconcile_pass, record_transition};
use crate::migrator::ResultMigrator;

/// Message written when a provider reports failure without a reason.
const DEFAULT_FAILURE_MESSAGE: &str = "Generation failed";

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Tasks examined per pass
    pub batch_size: usize,
    /// Pause between consecutive provider calls
    pub call_delay: Duration,
    pub staleness: StalenessPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            call_delay: Duration::from_secs(1),
            staleness: StalenessPolicy::default(),
        }
    }
}

impl ReconcilerConfig {
    /// Read `RECONCILE_BATCH_SIZE` and `RECONCILE_CALL_DELAY_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: std::env::var("RECONCILE_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.batch_size),
            call_delay: std::env::var("RECONCILE_CALL_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.call_delay),
            staleness: defaults.staleness,
        }
    }
}

/// Counts from one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    /// Rows written from a provider answer
    pub updated: usize,
    pub unchanged: usize,
    /// Rows written by the staleness policy
    pub fallback: usize,
    /// Rows whose provider has no registered adapter
    pub skipped: usize,
    pub errors: usize,
}

/// Result of feeding one provider report through the transition rules.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The row was written.
    Updated(TaskStatus),
    /// The report carried nothing new.
    Unchanged,
    /// The row became terminal before this write landed.
    Superseded,
}

/// Decide what to write for a provider report.
///
/// Returns `None` when the row is terminal, or when the report neither
/// advances the status nor changes the result URL.
pub fn plan_update(current: &TaskStatus, poll: &ProviderPoll) -> Option<StatusPatch> {
    if current.is_terminal() {
        return None;
    }

    let advances = current.status.can_transition_to(poll.status);
    let url_changed = poll.result_url.is_some() && poll.result_url != current.result_url;
    if !advances && !url_changed {
        return None;
    }

    let mut patch = StatusPatch::default();
    if advances {
        patch.status = Some(poll.status);
        if poll.status == GenerationStatus::Failed {
            patch.error_message = Some(
                poll.error_message
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
            );
        }
    }
    if url_changed {
        patch.result_url = poll.result_url.clone();
    }
    if poll.thumbnail_url.is_some() && poll.thumbnail_url != current.thumbnail_url {
        patch.thumbnail_url = poll.thumbnail_url.clone();
    }

    Some(patch)
}

pub struct StatusReconciler {
    store: Arc<dyn TaskStore>,
    providers: ProviderRegistry,
    migrator: Option<Arc<ResultMigrator>>,
    config: ReconcilerConfig,
}

impl StatusReconciler {
    pub fn new(store: Arc<dyn TaskStore>, providers: ProviderRegistry, config: ReconcilerConfig) -> Self {
        Self {
            store,
            providers,
            migrator: None,
            config,
        }
    }

    /// Hand newly completed tasks to `migrator`.
    pub fn with_migrator(mut self, migrator: Arc<ResultMigrator>) -> Self {
        self.migrator = Some(migrator);
        self
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one reconcile pass over the oldest non-terminal tasks.
    pub async fn run_pass(&self) -> TaskResult<ReconcileReport> {
        record_reconcile_pass();

        let mut report = ReconcileReport::default();
        let kinds = self.providers.kinds();
        if kinds.is_empty() {
            warn!("No providers registered, skipping reconcile pass");
            return Ok(report);
        }

        let tasks = self
            .store
            .list_reconcilable(self.config.batch_size, &kinds)
            .await?;
        debug!(count = tasks.len(), "Reconciling tasks");

        let mut provider_calls = 0usize;
        for task in &tasks {
            report.examined += 1;
            let provider = task.definition.provider;
            let task_id = task.definition.id;

            let (Some(adapter), Some(external_id)) = (
                self.providers.get(provider),
                task.status.external_task_id.as_deref(),
            ) else {
                debug!(task_id, provider = %provider, "No adapter for task, skipping");
                report.skipped += 1;
                continue;
            };

            if provider == ProviderKind::Official {
                if let Some(transition) = self.config.staleness.evaluate(&task.status, Utc::now()) {
                    self.apply_fallback(task, transition, &mut report).await;
                    continue;
                }
            }

            if provider_calls > 0 && !self.config.call_delay.is_zero() {
                tokio::time::sleep(self.config.call_delay).await;
            }
            provider_calls += 1;

            let target = PollTarget::for_definition(&task.definition, external_id);
            match adapter.poll(&target).await {
                Ok(poll) => match self.apply_poll(task, &poll, "poll").await {
                    Ok(UpdateOutcome::Updated(_)) => report.updated += 1,
                    Ok(_) => report.unchanged += 1,
                    Err(e) => {
                        error!(task_id, "Failed to write polled status: {}", e);
                        report.errors += 1;
                    }
                },
                Err(e) => {
                    if e.is_unavailable() {
                        warn!(
                            task_id,
                            external_task_id = %external_id,
                            provider = %provider,
                            "Provider unavailable, applying staleness policy: {}",
                            e
                        );
                    } else {
                        error!(
                            task_id,
                            external_task_id = %external_id,
                            provider = %provider,
                            "Provider poll failed: {}",
                            e
                        );
                    }
                    report.errors += 1;

                    match self.config.staleness.evaluate(&task.status, Utc::now()) {
                        Some(transition) => self.apply_fallback(task, transition, &mut report).await,
                        None => report.unchanged += 1,
                    }
                }
            }
        }

        if report.updated + report.fallback > 0 {
            info!(
                examined = report.examined,
                updated = report.updated,
                fallback = report.fallback,
                skipped = report.skipped,
                errors = report.errors,
                "Reconcile pass finished"
            );
        }

        Ok(report)
    }

    /// Feed a provider-pushed report through the same transition rules as a
    /// poll.
    pub async fn apply_external_update(
        &self,
        provider: ProviderKind,
        external_task_id: &str,
        poll: ProviderPoll,
    ) -> TaskResult<UpdateOutcome> {
        let task = self
            .store
            .find_by_external_id(provider, external_task_id)
            .await?
            .ok_or_else(|| {
                TaskError::not_found(format!("{} task {}", provider, external_task_id))
            })?;

        self.apply_poll(&task, &poll, "callback").await
    }

    async fn apply_poll(
        &self,
        task: &TrackedTask,
        poll: &ProviderPoll,
        source: &str,
    ) -> TaskResult<UpdateOutcome> {
        let Some(patch) = plan_update(&task.status, poll) else {
            return Ok(UpdateOutcome::Unchanged);
        };

        let provider = task.definition.provider;
        let task_id = task.definition.id;

        let Some(updated) = self.store.update_status(task.status.id, &patch).await? else {
            debug!(task_id, "Status row went terminal before write");
            return Ok(UpdateOutcome::Superseded);
        };

        if let Some(to) = patch.status {
            record_transition(provider.as_str(), source, to.as_str());
            info!(
                task_id,
                external_task_id = ?task.status.external_task_id,
                provider = %provider,
                from = %task.status.status,
                to = %to,
                source,
                "Task status updated"
            );
        }

        if patch.status == Some(GenerationStatus::Completed) {
            self.hand_off(task, &updated).await;
        }

        Ok(UpdateOutcome::Updated(updated))
    }

    async fn apply_fallback(
        &self,
        task: &TrackedTask,
        transition: StaleTransition,
        report: &mut ReconcileReport,
    ) {
        let task_id = task.definition.id;
        let to = transition.to;
        let age_hours = (Utc::now() - task.status.updated_at).num_hours();

        match self
            .store
            .update_status(task.status.id, &transition.into_patch())
            .await
        {
            Ok(Some(_)) => {
                record_transition(task.definition.provider.as_str(), "fallback", to.as_str());
                warn!(
                    task_id,
                    from = %task.status.status,
                    to = %to,
                    age_hours,
                    "Stale task moved by staleness policy"
                );
                report.fallback += 1;
            }
            Ok(None) => report.unchanged += 1,
            Err(e) => {
                error!(task_id, "Failed to write staleness transition: {}", e);
                report.errors += 1;
            }
        }
    }

    async fn hand_off(&self, task: &TrackedTask, updated: &TaskStatus) {
        let Some(migrator) = &self.migrator else {
            return;
        };
        if !updated.is_migratable() {
            return;
        }

        let tracked = TrackedTask {
            definition: task.definition.clone(),
            status: updated.clone(),
        };
        if let Err(e) = migrator.migrate_tracked(&tracked).await {
            warn!(
                task_id = task.definition.id,
                "Migration after completion failed, will retry in batch: {}",
                e
            );
        }
    }
}

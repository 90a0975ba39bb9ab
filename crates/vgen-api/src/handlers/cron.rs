//! Scheduled trigger handlers.
//!
//! These run the same work as the background loops, on demand, for
//! deployments that drive reconciliation from an external scheduler.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tracing::info;

use vgen_models::TaskId;
use vgen_tasks::{MigrationOutcome, MigrationResult, ReconcileReport, ResultMigrator};

use crate::auth::CronAuth;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Run one reconcile pass.
pub async fn reconcile_now(
    _auth: CronAuth,
    State(state): State<AppState>,
) -> ApiResult<Json<ReconcileReport>> {
    let report = state.reconciler.run_pass().await?;
    info!(?report, "Triggered reconcile pass finished");
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
pub struct MigrateResponse {
    pub migrated: usize,
    pub failed: usize,
    pub results: Vec<MigrationResult>,
}

fn migrator(state: &AppState) -> ApiResult<&ResultMigrator> {
    state
        .migrator
        .as_deref()
        .ok_or_else(|| ApiError::Unavailable("Object storage is not configured".to_string()))
}

/// Migrate every completed task still served from a provider URL.
pub async fn migrate_now(
    _auth: CronAuth,
    State(state): State<AppState>,
) -> ApiResult<Json<MigrateResponse>> {
    let results = migrator(&state)?.migrate_all_pending().await?;
    let migrated = results.iter().filter(|r| r.success).count();

    Ok(Json(MigrateResponse {
        migrated,
        failed: results.len() - migrated,
        results,
    }))
}

/// Migrate a single task.
pub async fn migrate_task(
    _auth: CronAuth,
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> ApiResult<Json<MigrationOutcome>> {
    let outcome = migrator(&state)?.migrate(task_id).await?;
    Ok(Json(outcome))
}

//! `TaskStore` over Supabase tables.
//!
//! Tables: `tasks` (definitions), `task_status`, `favorites`, `profiles`.
//! Credit deduction goes through the `deduct_credits` function.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use vgen_models::{
    GenerationStatus, MigrationStatus, NewTaskDefinition, NewTaskStatus, ProviderKind,
    StatusPatch, TaskDefinition, TaskId, TaskStatus, MIGRATION_CLAIM_TTL_SECS,
};

use crate::client::SupabaseClient;
use crate::error::{StoreError, StoreResult};
use crate::metrics::record_timeout_recovery;
use crate::query::Query;
use crate::store::{TaskStore, TaskWithStatus, TrackedTask};

pub const TASKS_TABLE: &str = "tasks";
pub const TASK_STATUS_TABLE: &str = "task_status";
pub const FAVORITES_TABLE: &str = "favorites";
pub const PROFILES_TABLE: &str = "profiles";
pub const DEDUCT_CREDITS_FN: &str = "deduct_credits";

/// Status row with its definition embedded through the `task_id` foreign key.
const STATUS_WITH_TASK: &str = "*,tasks!inner(*)";

/// Migration states a row may be claimed from, as a PostgREST `or` group.
/// Rows a migrator may claim: never attempted, failed, or holding an
/// `uploading` claim older than the claim TTL.
fn claimable_migration(now: DateTime<Utc>) -> String {
    let cutoff = now - Duration::seconds(MIGRATION_CLAIM_TTL_SECS);
    format!(
        "r2_status.is.null,r2_status.in.(pending,failed),and(r2_status.eq.uploading,updated_at.lt.{})",
        cutoff.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

const TERMINAL: &[GenerationStatus] = &[GenerationStatus::Completed, GenerationStatus::Failed];

#[derive(Debug, Deserialize)]
struct StatusRow {
    #[serde(flatten)]
    status: TaskStatus,
    tasks: TaskDefinition,
}

impl From<StatusRow> for TrackedTask {
    fn from(row: StatusRow) -> Self {
        TrackedTask {
            definition: row.tasks,
            status: row.status,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DefinitionRow {
    #[serde(flatten)]
    definition: TaskDefinition,
    #[serde(default)]
    task_status: Vec<TaskStatus>,
}

#[derive(Debug, Deserialize)]
struct CreditsRow {
    #[serde(default)]
    credits: Option<i64>,
}

fn stamped(patch: &StatusPatch) -> StoreResult<Value> {
    let mut body = serde_json::to_value(patch)?;
    if let Value::Object(map) = &mut body {
        map.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
    }
    Ok(body)
}

/// Supabase-backed task store.
#[derive(Clone)]
pub struct SupabaseTaskStore {
    client: SupabaseClient,
}

impl SupabaseTaskStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &SupabaseClient {
        &self.client
    }

    /// Look for a definition committed by an insert that timed out.
    async fn recover_definition(
        &self,
        new: &NewTaskDefinition,
        since: chrono::DateTime<Utc>,
    ) -> StoreResult<Option<TaskDefinition>> {
        let query = Query::new()
            .select("*")
            .eq("user_id", &new.user_id)
            .eq("task_type", new.task_type.as_str())
            .gte("created_at", since.to_rfc3339())
            .order("created_at", false)
            .limit(5);

        let rows: Vec<TaskDefinition> = self.client.select(TASKS_TABLE, &query).await?;
        Ok(rows
            .into_iter()
            .find(|d| d.prompt == new.prompt && d.credits == new.credits && d.provider == new.provider))
    }
}

#[async_trait]
impl TaskStore for SupabaseTaskStore {
    async fn insert_definition(&self, new: NewTaskDefinition) -> StoreResult<TaskDefinition> {
        let started = Utc::now() - Duration::seconds(5);

        match self.client.insert(TASKS_TABLE, &new).await {
            Ok(definition) => Ok(definition),
            Err(e) if e.is_statement_timeout() => {
                warn!(user_id = %new.user_id, "Definition insert timed out, re-querying");
                let found = self.recover_definition(&new, started).await?;
                record_timeout_recovery(TASKS_TABLE, found.is_some());
                match found {
                    Some(definition) => {
                        info!(task_id = definition.id, "Definition was written despite timeout");
                        Ok(definition)
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn get_definition(&self, task_id: TaskId) -> StoreResult<Option<TaskDefinition>> {
        let query = Query::new().select("*").eq("id", task_id).limit(1);
        let rows: Vec<TaskDefinition> = self.client.select(TASKS_TABLE, &query).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_definitions_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<TaskWithStatus>> {
        let query = Query::new()
            .select("*,task_status(*)")
            .eq("user_id", user_id)
            .order("created_at", false)
            .limit(limit);

        let rows: Vec<DefinitionRow> = self.client.select(TASKS_TABLE, &query).await?;
        Ok(rows
            .into_iter()
            .map(|row| TaskWithStatus {
                definition: row.definition,
                status: row.task_status.into_iter().max_by_key(|s| s.id),
            })
            .collect())
    }

    async fn rename_definition(&self, task_id: TaskId, title: &str) -> StoreResult<bool> {
        let query = Query::new().eq("id", task_id);
        let rows: Vec<Value> = self
            .client
            .update(TASKS_TABLE, &query, &json!({ "prompt": title }))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn delete_definition_cascade(&self, task_id: TaskId) -> StoreResult<()> {
        self.client
            .delete(TASK_STATUS_TABLE, &Query::new().eq("task_id", task_id))
            .await?;
        self.client
            .delete(FAVORITES_TABLE, &Query::new().eq("task_id", task_id))
            .await?;
        self.client
            .delete(TASKS_TABLE, &Query::new().eq("id", task_id))
            .await?;

        info!(task_id, "Task deleted");
        Ok(())
    }

    async fn insert_status(&self, new: NewTaskStatus) -> StoreResult<TaskStatus> {
        match self.client.insert(TASK_STATUS_TABLE, &new).await {
            Ok(status) => Ok(status),
            Err(e) if e.is_statement_timeout() => {
                warn!(task_id = new.task_id, "Status insert timed out, re-querying");
                let found = self
                    .get_status_for_task(new.task_id)
                    .await?
                    .filter(|s| s.external_task_id == new.external_task_id);
                record_timeout_recovery(TASK_STATUS_TABLE, found.is_some());
                match found {
                    Some(status) => {
                        info!(task_id = new.task_id, "Status row was written despite timeout");
                        Ok(status)
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn get_status_for_task(&self, task_id: TaskId) -> StoreResult<Option<TaskStatus>> {
        let query = Query::new()
            .select("*")
            .eq("task_id", task_id)
            .order("id", false)
            .limit(1);
        let rows: Vec<TaskStatus> = self.client.select(TASK_STATUS_TABLE, &query).await?;
        Ok(rows.into_iter().next())
    }

    async fn find_by_external_id(
        &self,
        provider: ProviderKind,
        external_task_id: &str,
    ) -> StoreResult<Option<TrackedTask>> {
        let query = Query::new()
            .select(STATUS_WITH_TASK)
            .eq("external_task_id", external_task_id)
            .eq("tasks.provider", provider.as_str())
            .limit(1);
        let rows: Vec<StatusRow> = self.client.select(TASK_STATUS_TABLE, &query).await?;
        Ok(rows.into_iter().next().map(TrackedTask::from))
    }

    async fn update_status(
        &self,
        status_id: i64,
        patch: &StatusPatch,
    ) -> StoreResult<Option<TaskStatus>> {
        let query = Query::new()
            .eq("id", status_id)
            .not_in("status", TERMINAL);
        let rows: Vec<TaskStatus> = self
            .client
            .update(TASK_STATUS_TABLE, &query, &stamped(patch)?)
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_reconcilable(
        &self,
        limit: usize,
        providers: &[ProviderKind],
    ) -> StoreResult<Vec<TrackedTask>> {
        if providers.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let query = Query::new()
            .select(STATUS_WITH_TASK)
            .in_list("status", GenerationStatus::ACTIVE)
            .not_null("external_task_id")
            .in_list("tasks.provider", providers)
            .order("updated_at", true)
            .limit(limit);

        let rows: Vec<StatusRow> = self.client.select(TASK_STATUS_TABLE, &query).await?;
        Ok(rows.into_iter().map(TrackedTask::from).collect())
    }

    async fn claim_migration(&self, status_id: i64) -> StoreResult<bool> {
        let query = Query::new()
            .eq("id", status_id)
            .eq("status", GenerationStatus::Completed)
            .or(&claimable_migration(Utc::now()));
        let rows: Vec<TaskStatus> = self
            .client
            .update(
                TASK_STATUS_TABLE,
                &query,
                &stamped(&StatusPatch::migration(MigrationStatus::Uploading))?,
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn finish_migration(&self, status_id: i64, patch: &StatusPatch) -> StoreResult<()> {
        let query = Query::new()
            .eq("id", status_id)
            .eq("r2_status", MigrationStatus::Uploading);
        let rows: Vec<TaskStatus> = self
            .client
            .update(TASK_STATUS_TABLE, &query, &stamped(patch)?)
            .await?;

        if rows.is_empty() {
            return Err(StoreError::not_found(format!(
                "status {} is not being migrated",
                status_id
            )));
        }
        Ok(())
    }

    async fn list_migratable(&self, limit: usize) -> StoreResult<Vec<TrackedTask>> {
        let query = Query::new()
            .select(STATUS_WITH_TASK)
            .eq("status", GenerationStatus::Completed)
            .not_null("result_url")
            .or(&claimable_migration(Utc::now()))
            .order("updated_at", true)
            .limit(limit);

        let rows: Vec<StatusRow> = self.client.select(TASK_STATUS_TABLE, &query).await?;
        Ok(rows.into_iter().map(TrackedTask::from).collect())
    }

    async fn get_credit_balance(&self, user_id: &str) -> StoreResult<i64> {
        let query = Query::new().select("credits").eq("id", user_id).limit(1);
        let rows: Vec<CreditsRow> = self.client.select(PROFILES_TABLE, &query).await?;
        Ok(rows.into_iter().next().and_then(|r| r.credits).unwrap_or(0))
    }

    async fn deduct_credits(&self, task_id: TaskId, amount: i32) -> StoreResult<()> {
        self.client
            .rpc(
                DEDUCT_CREDITS_FN,
                &json!({ "p_task_id": task_id, "p_amount": amount }),
            )
            .await?;
        Ok(())
    }

    async fn add_favorite(&self, user_id: &str, task_id: TaskId) -> StoreResult<()> {
        let row = json!({ "user_id": user_id, "task_id": task_id });
        match self.client.insert::<_, Value>(FAVORITES_TABLE, &row).await {
            Ok(_) | Err(StoreError::Conflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn remove_favorite(&self, user_id: &str, task_id: TaskId) -> StoreResult<()> {
        let query = Query::new().eq("user_id", user_id).eq("task_id", task_id);
        self.client.delete(FAVORITES_TABLE, &query).await
    }

    async fn health_check(&self) -> bool {
        self.client.health_check().await
    }
}

//! Task status rows and the generation/migration state machines.
//!
//! A status row tracks one dispatched generation: the provider's own task id,
//! the unified lifecycle state, result locations, and the independent state of
//! copying results into owned storage.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::task::TaskId;

/// Unified generation state shared by every provider.
///
/// Moves forward only: `pending -> queued -> processing -> {completed | failed}`.
/// Steps may be skipped (a provider can report completion on the first poll)
/// but never reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    /// Dispatched, no provider status seen yet
    #[default]
    Pending,
    /// Provider accepted the job but has not started it
    Queued,
    /// Provider is generating
    Processing,
    /// Result available
    Completed,
    /// Provider reported failure, or the task was declared stuck
    Failed,
}

impl GenerationStatus {
    /// Statuses a reconciliation pass still has to look at.
    pub const ACTIVE: &'static [GenerationStatus] = &[
        GenerationStatus::Pending,
        GenerationStatus::Queued,
        GenerationStatus::Processing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::Queued => "queued",
            GenerationStatus::Processing => "processing",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            GenerationStatus::Pending => 0,
            GenerationStatus::Queued => 1,
            GenerationStatus::Processing => 2,
            GenerationStatus::Completed | GenerationStatus::Failed => 3,
        }
    }

    /// Whether moving from `self` to `next` follows the state machine.
    pub fn can_transition_to(&self, next: GenerationStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State of copying a finished result into owned object storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    /// Claimed by a migrator; nobody else may start an upload
    Uploading,
    Completed,
    /// Last attempt failed; the provider URL is still in place and a later
    /// batch pass retries
    Failed,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Uploading => "uploading",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
        }
    }

    /// Whether a row in this migration state may be claimed for upload.
    /// A missing value counts as never attempted.
    pub fn is_claimable(status: Option<MigrationStatus>) -> bool {
        matches!(
            status,
            None | Some(MigrationStatus::Pending) | Some(MigrationStatus::Failed)
        )
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How long an `uploading` claim holds before another migrator may take it.
pub const MIGRATION_CLAIM_TTL_SECS: i64 = 30 * 60;

/// Mutable execution record (`task_status` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskStatus {
    pub id: i64,
    pub task_id: TaskId,
    /// Provider task id; set once when dispatch succeeds and never changed
    #[serde(default)]
    pub external_task_id: Option<String>,
    pub status: GenerationStatus,
    #[serde(default)]
    pub result_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub r2_status: Option<MigrationStatus>,
    pub created_at: DateTime<Utc>,
    /// Refreshed on every write; all staleness checks use it
    pub updated_at: DateTime<Utc>,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the result is ready to be copied into owned storage.
    pub fn is_migratable(&self) -> bool {
        self.is_migratable_at(Utc::now())
    }

    pub fn is_migratable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == GenerationStatus::Completed
            && self.result_url.is_some()
            && self.migration_claimable_at(now)
    }

    /// Whether a migrator may claim this row now. An `uploading` claim older
    /// than [`MIGRATION_CLAIM_TTL_SECS`] belongs to a migrator that never
    /// finished and may be taken over.
    pub fn migration_claimable_at(&self, now: DateTime<Utc>) -> bool {
        MigrationStatus::is_claimable(self.r2_status) || self.is_claim_expired(now)
    }

    pub fn is_claim_expired(&self, now: DateTime<Utc>) -> bool {
        self.r2_status == Some(MigrationStatus::Uploading)
            && now - self.updated_at > Duration::seconds(MIGRATION_CLAIM_TTL_SECS)
    }

    /// Apply a patch in memory, bumping `updated_at`.
    pub fn apply(&mut self, patch: &StatusPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(url) = &patch.result_url {
            self.result_url = Some(url.clone());
        }
        if let Some(url) = &patch.thumbnail_url {
            self.thumbnail_url = Some(url.clone());
        }
        if let Some(msg) = &patch.error_message {
            self.error_message = Some(msg.clone());
        }
        if let Some(r2) = patch.r2_status {
            self.r2_status = Some(r2);
        }
        self.updated_at = now;
    }
}

/// Insert payload for a status row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTaskStatus {
    pub task_id: TaskId,
    pub external_task_id: Option<String>,
    pub status: GenerationStatus,
}

/// Partial update of a status row. Unset fields are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatusPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<GenerationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r2_status: Option<MigrationStatus>,
}

impl StatusPatch {
    pub fn status(status: GenerationStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn migration(r2_status: MigrationStatus) -> Self {
        Self {
            r2_status: Some(r2_status),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.result_url.is_none()
            && self.thumbnail_url.is_none()
            && self.error_message.is_none()
            && self.r2_status.is_none()
    }
}

/// A forced transition produced by the staleness policy.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleTransition {
    pub to: GenerationStatus,
    pub error_message: Option<String>,
}

impl StaleTransition {
    pub fn into_patch(self) -> StatusPatch {
        StatusPatch {
            status: Some(self.to),
            error_message: self.error_message,
            ..Default::default()
        }
    }
}

/// Time thresholds for inferring state when a provider cannot be asked.
///
/// Providers do not reliably report terminal states, so a task that has sat
/// in `processing` too long is declared failed, and one that has sat in
/// `queued` too long is assumed to have started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    pub processing_timeout: Duration,
    pub queued_timeout: Duration,
}

/// Error message written when a task is failed by the staleness policy.
pub const STUCK_TASK_MESSAGE: &str =
    "Task timed out: no progress reported for over 24 hours, likely stuck at the provider";

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            processing_timeout: Duration::hours(24),
            queued_timeout: Duration::hours(6),
        }
    }
}

impl StalenessPolicy {
    /// Decide whether `status` should be forced forward at `now`.
    pub fn evaluate(&self, status: &TaskStatus, now: DateTime<Utc>) -> Option<StaleTransition> {
        let age = now - status.updated_at;
        match status.status {
            GenerationStatus::Processing if age > self.processing_timeout => Some(StaleTransition {
                to: GenerationStatus::Failed,
                error_message: Some(STUCK_TASK_MESSAGE.to_string()),
            }),
            GenerationStatus::Queued if age > self.queued_timeout => Some(StaleTransition {
                to: GenerationStatus::Processing,
                error_message: None,
            }),
            _ => None,
        }
    }
}

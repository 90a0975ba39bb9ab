//! Shared data models for the VGen backend.
//!
//! This crate provides Serde-serializable types for:
//! - Task definitions (immutable generation intent)
//! - Task status rows and the unified generation state machine
//! - Result migration state
//! - Credit tiers
//! - Task submission parameters and their validation

pub mod credit_cost;
pub mod request;
pub mod task;
pub mod task_status;

// Re-export common types
pub use credit_cost::credits_for;
pub use request::{CreateTaskParams, InputImage, TaskValidationError};
pub use task::{
    AdditionalParams, AspectRatio, NewTaskDefinition, ProviderKind, TaskDefinition, TaskId,
    TaskType, VideoDuration, DEFAULT_MODEL,
};
pub use task_status::{
    GenerationStatus, MigrationStatus, NewTaskStatus, StaleTransition, StalenessPolicy,
    StatusPatch, TaskStatus, MIGRATION_CLAIM_TTL_SECS, STUCK_TASK_MESSAGE,
};

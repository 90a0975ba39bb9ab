//! Task persistence backed by Supabase.
//!
//! This crate provides:
//! - `SupabaseClient`: PostgREST table access and RPC calls with retry,
//!   tracing spans and request metrics
//! - The `TaskStore` seam used by the task services
//! - `SupabaseTaskStore`: statement-timeout recovery, guarded status writes,
//!   migration claims and cascade deletes
//! - `MemoryTaskStore`: in-process store for tests and local runs

pub mod client;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod query;
pub mod retry;
pub mod store;
pub mod supabase;

pub use client::{SupabaseClient, SupabaseConfig};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryTaskStore;
pub use query::Query;
pub use retry::RetryConfig;
pub use store::{TaskStore, TaskWithStatus, TrackedTask};
pub use supabase::SupabaseTaskStore;

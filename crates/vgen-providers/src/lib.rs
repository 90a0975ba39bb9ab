//! Video generation provider adapters.
//!
//! This crate provides:
//! - The `ProviderAdapter` seam (`submit` / `poll`)
//! - `OfficialProvider`: direct Kling API with signed short-lived tokens
//! - `AggregatorProvider`: 302.ai proxy with a static bearer key
//! - Endpoint lookup tables per task type, quality, and duration
//! - Provider task id extraction and status translation
//! - `ProviderRegistry` for routing by stored provider tag

pub mod adapter;
pub mod aggregator;
pub mod error;
pub mod extract;
pub mod metrics;
pub mod official;
pub mod token;
pub mod types;

pub use adapter::{ProviderAdapter, ProviderRegistry};
pub use aggregator::{AggregatorConfig, AggregatorProvider};
pub use error::{ProviderError, ProviderResult};
pub use extract::extract_task_id;
pub use official::{OfficialConfig, OfficialProvider, OfficialTask};
pub use types::{GenerationRequest, PollTarget, ProviderPoll};

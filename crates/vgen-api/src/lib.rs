//! Axum HTTP API server.
//!
//! This crate provides:
//! - Task creation, listing, rename, favorites and delete for signed-in users
//! - Supabase session token verification
//! - Cron-triggered reconcile and migrate passes, plus optional in-process timers
//! - Provider callback intake
//! - Rate limiting, security headers and Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::BackgroundScheduler;
pub use state::AppState;

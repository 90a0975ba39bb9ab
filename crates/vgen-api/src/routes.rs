//! API routes.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, patch, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{
    add_favorite, create_task, delete_task, get_task, health, list_tasks, migrate_now,
    migrate_task, official_callback, ready, reconcile_now, remove_favorite, rename_task,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
    RateLimiterCache,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let task_routes = Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/:task_id", get(get_task).delete(delete_task))
        .route("/tasks/:task_id/title", patch(rename_task))
        .route(
            "/tasks/:task_id/favorite",
            post(add_favorite).delete(remove_favorite),
        );

    let cron_routes = Router::new()
        .route("/cron/reconcile", post(reconcile_now))
        .route("/cron/migrate", post(migrate_now))
        .route("/cron/migrate/:task_id", post(migrate_task));

    let callback_routes = Router::new().route("/callbacks/official", post(official_callback));

    let rate_limiter = Arc::new(RateLimiterCache::new(state.config.rate_limit_rps));

    let api_routes = Router::new()
        .merge(task_routes)
        .merge(cron_routes)
        .merge(callback_routes)
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let metrics_routes = match metrics_handle {
        Some(handle) => Router::new().route("/metrics", get(move || async move { handle.render() })),
        None => Router::new(),
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

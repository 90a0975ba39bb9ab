//! Health check handlers.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use vgen_models::ProviderKind;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
    pub providers: Vec<ProviderKind>,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub database: CheckStatus,
    pub storage: CheckStatus,
    pub providers: CheckStatus,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckStatus {
    fn ok(latency_ms: Option<u64>) -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
            latency_ms,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(msg.into()),
            latency_ms: None,
        }
    }

    fn disabled() -> Self {
        Self {
            status: "disabled".to_string(),
            error: None,
            latency_ms: None,
        }
    }

    fn is_healthy(&self) -> bool {
        self.status != "error"
    }
}

/// Readiness check endpoint (readiness probe).
///
/// Unconfigured object storage is reported but does not fail readiness:
/// results are then served from provider URLs.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let database = {
        let start = Instant::now();
        if state.store.health_check().await {
            CheckStatus::ok(Some(start.elapsed().as_millis() as u64))
        } else {
            CheckStatus::error("database unreachable")
        }
    };

    let storage = match &state.objects {
        Some(objects) => {
            let start = Instant::now();
            if objects.health_check().await {
                CheckStatus::ok(Some(start.elapsed().as_millis() as u64))
            } else {
                CheckStatus::error("bucket unreachable")
            }
        }
        None => CheckStatus::disabled(),
    };

    let providers = if state.providers.is_empty() {
        CheckStatus::error("no providers configured")
    } else {
        CheckStatus::ok(None)
    };

    let all_ok = database.is_healthy() && storage.is_healthy() && providers.is_healthy();

    let response = ReadinessResponse {
        status: if all_ok { "ready" } else { "degraded" }.to_string(),
        checks: ReadinessChecks {
            database,
            storage,
            providers,
        },
        providers: state.providers.kinds(),
    };

    if all_ok {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

//! Provider push notifications.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vgen_models::ProviderKind;
use vgen_providers::OfficialTask;
use vgen_tasks::UpdateOutcome;

use crate::auth::constant_time_eq;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub received: bool,
    pub updated: bool,
}

/// Status report pushed by the official API to the configured callback URL.
///
/// When `CALLBACK_SECRET` is set the URL must carry it as `?token=`.
pub async fn official_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    Json(task): Json<OfficialTask>,
) -> ApiResult<Json<CallbackResponse>> {
    if let Some(secret) = state.config.callback_secret.as_deref() {
        let presented = query.token.as_deref().unwrap_or_default();
        if !constant_time_eq(presented.as_bytes(), secret.as_bytes()) {
            warn!(external_task_id = %task.task_id, "Callback rejected: bad token");
            return Err(ApiError::unauthorized("Invalid callback token"));
        }
    }

    let poll = task
        .to_poll()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let outcome = state
        .reconciler
        .apply_external_update(ProviderKind::Official, &task.task_id, poll)
        .await?;

    debug!(external_task_id = %task.task_id, ?outcome, "Callback applied");
    Ok(Json(CallbackResponse {
        received: true,
        updated: matches!(outcome, UpdateOutcome::Updated(_)),
    }))
}

//! Task API handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use vgen_models::{
    AspectRatio, CreateTaskParams, GenerationStatus, InputImage, MigrationStatus, ProviderKind,
    TaskDefinition, TaskId, TaskStatus, TaskType, VideoDuration,
};
use vgen_tasks::SubmitOutcome;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Maximum title length.
pub const MAX_TITLE_LENGTH: usize = 500;

// ============================================================================
// Create
// ============================================================================

/// Base64 image upload, optionally as a `data:` URL.
#[derive(Debug, Deserialize)]
pub struct ImagePayload {
    pub data: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl ImagePayload {
    fn decode(&self) -> ApiResult<InputImage> {
        let (content_type, encoded) = match self.data.strip_prefix("data:") {
            Some(rest) => {
                let (meta, payload) = rest
                    .split_once(',')
                    .ok_or_else(|| ApiError::bad_request("Malformed image data URL"))?;
                let mime = meta.trim_end_matches(";base64").to_string();
                (Some(mime), payload)
            }
            None => (None, self.data.as_str()),
        };

        let data = BASE64
            .decode(encoded.trim())
            .map_err(|e| ApiError::bad_request(format!("Image is not valid base64: {}", e)))?;

        let content_type = self
            .content_type
            .clone()
            .or(content_type)
            .unwrap_or_else(|| "image/png".to_string());
        if !content_type.starts_with("image/") {
            return Err(ApiError::bad_request(format!(
                "Unsupported image type: {}",
                content_type
            )));
        }

        Ok(InputImage::new(data, content_type))
    }
}

/// Create task request.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub task_type: TaskType,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub high_quality: bool,
    /// "5" or "10"
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    /// "1:1", "16:9" or "9:16"
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub cfg: Option<f64>,
    #[serde(default)]
    pub camera_control: Option<serde_json::Value>,
    #[serde(default)]
    pub image: Option<ImagePayload>,
    #[serde(default)]
    pub image_tail: Option<ImagePayload>,
}

impl CreateTaskRequest {
    pub fn into_params(self) -> ApiResult<CreateTaskParams> {
        let duration = match self.duration.as_deref() {
            Some(d) => d.parse::<VideoDuration>().map_err(ApiError::bad_request)?,
            None => VideoDuration::default(),
        };
        let aspect_ratio = match self.aspect_ratio.as_deref() {
            Some(r) => r.parse::<AspectRatio>().map_err(ApiError::bad_request)?,
            None => AspectRatio::default(),
        };

        Ok(CreateTaskParams {
            task_type: self.task_type,
            model: self.model,
            high_quality: self.high_quality,
            duration,
            prompt: self.prompt,
            negative_prompt: self.negative_prompt,
            aspect_ratio,
            cfg: self.cfg.unwrap_or(0.5),
            camera_control: self.camera_control,
            start_image: self.image.as_ref().map(ImagePayload::decode).transpose()?,
            end_image: self.image_tail.as_ref().map(ImagePayload::decode).transpose()?,
        })
    }
}

/// Create task response.
#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub task_id: TaskId,
    pub external_task_id: String,
    pub status: GenerationStatus,
    pub credits: i32,
    pub provider: ProviderKind,
}

impl From<SubmitOutcome> for CreateTaskResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        Self {
            task_id: outcome.task_id,
            external_task_id: outcome.external_task_id,
            status: outcome.status,
            credits: outcome.credits,
            provider: outcome.provider,
        }
    }
}

/// Start a generation task.
pub async fn create_task(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<CreateTaskResponse>)> {
    let params = request.into_params()?;
    let outcome = state.submitter.submit(&user.uid, params).await?;

    Ok((StatusCode::CREATED, Json(outcome.into())))
}

// ============================================================================
// Read
// ============================================================================

/// A task definition with its latest status snapshot.
#[derive(Debug, Serialize)]
pub struct TaskView {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub model: String,
    /// Generation prompt, or the title after a rename
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub aspect_ratio: AspectRatio,
    pub high_quality: bool,
    pub duration: VideoDuration,
    pub credits: i32,
    pub provider: ProviderKind,
    pub created_at: DateTime<Utc>,
    /// Absent when dispatch never produced a status row
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskView {
    pub fn new(definition: TaskDefinition, status: Option<TaskStatus>) -> Self {
        let duration = definition.duration();
        let mut view = Self {
            task_id: definition.id,
            task_type: definition.task_type,
            model: definition.model,
            prompt: definition.prompt,
            aspect_ratio: definition.aspect_ratio,
            high_quality: definition.high_quality,
            duration,
            credits: definition.credits,
            provider: definition.provider,
            created_at: definition.created_at,
            status: None,
            result_url: None,
            thumbnail_url: None,
            error_message: None,
            r2_status: None,
            updated_at: None,
        };

        if let Some(row) = status {
            view.status = Some(row.status);
            view.result_url = row.result_url;
            view.thumbnail_url = row.thumbnail_url;
            view.error_message = row.error_message;
            view.r2_status = row.r2_status;
            view.updated_at = Some(row.updated_at);
        }
        view
    }
}

/// Load a definition the caller owns. Someone else's task looks missing.
async fn owned_definition(
    state: &AppState,
    user: &AuthUser,
    task_id: TaskId,
) -> ApiResult<TaskDefinition> {
    state
        .store
        .get_definition(task_id)
        .await?
        .filter(|d| d.is_owned_by(&user.uid))
        .ok_or_else(|| ApiError::not_found("Task not found"))
}

/// List the caller's tasks, newest first.
pub async fn list_tasks(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<TaskView>>> {
    let tasks = state
        .store
        .list_definitions_for_user(&user.uid, state.config.list_limit)
        .await?;

    Ok(Json(
        tasks
            .into_iter()
            .map(|t| TaskView::new(t.definition, t.status))
            .collect(),
    ))
}

/// Status snapshot for one task.
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
    user: AuthUser,
) -> ApiResult<Json<TaskView>> {
    let definition = owned_definition(&state, &user, task_id).await?;
    let status = state.store.get_status_for_task(task_id).await?;
    Ok(Json(TaskView::new(definition, status)))
}

// ============================================================================
// Update / delete
// ============================================================================

#[derive(Debug, Serialize)]
pub struct TaskActionResponse {
    pub success: bool,
    pub task_id: TaskId,
}

/// Delete a task with its status rows and favorites.
pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
    user: AuthUser,
) -> ApiResult<Json<TaskActionResponse>> {
    owned_definition(&state, &user, task_id).await?;
    state.store.delete_definition_cascade(task_id).await?;

    info!(task_id, user_id = %user.uid, "Deleted task");
    Ok(Json(TaskActionResponse {
        success: true,
        task_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RenameTaskRequest {
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct RenameTaskResponse {
    pub success: bool,
    pub task_id: TaskId,
    pub title: String,
}

/// Give a task a display title. The title replaces the stored prompt.
pub async fn rename_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
    user: AuthUser,
    Json(request): Json<RenameTaskRequest>,
) -> ApiResult<Json<RenameTaskResponse>> {
    let title: String = request
        .title
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .collect();
    if title.is_empty() {
        return Err(ApiError::bad_request("Title cannot be empty"));
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(ApiError::bad_request("Title too long (max 500 characters)"));
    }

    owned_definition(&state, &user, task_id).await?;
    if !state.store.rename_definition(task_id, &title).await? {
        return Err(ApiError::not_found("Task not found"));
    }

    info!(task_id, user_id = %user.uid, "Renamed task");
    Ok(Json(RenameTaskResponse {
        success: true,
        task_id,
        title,
    }))
}

pub async fn add_favorite(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
    user: AuthUser,
) -> ApiResult<Json<TaskActionResponse>> {
    owned_definition(&state, &user, task_id).await?;
    state.store.add_favorite(&user.uid, task_id).await?;
    Ok(Json(TaskActionResponse {
        success: true,
        task_id,
    }))
}

pub async fn remove_favorite(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
    user: AuthUser,
) -> ApiResult<Json<TaskActionResponse>> {
    owned_definition(&state, &user, task_id).await?;
    state.store.remove_favorite(&user.uid, task_id).await?;
    Ok(Json(TaskActionResponse {
        success: true,
        task_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: serde_json::Value) -> CreateTaskRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_request_defaults() {
        let params = request(serde_json::json!({
            "task_type": "text-to-video",
            "prompt": "a cat"
        }))
        .into_params()
        .unwrap();

        assert_eq!(params.duration, VideoDuration::Five);
        assert_eq!(params.aspect_ratio, AspectRatio::Widescreen);
        assert_eq!(params.cfg, 0.5);
        assert_eq!(params.credits(), 1);
    }

    #[test]
    fn test_malformed_aspect_ratio_rejected() {
        let err = request(serde_json::json!({
            "task_type": "text-to-video",
            "prompt": "a cat",
            "aspect_ratio": "4:3"
        }))
        .into_params()
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_data_url_image_decodes() {
        let params = request(serde_json::json!({
            "task_type": "image-to-video",
            "prompt": "a cat",
            "duration": "10",
            "image": { "data": format!("data:image/jpeg;base64,{}", BASE64.encode([1u8, 2, 3])) }
        }))
        .into_params()
        .unwrap();

        let image = params.start_image.unwrap();
        assert_eq!(image.data, vec![1, 2, 3]);
        assert_eq!(image.content_type, "image/jpeg");
        assert_eq!(params.duration, VideoDuration::Ten);
    }

    #[test]
    fn test_bad_image_payloads() {
        let not_base64 = ImagePayload {
            data: "!!!".into(),
            content_type: None,
        };
        assert!(not_base64.decode().is_err());

        let not_image = ImagePayload {
            data: BASE64.encode(b"%PDF"),
            content_type: Some("application/pdf".into()),
        };
        assert!(not_image.decode().is_err());
    }
}

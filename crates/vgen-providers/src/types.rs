//! Request and response types shared by all adapters.

use vgen_models::{
    AspectRatio, CreateTaskParams, GenerationStatus, InputImage, TaskDefinition, TaskType,
    VideoDuration,
};

/// A provider-neutral generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub task_type: TaskType,
    pub model: String,
    pub high_quality: bool,
    pub duration: VideoDuration,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub aspect_ratio: AspectRatio,
    pub cfg: f64,
    pub camera_control: Option<serde_json::Value>,
    pub start_image: Option<InputImage>,
    pub end_image: Option<InputImage>,
}

impl GenerationRequest {
    /// Build from validated submission parameters.
    pub fn from_params(params: &CreateTaskParams) -> Self {
        Self {
            task_type: params.task_type,
            model: params.model_name().to_string(),
            high_quality: params.high_quality,
            duration: params.duration,
            prompt: params.prompt_text().unwrap_or_default().to_string(),
            negative_prompt: params.negative_prompt_text().map(str::to_string),
            aspect_ratio: params.aspect_ratio,
            cfg: params.cfg,
            camera_control: params.camera_control.clone(),
            start_image: params.start_image.clone(),
            end_image: params.end_image.clone(),
        }
    }
}

/// What an adapter needs to look a task up again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub external_task_id: String,
    pub task_type: TaskType,
}

impl PollTarget {
    pub fn new(external_task_id: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            external_task_id: external_task_id.into(),
            task_type,
        }
    }

    pub fn for_definition(definition: &TaskDefinition, external_task_id: &str) -> Self {
        Self::new(external_task_id, definition.task_type)
    }
}

/// A provider status report translated into the unified vocabulary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProviderPoll {
    pub status: GenerationStatus,
    pub result_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error_message: Option<String>,
}

impl ProviderPoll {
    pub fn with_status(status: GenerationStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}

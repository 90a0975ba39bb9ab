//! Task submission parameters.

use thiserror::Error;
use validator::Validate;

use crate::credit_cost::credits_for;
use crate::task::{AspectRatio, TaskType, VideoDuration, DEFAULT_MODEL};

/// Maximum prompt length accepted by both providers.
pub const MAX_PROMPT_LENGTH: u64 = 2500;

/// Raw input image supplied for image-to-video generation.
#[derive(Clone, PartialEq)]
pub struct InputImage {
    pub data: Vec<u8>,
    pub content_type: String,
}

impl InputImage {
    pub fn new(data: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            data,
            content_type: content_type.into(),
        }
    }

    /// File extension matching the content type.
    pub fn extension(&self) -> &'static str {
        match self.content_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            _ => "png",
        }
    }

    pub fn file_name(&self) -> String {
        format!("input.{}", self.extension())
    }
}

impl std::fmt::Debug for InputImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputImage")
            .field("bytes", &self.data.len())
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// Validation failures for a submission. All are rejected before anything is
/// persisted.
#[derive(Debug, Error, PartialEq)]
pub enum TaskValidationError {
    #[error("Prompt is required")]
    MissingPrompt,

    #[error("An input image is required for image-to-video generation")]
    MissingInputImage,

    #[error("{0}")]
    Invalid(String),
}

/// Everything a caller supplies to start a generation.
#[derive(Debug, Clone, Validate)]
pub struct CreateTaskParams {
    pub task_type: TaskType,
    pub model: Option<String>,
    pub high_quality: bool,
    pub duration: VideoDuration,

    #[validate(length(max = 2500, message = "Prompt too long (max 2500 characters)"))]
    pub prompt: Option<String>,

    #[validate(length(max = 2500, message = "Negative prompt too long (max 2500 characters)"))]
    pub negative_prompt: Option<String>,

    pub aspect_ratio: AspectRatio,

    #[validate(range(min = 0.0, max = 1.0, message = "cfg must be between 0 and 1"))]
    pub cfg: f64,

    pub camera_control: Option<serde_json::Value>,

    pub start_image: Option<InputImage>,
    pub end_image: Option<InputImage>,
}

impl CreateTaskParams {
    /// Text-to-video parameters with default tiers.
    pub fn text_to_video(prompt: impl Into<String>) -> Self {
        Self {
            task_type: TaskType::TextToVideo,
            model: None,
            high_quality: false,
            duration: VideoDuration::Five,
            prompt: Some(prompt.into()),
            negative_prompt: None,
            aspect_ratio: AspectRatio::default(),
            cfg: 0.5,
            camera_control: None,
            start_image: None,
            end_image: None,
        }
    }

    /// Image-to-video parameters with default tiers.
    pub fn image_to_video(prompt: impl Into<String>, image: InputImage) -> Self {
        Self {
            task_type: TaskType::ImageToVideo,
            start_image: Some(image),
            ..Self::text_to_video(prompt)
        }
    }

    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(DEFAULT_MODEL)
    }

    /// Trimmed prompt, if any.
    pub fn prompt_text(&self) -> Option<&str> {
        self.prompt.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }

    pub fn negative_prompt_text(&self) -> Option<&str> {
        self.negative_prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    /// Credits this request will cost.
    pub fn credits(&self) -> i32 {
        credits_for(self.task_type, self.high_quality, self.duration)
    }

    /// Check required fields for the task type and field domains.
    pub fn check(&self) -> Result<(), TaskValidationError> {
        if self.prompt_text().is_none() {
            return Err(TaskValidationError::MissingPrompt);
        }

        if !self.cfg.is_finite() {
            return Err(TaskValidationError::Invalid(
                "cfg must be between 0 and 1".to_string(),
            ));
        }

        self.validate()
            .map_err(|e| TaskValidationError::Invalid(e.to_string()))?;

        if self.task_type == TaskType::ImageToVideo {
            match &self.start_image {
                Some(image) if !image.data.is_empty() => {}
                _ => return Err(TaskValidationError::MissingInputImage),
            }
        }

        Ok(())
    }
}

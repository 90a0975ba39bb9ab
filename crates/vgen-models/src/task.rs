//! Task definition models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Store-assigned task definition identifier.
pub type TaskId = i64;

/// Model family used when the caller does not pick one.
pub const DEFAULT_MODEL: &str = "kling-v1";

/// Kind of generation requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum TaskType {
    #[serde(rename = "text-to-video")]
    TextToVideo,
    #[serde(rename = "image-to-video")]
    ImageToVideo,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::TextToVideo => "text-to-video",
            TaskType::ImageToVideo => "image-to-video",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text-to-video" | "text2video" => Ok(TaskType::TextToVideo),
            "image-to-video" | "image2video" => Ok(TaskType::ImageToVideo),
            _ => Err(format!("Unknown task type: {}", s)),
        }
    }
}

/// Output frame shape. Only the three shapes the providers accept are modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[default]
    #[serde(rename = "16:9")]
    Widescreen,
    #[serde(rename = "9:16")]
    Portrait,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Widescreen => "16:9",
            AspectRatio::Portrait => "9:16",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1:1" => Ok(AspectRatio::Square),
            "16:9" => Ok(AspectRatio::Widescreen),
            "9:16" => Ok(AspectRatio::Portrait),
            other => Err(format!(
                "Invalid aspect ratio: {}, expected one of 1:1, 16:9, 9:16",
                other
            )),
        }
    }
}

/// Clip length tier. Serialized as the provider's duration string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum VideoDuration {
    #[default]
    #[serde(rename = "5")]
    Five,
    #[serde(rename = "10")]
    Ten,
}

impl VideoDuration {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoDuration::Five => "5",
            VideoDuration::Ten => "10",
        }
    }

    pub fn seconds(&self) -> u32 {
        match self {
            VideoDuration::Five => 5,
            VideoDuration::Ten => 10,
        }
    }
}

impl fmt::Display for VideoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VideoDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_end_matches('s') {
            "5" => Ok(VideoDuration::Five),
            "10" => Ok(VideoDuration::Ten),
            other => Err(format!("Invalid duration: {}, expected 5 or 10", other)),
        }
    }
}

/// Which external backend a task was dispatched to.
///
/// Stored on the task definition at creation time so polling never has to
/// guess the provider from URL fragments. Values written by older or foreign
/// deployments deserialize to [`ProviderKind::Unknown`] and are skipped by the
/// reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Direct Kling API, signed short-lived token.
    Official,
    /// 302.ai proxy, static bearer key.
    Aggregator,
    #[serde(other)]
    Unknown,
}

impl ProviderKind {
    /// Providers the backend knows how to talk to.
    pub const SUPPORTED: &'static [ProviderKind] = &[ProviderKind::Official, ProviderKind::Aggregator];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Official => "official",
            ProviderKind::Aggregator => "aggregator",
            ProviderKind::Unknown => "unknown",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, ProviderKind::Unknown)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "official" | "kling" => Ok(ProviderKind::Official),
            "aggregator" | "302" | "302ai" => Ok(ProviderKind::Aggregator),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// Provider-specific metadata that is not normalized into columns.
///
/// Known keys are typed; anything else a provider needs survives in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct AdditionalParams {
    /// Requested clip length
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<VideoDuration>,

    /// Base URL of the provider API the task was dispatched to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,

    /// Camera movement settings forwarded verbatim (text-to-video only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_control: Option<serde_json::Value>,

    #[serde(flatten)]
    #[schemars(skip)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AdditionalParams {
    /// Duration, falling back to the 5 second tier.
    pub fn duration_or_default(&self) -> VideoDuration {
        self.duration.unwrap_or_default()
    }
}

/// Immutable record of a requested generation job (`tasks` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskDefinition {
    pub id: TaskId,
    pub user_id: String,
    pub task_type: TaskType,
    pub model: String,
    #[serde(default)]
    pub high_quality: bool,

    /// Generation prompt. A rename overwrites this with a display title.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,

    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    pub cfg: f64,

    /// Credits charged, fixed at creation
    pub credits: i32,

    #[serde(default)]
    pub start_img_path: Option<String>,
    #[serde(default)]
    pub end_img_path: Option<String>,

    pub provider: ProviderKind,

    #[serde(default)]
    pub additional_params: AdditionalParams,

    pub created_at: DateTime<Utc>,
}

impl TaskDefinition {
    pub fn duration(&self) -> VideoDuration {
        self.additional_params.duration_or_default()
    }

    /// Whether `user_id` owns this task.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// Insert payload for a task definition (id and created_at come from the store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTaskDefinition {
    pub user_id: String,
    pub task_type: TaskType,
    pub model: String,
    pub high_quality: bool,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub aspect_ratio: AspectRatio,
    pub cfg: f64,
    pub credits: i32,
    pub start_img_path: Option<String>,
    pub end_img_path: Option<String>,
    pub provider: ProviderKind,
    pub additional_params: AdditionalParams,
}

impl NewTaskDefinition {
    /// Materialize a stored row from this payload.
    pub fn into_definition(self, id: TaskId, created_at: DateTime<Utc>) -> TaskDefinition {
        TaskDefinition {
            id,
            user_id: self.user_id,
            task_type: self.task_type,
            model: self.model,
            high_quality: self.high_quality,
            prompt: self.prompt,
            negative_prompt: self.negative_prompt,
            aspect_ratio: self.aspect_ratio,
            cfg: self.cfg,
            credits: self.credits,
            start_img_path: self.start_img_path,
            end_img_path: self.end_img_path,
            provider: self.provider,
            additional_params: self.additional_params,
            created_at,
        }
    }
}

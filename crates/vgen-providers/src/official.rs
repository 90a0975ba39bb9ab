//! Direct Kling API adapter.
//!
//! Authenticates with a short-lived HS256 token signed from the access/secret
//! key pair. The API has no single-task lookup, so polling pages through the
//! task listing and scans for the id.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info_span, warn, Instrument};
use vgen_models::{GenerationStatus, ProviderKind, TaskType};

use crate::adapter::ProviderAdapter;
use crate::error::{ProviderError, ProviderResult};
use crate::extract::extract_task_id;
use crate::metrics::record_call;
use crate::token::ApiTokenCache;
use crate::types::{GenerationRequest, PollTarget, ProviderPoll};

pub const DEFAULT_OFFICIAL_API_BASE: &str = "https://api.klingai.com";

/// Tasks per listing page.
pub const LIST_PAGE_SIZE: u32 = 100;

/// Configuration for the direct API.
#[derive(Debug, Clone)]
pub struct OfficialConfig {
    pub access_key: String,
    pub secret_key: String,
    pub base_url: String,
    pub timeout: Duration,
    /// Listing pages scanned per poll before giving up on an id
    pub max_poll_pages: u32,
}

impl OfficialConfig {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            base_url: DEFAULT_OFFICIAL_API_BASE.to_string(),
            timeout: Duration::from_secs(30),
            max_poll_pages: 5,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Load from `KLING_ACCESS_KEY`, `KLING_SECRET_KEY` and `KLING_API_BASE`.
    /// Returns `None` when either key is missing.
    pub fn from_env() -> Option<Self> {
        let access_key = std::env::var("KLING_ACCESS_KEY").ok().filter(|v| !v.is_empty())?;
        let secret_key = std::env::var("KLING_SECRET_KEY").ok().filter(|v| !v.is_empty())?;

        let mut config = Self::new(access_key, secret_key);
        if let Ok(base) = std::env::var("KLING_API_BASE") {
            config = config.with_base_url(base);
        }
        if let Some(secs) = std::env::var("PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(pages) = std::env::var("KLING_MAX_POLL_PAGES")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.max_poll_pages = pages;
        }
        Some(config)
    }
}

/// Endpoint path for a task type. Quality and duration travel in the body.
pub fn endpoint_path(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::TextToVideo => "/v1/videos/text2video",
        TaskType::ImageToVideo => "/v1/videos/image2video",
    }
}

/// Translate a provider status string.
pub fn map_status(status: &str) -> ProviderResult<GenerationStatus> {
    match status {
        "succeed" => Ok(GenerationStatus::Completed),
        "failed" => Ok(GenerationStatus::Failed),
        "submitted" => Ok(GenerationStatus::Queued),
        "processing" => Ok(GenerationStatus::Processing),
        other => Err(ProviderError::UnknownStatus(other.to_string())),
    }
}

/// Envelope shared by every response.
#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

/// One task as reported in listings and pushed to the callback URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfficialTask {
    pub task_id: String,
    pub task_status: String,
    #[serde(default)]
    pub task_status_msg: Option<String>,
    #[serde(default)]
    pub task_result: Option<OfficialTaskResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OfficialTaskResult {
    #[serde(default)]
    pub videos: Vec<OfficialVideo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfficialVideo {
    #[serde(default)]
    pub id: Option<String>,
    pub url: String,
    #[serde(default)]
    pub duration: Option<String>,
}

impl OfficialTask {
    /// Translate into the unified vocabulary.
    pub fn to_poll(&self) -> ProviderResult<ProviderPoll> {
        let status = map_status(&self.task_status)?;
        let mut poll = ProviderPoll::with_status(status);

        match status {
            GenerationStatus::Completed => {
                let url = self
                    .task_result
                    .as_ref()
                    .and_then(|r| r.videos.first())
                    .map(|v| v.url.clone())
                    .ok_or_else(|| {
                        ProviderError::invalid_response(format!(
                            "task {} succeeded without a video url",
                            self.task_id
                        ))
                    })?;
                poll.result_url = Some(url);
            }
            GenerationStatus::Failed => {
                poll.error_message = Some(
                    self.task_status_msg
                        .clone()
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| "Generation failed".to_string()),
                );
            }
            _ => {}
        }

        Ok(poll)
    }
}

/// Direct Kling API client.
pub struct OfficialProvider {
    http: Client,
    config: OfficialConfig,
    tokens: ApiTokenCache,
}

impl OfficialProvider {
    pub fn new(config: OfficialConfig) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ProviderError::Network)?;
        let tokens = ApiTokenCache::new(&config.access_key, &config.secret_key);

        Ok(Self {
            http,
            config,
            tokens,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn build_body(request: &GenerationRequest) -> Value {
        let mut body = json!({
            "model_name": request.model,
            "prompt": request.prompt,
            "negative_prompt": request.negative_prompt.clone().unwrap_or_default(),
            "cfg_scale": request.cfg,
            "mode": if request.high_quality { "pro" } else { "std" },
            "duration": request.duration.as_str(),
        });

        match request.task_type {
            TaskType::TextToVideo => {
                body["aspect_ratio"] = json!(request.aspect_ratio.as_str());
                if let Some(camera) = &request.camera_control {
                    body["camera_control"] = camera.clone();
                }
            }
            TaskType::ImageToVideo => {
                if let Some(image) = &request.start_image {
                    body["image"] = json!(BASE64.encode(&image.data));
                }
                if let Some(tail) = &request.end_image {
                    body["image_tail"] = json!(BASE64.encode(&tail.data));
                }
            }
        }

        body
    }

    /// Send an authorized request and unwrap the response envelope.
    async fn execute(&self, operation: &str, builder: RequestBuilder) -> ProviderResult<Envelope> {
        let token = self.tokens.get_token().await?;
        let start = Instant::now();

        let result = async {
            let response = builder
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| ProviderError::from_reqwest(e, self.config.timeout.as_secs()))?;

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.tokens.invalidate().await;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::Http {
                    status: status.as_u16(),
                    body: body.chars().take(500).collect(),
                });
            }

            let envelope: Envelope = response
                .json()
                .await
                .map_err(|e| ProviderError::from_reqwest(e, self.config.timeout.as_secs()))?;
            Ok(envelope)
        }
        .await;

        let outcome = match &result {
            Ok(env) if env.code == 0 => "success",
            Ok(_) => "rejected",
            Err(e) => e.kind(),
        };
        record_call("official", operation, outcome, start.elapsed().as_secs_f64());

        result
    }

    /// Find a task in one listing page.
    async fn scan_page(
        &self,
        path: &str,
        page: u32,
        external_task_id: &str,
    ) -> ProviderResult<(Option<OfficialTask>, usize)> {
        let builder = self.http.get(self.url(path)).query(&[
            ("pageNum", page.to_string()),
            ("pageSize", LIST_PAGE_SIZE.to_string()),
        ]);

        let envelope = self.execute("poll", builder).await?;
        if envelope.code != 0 {
            return Err(ProviderError::invalid_response(format!(
                "listing returned code {}: {}",
                envelope.code, envelope.message
            )));
        }

        let items = match envelope.data {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(ProviderError::invalid_response(format!(
                    "listing data is not an array: {}",
                    other
                )))
            }
        };
        let count = items.len();

        let found = items
            .into_iter()
            .find(|item| item.get("task_id").and_then(Value::as_str) == Some(external_task_id))
            .map(serde_json::from_value::<OfficialTask>)
            .transpose()?;

        Ok((found, count))
    }
}

#[async_trait]
impl ProviderAdapter for OfficialProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Official
    }

    fn api_endpoint(&self) -> &str {
        &self.config.base_url
    }

    async fn submit(&self, request: &GenerationRequest) -> ProviderResult<String> {
        let path = endpoint_path(request.task_type);
        let span = info_span!("official_submit", path = path, task_type = %request.task_type);

        async {
            let builder = self.http.post(self.url(path)).json(&Self::build_body(request));
            let envelope = self.execute("submit", builder).await?;

            if envelope.code != 0 {
                return Err(ProviderError::Rejected {
                    code: envelope.code,
                    message: envelope.message,
                });
            }

            let task_id = extract_task_id(&json!({ "data": envelope.data }))?;
            debug!(external_task_id = %task_id, "Official task created");
            Ok(task_id)
        }
        .instrument(span)
        .await
    }

    async fn poll(&self, target: &PollTarget) -> ProviderResult<ProviderPoll> {
        let path = endpoint_path(target.task_type);
        let span = info_span!("official_poll", external_task_id = %target.external_task_id);

        async {
            for page in 1..=self.config.max_poll_pages.max(1) {
                let (found, count) = self.scan_page(path, page, &target.external_task_id).await?;
                if let Some(task) = found {
                    return task.to_poll();
                }
                if count < LIST_PAGE_SIZE as usize {
                    break;
                }
            }

            warn!(
                external_task_id = %target.external_task_id,
                "Task not found in recent listing pages"
            );
            Err(ProviderError::TaskNotFound(target.external_task_id.clone()))
        }
        .instrument(span)
        .await
    }
}

//! 302.ai proxy adapter.
//!
//! Static bearer key. Each (task type, quality, duration) tier has its own
//! submit URL, and a single task can be fetched directly by id.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tracing::{debug, info_span, Instrument};
use vgen_models::{GenerationStatus, InputImage, ProviderKind, TaskType, VideoDuration};

use crate::adapter::ProviderAdapter;
use crate::error::{ProviderError, ProviderResult};
use crate::extract::extract_task_id;
use crate::metrics::record_call;
use crate::types::{GenerationRequest, PollTarget, ProviderPoll};

pub const DEFAULT_AGGREGATOR_API_BASE: &str = "https://api.302.ai";

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl AggregatorConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_AGGREGATOR_API_BASE.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Load from `AI302_API_KEY` and `AI302_API_BASE`.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("AI302_API_KEY").ok().filter(|v| !v.is_empty())?;

        let mut config = Self::new(api_key);
        if let Ok(base) = std::env::var("AI302_API_BASE") {
            config = config.with_base_url(base);
        }
        if let Some(secs) = std::env::var("PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        Some(config)
    }
}

/// Submit path for a tier.
pub fn endpoint_path(task_type: TaskType, high_quality: bool, duration: VideoDuration) -> &'static str {
    use TaskType::*;
    use VideoDuration::*;

    match (task_type, high_quality, duration) {
        (TextToVideo, false, Five) => "/klingai/m2v_txt2video",
        (TextToVideo, true, Five) => "/klingai/m2v_txt2video_hq",
        (TextToVideo, false, Ten) => "/klingai/m2v_txt2video_10s",
        (TextToVideo, true, Ten) => "/klingai/m2v_txt2video_hq_10s",
        (ImageToVideo, false, Five) => "/klingai/m2v_img2video",
        (ImageToVideo, true, Five) => "/klingai/m2v_img2video_hq",
        (ImageToVideo, false, Ten) => "/klingai/m2v_img2video_10s",
        (ImageToVideo, true, Ten) => "/klingai/m2v_img2video_hq_10s",
    }
}

/// Translate a numeric provider status.
pub fn map_status(code: i64) -> ProviderResult<GenerationStatus> {
    match code {
        99 => Ok(GenerationStatus::Completed),
        0 => Ok(GenerationStatus::Queued),
        1 | 2 => Ok(GenerationStatus::Processing),
        -1 => Ok(GenerationStatus::Failed),
        other => Err(ProviderError::UnknownStatus(other.to_string())),
    }
}

/// Translate a fetch response body.
///
/// Only the first entry of `works` is kept; any further candidates are
/// discarded.
pub fn parse_fetch(body: &Value) -> ProviderResult<ProviderPoll> {
    let code = body
        .pointer("/data/task/status")
        .and_then(Value::as_i64)
        .ok_or_else(|| ProviderError::invalid_response("missing data.task.status"))?;

    let status = map_status(code)?;
    let mut poll = ProviderPoll::with_status(status);

    match status {
        GenerationStatus::Completed => {
            let work = body.pointer("/data/works/0");
            poll.result_url = work
                .and_then(|w| w.pointer("/resource/resource"))
                .and_then(Value::as_str)
                .map(str::to_string);
            poll.thumbnail_url = work
                .and_then(|w| w.pointer("/cover/resource"))
                .and_then(Value::as_str)
                .map(str::to_string);

            if poll.result_url.is_none() {
                return Err(ProviderError::invalid_response(
                    "completed task has no work resource",
                ));
            }
        }
        GenerationStatus::Failed => {
            poll.error_message = Some(
                body.pointer("/data/task/message")
                    .and_then(Value::as_str)
                    .filter(|m| !m.is_empty())
                    .unwrap_or("Generation failed at provider")
                    .to_string(),
            );
        }
        _ => {}
    }

    Ok(poll)
}

fn image_part(image: &InputImage) -> ProviderResult<Part> {
    Part::bytes(image.data.clone())
        .file_name(image.file_name())
        .mime_str(&image.content_type)
        .map_err(ProviderError::Network)
}

/// 302.ai client.
pub struct AggregatorProvider {
    http: Client,
    config: AggregatorConfig,
}

impl AggregatorProvider {
    pub fn new(config: AggregatorConfig) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ProviderError::Network)?;

        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn text_body(request: &GenerationRequest) -> Value {
        let mut body = json!({
            "prompt": request.prompt,
            "negative_prompt": request.negative_prompt.clone().unwrap_or_default(),
            "cfg": request.cfg,
            "aspect_ratio": request.aspect_ratio.as_str(),
        });
        if let Some(camera) = &request.camera_control {
            body["camera_control"] = camera.clone();
        }
        body
    }

    fn image_form(request: &GenerationRequest) -> ProviderResult<Form> {
        let image = request
            .start_image
            .as_ref()
            .ok_or_else(|| ProviderError::invalid_response("image-to-video request without image"))?;

        let mut form = Form::new()
            .part("input_image", image_part(image)?)
            .text("prompt", request.prompt.clone())
            .text(
                "negative_prompt",
                request.negative_prompt.clone().unwrap_or_default(),
            )
            .text("cfg", request.cfg.to_string());

        if let Some(tail) = &request.end_image {
            form = form.part("image_tail", image_part(tail)?);
        }

        Ok(form)
    }

    async fn execute(&self, operation: &str, builder: RequestBuilder) -> ProviderResult<Value> {
        let start = Instant::now();

        let result = async {
            let response = builder
                .bearer_auth(&self.config.api_key)
                .send()
                .await
                .map_err(|e| ProviderError::from_reqwest(e, self.config.timeout.as_secs()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::Http {
                    status: status.as_u16(),
                    body: body.chars().take(500).collect(),
                });
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| ProviderError::from_reqwest(e, self.config.timeout.as_secs()))
        }
        .await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        record_call("aggregator", operation, outcome, start.elapsed().as_secs_f64());

        result
    }
}

#[async_trait]
impl ProviderAdapter for AggregatorProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Aggregator
    }

    fn api_endpoint(&self) -> &str {
        &self.config.base_url
    }

    async fn submit(&self, request: &GenerationRequest) -> ProviderResult<String> {
        let path = endpoint_path(request.task_type, request.high_quality, request.duration);
        let span = info_span!("aggregator_submit", path = path);

        async {
            let builder = match request.task_type {
                TaskType::TextToVideo => self.http.post(self.url(path)).json(&Self::text_body(request)),
                TaskType::ImageToVideo => self
                    .http
                    .post(self.url(path))
                    .multipart(Self::image_form(request)?),
            };

            let body = self.execute("submit", builder).await?;

            if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
                return Err(ProviderError::Rejected {
                    code: error.get("code").and_then(Value::as_i64).unwrap_or(-1),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string(),
                });
            }

            let task_id = extract_task_id(&body)?;
            debug!(external_task_id = %task_id, "Aggregator task created");
            Ok(task_id)
        }
        .instrument(span)
        .await
    }

    async fn poll(&self, target: &PollTarget) -> ProviderResult<ProviderPoll> {
        let path = format!("/klingai/task/{}/fetch", target.external_task_id);
        let span = info_span!("aggregator_poll", external_task_id = %target.external_task_id);

        async {
            let body = self.execute("poll", self.http.get(self.url(&path))).await?;
            parse_fetch(&body)
        }
        .instrument(span)
        .await
    }
}

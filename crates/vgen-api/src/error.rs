//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use vgen_tasks::TaskError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Insufficient credits: {required} required, {available} available")]
    PaymentRequired { required: i32, available: i64 },

    #[error("Upstream provider error: {0}")]
    BadGateway(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Store error: {0}")]
    Store(#[from] vgen_store::StoreError),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PaymentRequired { .. } => StatusCode::PAYMENT_REQUIRED,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) | ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn is_internal(&self) -> bool {
        matches!(self, ApiError::Internal(_) | ApiError::Store(_))
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Validation(e) => ApiError::BadRequest(e.to_string()),
            TaskError::InsufficientCredits {
                required,
                available,
            } => ApiError::PaymentRequired {
                required,
                available,
            },
            TaskError::NotFound(what) => ApiError::NotFound(what),
            TaskError::NoProvider(task_type) => {
                ApiError::Unavailable(format!("no provider configured for {}", task_type))
            }
            e @ TaskError::ProviderDispatch { .. } => ApiError::BadGateway(e.to_string()),
            e @ (TaskError::NotEligible { .. } | TaskError::AlreadyClaimed(_)) => {
                ApiError::BadRequest(e.to_string())
            }
            TaskError::Store(e) => ApiError::Store(e),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    available: Option<i64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if self.is_internal() {
            error!("Request failed: {}", self);
        }

        // Don't expose internal error details in production
        let detail = if self.is_internal()
            && std::env::var("ENVIRONMENT").unwrap_or_default() == "production"
        {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let (required, available) = match &self {
            ApiError::PaymentRequired {
                required,
                available,
            } => (Some(*required), Some(*available)),
            _ => (None, None),
        };

        let body = ErrorResponse {
            detail,
            required,
            available,
        };

        (status, Json(body)).into_response()
    }
}

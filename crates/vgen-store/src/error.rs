//! Store error types.

use serde::Deserialize;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// PostgREST error code for a statement cancelled by `statement_timeout`.
pub const STATEMENT_TIMEOUT_CODE: &str = "57014";

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store not configured: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The statement was cancelled server-side. The write may still have
    /// been applied.
    #[error("Statement timeout: {0}")]
    StatementTimeout(String),

    #[error("Request failed (HTTP {status}): {message}")]
    RequestFailed { status: u16, message: String },

    #[error("Service unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("Rate limited, retry after {0}ms")]
    RateLimited(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// PostgREST error body.
#[derive(Debug, Default, Deserialize)]
pub struct PostgrestErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl StoreError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Classify an unsuccessful response.
    ///
    /// The body is parsed as a PostgREST error when possible so that
    /// statement timeouts can be told apart from other server errors.
    pub fn from_http_status(status: u16, body: &str, retry_after_ms: Option<u64>) -> Self {
        let parsed: PostgrestErrorBody = serde_json::from_str(body).unwrap_or_default();
        let message = parsed
            .message
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body.chars().take(500).collect());

        if parsed.code.as_deref() == Some(STATEMENT_TIMEOUT_CODE) {
            return Self::StatementTimeout(message);
        }

        match status {
            401 | 403 => Self::AuthError(message),
            404 => Self::NotFound(message),
            409 => Self::Conflict(message),
            429 => Self::RateLimited(retry_after_ms.unwrap_or(1000)),
            500..=599 => Self::Unavailable { status, message },
            _ => Self::RequestFailed { status, message },
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Network(_) | StoreError::RateLimited(_) | StoreError::Unavailable { .. }
        )
    }

    pub fn is_statement_timeout(&self) -> bool {
        matches!(self, StoreError::StatementTimeout(_))
    }

    /// Server-requested delay before retrying.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            StoreError::RateLimited(ms) => Some(*ms),
            _ => None,
        }
    }

    /// HTTP status for metrics labels.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            StoreError::AuthError(_) => Some(401),
            StoreError::NotFound(_) => Some(404),
            StoreError::Conflict(_) => Some(409),
            StoreError::RateLimited(_) => Some(429),
            StoreError::StatementTimeout(_) => Some(500),
            StoreError::RequestFailed { status, .. } | StoreError::Unavailable { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

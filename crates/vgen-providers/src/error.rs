//! Provider error types.

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Token signing failed: {0}")]
    Auth(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Provider rejected request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No task id in provider response: {0}")]
    MissingTaskId(String),

    #[error("Unrecognized provider status: {0}")]
    UnknownStatus(String),

    #[error("Task {0} not found in provider listing")]
    TaskNotFound(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn not_configured(msg: impl Into<String>) -> Self {
        Self::NotConfigured(msg.into())
    }

    /// Map a reqwest failure, keeping timeouts distinct from other network errors.
    pub fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout_secs)
        } else {
            Self::Network(err)
        }
    }

    /// True when the provider could not be reached or did not answer usefully.
    ///
    /// Poll errors of this class feed the staleness fallback instead of
    /// failing the task.
    pub fn is_unavailable(&self) -> bool {
        match self {
            ProviderError::Timeout(_) | ProviderError::Network(_) => true,
            ProviderError::Http { status, .. } => *status == 429 || *status >= 500,
            ProviderError::TaskNotFound(_)
            | ProviderError::UnknownStatus(_)
            | ProviderError::InvalidResponse(_) => true,
            _ => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::NotConfigured(_) => "not_configured",
            ProviderError::Auth(_) => "auth",
            ProviderError::Http { .. } => "http",
            ProviderError::Rejected { .. } => "rejected",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::InvalidResponse(_) => "invalid_response",
            ProviderError::MissingTaskId(_) => "missing_task_id",
            ProviderError::UnknownStatus(_) => "unknown_status",
            ProviderError::TaskNotFound(_) => "task_not_found",
            ProviderError::Network(_) => "network",
            ProviderError::Json(_) => "json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_unavailable() {
        let err = ProviderError::Http {
            status: 503,
            body: "down".into(),
        };
        assert!(err.is_unavailable());
        assert!(ProviderError::Timeout(30).is_unavailable());
    }

    #[test]
    fn test_client_errors_are_not_unavailable() {
        let err = ProviderError::Http {
            status: 400,
            body: "bad".into(),
        };
        assert!(!err.is_unavailable());
        assert!(!ProviderError::Auth("bad key".into()).is_unavailable());
    }
}

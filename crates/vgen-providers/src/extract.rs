//! Provider task id extraction.
//!
//! Providers nest the id of a newly created task at different depths. The
//! candidate paths are tried in order; the first one holding a string or a
//! number wins.

use serde_json::Value;

use crate::error::{ProviderError, ProviderResult};

/// JSON pointer paths where a provider may place the created task id.
const TASK_ID_PATHS: &[&str] = &["/data/task/id", "/data/task_id", "/task_id", "/id"];

/// Pull the provider task id out of a submit response.
pub fn extract_task_id(body: &Value) -> ProviderResult<String> {
    TASK_ID_PATHS
        .iter()
        .find_map(|path| body.pointer(path).and_then(id_to_string))
        .ok_or_else(|| {
            // Truncate on char boundaries; provider messages are often CJK.
            ProviderError::MissingTaskId(body.to_string().chars().take(200).collect())
        })
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

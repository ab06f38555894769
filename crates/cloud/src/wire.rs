//! Request and response bodies of the encoding service, and their mapping
//! onto the core types.

use encbatch_core::remote::{RemoteStatus, SubmitError, TaskReport};
use serde::{Deserialize, Serialize};

/// Error code the service uses when its queue limit is exceeded.
pub const QUEUE_LIMIT_EXCEEDED_CODE: i64 = 8004;

/// HTTP status some deployments return instead of the error code.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Retry hint marking an error as permanent.
pub const RETRY_HINT_NO_RETRY: &str = "NO_RETRY";

/// Message type of error entries in a status response.
pub const MESSAGE_TYPE_ERROR: &str = "ERROR";

#[derive(Debug, Serialize)]
pub struct CreateEncodingRequest<'a> {
    pub name: &'a str,
    pub input_path: &'a str,
    pub output_path: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct CreateEncodingResponse {
    pub id: String,
}

/// Error body returned by failing calls.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TaskErrorBody {
    #[serde(default)]
    pub retry_hint: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TaskMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<TaskErrorBody>,
    #[serde(default)]
    pub messages: Vec<TaskMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ListResponse {
    pub total_count: usize,
}

impl StatusResponse {
    /// Reduce a status response to a [`TaskReport`].
    ///
    /// An `ERROR` task is retryable unless it carries error details with
    /// the `NO_RETRY` hint; without error details it counts as permanent.
    /// Its `ERROR` messages are kept either way.
    pub fn into_report(self) -> TaskReport {
        let status = match self.status.to_ascii_uppercase().as_str() {
            "FINISHED" => RemoteStatus::Finished,
            "ERROR" => RemoteStatus::Error,
            _ => RemoteStatus::Other,
        };

        if status != RemoteStatus::Error {
            return TaskReport {
                status,
                error: None,
            };
        }

        let messages = self
            .messages
            .into_iter()
            .filter(|m| m.kind.eq_ignore_ascii_case(MESSAGE_TYPE_ERROR))
            .filter_map(|m| m.text)
            .collect();

        let retryable = self
            .error
            .is_some_and(|e| e.retry_hint.as_deref() != Some(RETRY_HINT_NO_RETRY));

        TaskReport::failed(retryable, messages)
    }
}

/// Classify a failed start call.
pub fn classify_start_failure(status: u16, body: &str) -> SubmitError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();

    if status == TOO_MANY_REQUESTS || parsed.error_code == Some(QUEUE_LIMIT_EXCEEDED_CODE) {
        return SubmitError::Throttled;
    }

    let detail = parsed
        .message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string());
    SubmitError::Failed(format!("HTTP {status}: {detail}"))
}

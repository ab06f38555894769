//! The seam between the dispatcher and the remote encoding service.
//!
//! The dispatcher never talks to the service itself; the driver calls an
//! [`EncodingService`] and feeds the results back as [`TaskReport`]s and
//! [`SubmitError`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::job::JobDescriptor;
use crate::types::TaskId;

/// Remote status of a submitted task, reduced to what the dispatcher needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Finished,
    Error,
    /// Queued, running, or any other non-terminal state.
    Other,
}

/// Error details attached to a task in [`RemoteStatus::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub retryable: bool,
    pub messages: Vec<String>,
}

/// One status observation of a remote task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub status: RemoteStatus,
    pub error: Option<RemoteError>,
}

impl TaskReport {
    pub fn finished() -> Self {
        Self {
            status: RemoteStatus::Finished,
            error: None,
        }
    }

    pub fn in_progress() -> Self {
        Self {
            status: RemoteStatus::Other,
            error: None,
        }
    }

    pub fn failed(retryable: bool, messages: Vec<String>) -> Self {
        Self {
            status: RemoteStatus::Error,
            error: Some(RemoteError {
                retryable,
                messages,
            }),
        }
    }

    /// Finished and errored tasks will not change any more.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RemoteStatus::Finished | RemoteStatus::Error)
    }

    /// An errored task is retryable only when the service says so; an
    /// error without details is treated as permanent.
    pub fn is_retryable(&self) -> bool {
        self.status == RemoteStatus::Error && self.error.as_ref().is_some_and(|e| e.retryable)
    }

    pub fn messages(&self) -> &[String] {
        self.error.as_ref().map(|e| e.messages.as_slice()).unwrap_or(&[])
    }
}

/// Why a submission attempt did not start the task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The remote queue is full. Expected; does not consume retry budget.
    #[error("Remote queue limit reached")]
    Throttled,

    /// Any other failure; consumes retry budget.
    #[error("Submission failed: {0}")]
    Failed(String),
}

/// Failures of status and queue-size queries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// The request never produced a response (network, DNS, TLS, timeout).
    #[error("Request failed: {0}")]
    Request(String),

    /// The service answered with a non-success status code.
    #[error("Service error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("Unexpected response: {0}")]
    Decode(String),
}

/// Remote encoding service consumed by the batch driver.
#[async_trait]
pub trait EncodingService: Send + Sync {
    /// Submit (or resubmit) a job and return the remote task id.
    ///
    /// `previous` carries the task id of an earlier successful
    /// submission so the service can restart the same task.
    async fn submit(
        &self,
        job: &JobDescriptor,
        previous: Option<&TaskId>,
    ) -> Result<TaskId, SubmitError>;

    async fn query_status(&self, task_id: &TaskId) -> Result<TaskReport, ServiceError>;

    /// Number of tasks currently waiting in the remote queue.
    async fn count_queued(&self) -> Result<usize, ServiceError>;
}

//! Job model: the descriptor a job is built from, its lifecycle status,
//! and the tracked [`Job`] record itself.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, TaskId};

/// Maximum length of a job name.
const MAX_NAME_LEN: usize = 128;

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Everything needed to (re)submit a job to the encoding service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Stable local label, also used as the remote encoding name.
    pub name: String,
    /// Path of the source file on the input storage.
    pub input_path: String,
    /// Path on the output storage where renditions are written.
    pub output_path: String,
}

impl JobDescriptor {
    pub fn new(
        name: impl Into<String>,
        input_path: impl Into<String>,
        output_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            input_path: input_path.into(),
            output_path: output_path.into(),
        }
    }

    /// Validate a descriptor before it is registered.
    ///
    /// Rules:
    /// - Name must not be empty or exceed `MAX_NAME_LEN` characters.
    /// - Input path must not be empty.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation(
                "Job name must not be empty".to_string(),
            ));
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(CoreError::Validation(format!(
                "Job name must not exceed {MAX_NAME_LEN} characters"
            )));
        }
        if self.input_path.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "Job '{}' has an empty input path",
                self.name
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Not yet submitted, or waiting for resubmission after a retryable failure.
    Waiting,
    /// Submitted; waiting for the remote task to finish.
    Started,
    /// Remote task finished without error.
    Successful,
    /// Retry budget exhausted or a permanent error was reported.
    GivenUp,
}

impl JobStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Started => "started",
            Self::Successful => "successful",
            Self::GivenUp => "given_up",
        }
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Successful | Self::GivenUp)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A single unit of work tracked by the dispatcher.
///
/// Fields are only mutated by [`JobDispatcher`](crate::dispatcher::JobDispatcher);
/// callers get read access through the accessors.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub(crate) id: JobId,
    pub(crate) descriptor: JobDescriptor,
    pub(crate) task_id: Option<TaskId>,
    pub(crate) retry_count: u32,
    pub(crate) status: JobStatus,
    pub(crate) error_messages: Vec<String>,
    pub(crate) submitted_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) throttled_since: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn new(id: JobId, descriptor: JobDescriptor) -> Self {
        Self {
            id,
            descriptor,
            task_id: None,
            retry_count: 0,
            status: JobStatus::Waiting,
            error_messages: Vec::new(),
            submitted_at: None,
            finished_at: None,
            throttled_since: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    /// Remote task id; present once the job has been submitted successfully.
    pub fn task_id(&self) -> Option<&TaskId> {
        self.task_id.as_ref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Error messages in the order they were reported.
    pub fn error_messages(&self) -> &[String] {
        &self.error_messages
    }

    /// Time of the most recent successful submission.
    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    /// Time the job reached a terminal status.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Start of the current run of throttled submission attempts.
    pub fn throttled_since(&self) -> Option<DateTime<Utc>> {
        self.throttled_since
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

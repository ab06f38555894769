use crate::job::JobStatus;
use crate::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {id} is {actual}, expected {expected}")]
    UnexpectedStatus {
        id: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("Validation failed: {0}")]
    Validation(String),
}

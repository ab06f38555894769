//! End-of-run report of a batch.

use serde::Serialize;

use crate::job::{Job, JobStatus};
use crate::types::TaskId;

/// A job that ended in `GivenUp`, with everything needed to investigate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedJob {
    pub name: String,
    pub task_id: Option<TaskId>,
    pub retry_count: u32,
    pub error_messages: Vec<String>,
}

/// Counts per status plus the details of every failed job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub waiting: usize,
    pub started: usize,
    pub successful: usize,
    pub given_up: usize,
    pub failures: Vec<FailedJob>,
}

impl BatchSummary {
    pub fn from_jobs(jobs: &[Job]) -> Self {
        let mut summary = Self {
            total: jobs.len(),
            ..Default::default()
        };

        for job in jobs {
            match job.status() {
                JobStatus::Waiting => summary.waiting += 1,
                JobStatus::Started => summary.started += 1,
                JobStatus::Successful => summary.successful += 1,
                JobStatus::GivenUp => {
                    summary.given_up += 1;
                    summary.failures.push(FailedJob {
                        name: job.name().to_string(),
                        task_id: job.task_id().cloned(),
                        retry_count: job.retry_count(),
                        error_messages: job.error_messages().to_vec(),
                    });
                }
            }
        }

        summary
    }

    /// True when the run reached the end with every job terminal.
    pub fn is_complete(&self) -> bool {
        self.waiting == 0 && self.started == 0
    }

    pub fn has_failures(&self) -> bool {
        self.given_up > 0
    }
}

//! In-memory job dispatcher for batch runs.
//!
//! Decides which waiting jobs to start each round and applies the retry
//! policy to remote feedback. The dispatcher owns its jobs and performs no
//! I/O; the driver passes in what the [`EncodingService`] reported.
//!
//! ```text
//! Waiting --submit ok--------------------------------> Started
//! Waiting --throttled--------------------------------> Waiting
//! Waiting --submit error, retries left---------------> Waiting (count + 1)
//! Waiting --submit error, retries exhausted----------> GivenUp
//! Started --finished---------------------------------> Successful
//! Started --error, non-retryable---------------------> GivenUp
//! Started --error, retryable, retries left-----------> Waiting (count + 1)
//! Started --error, retryable, retries exhausted------> GivenUp
//! ```
//!
//! [`EncodingService`]: crate::remote::EncodingService

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::job::{Job, JobDescriptor, JobStatus};
use crate::remote::{RemoteStatus, SubmitError, TaskReport};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::summary::BatchSummary;
use crate::types::{JobId, TaskId};

/// Prefix for messages recorded when a submission fails.
const SUBMIT_FAILURE_PREFIX: &str = "The encoding could not be started";

/// What a dispatcher call did to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Started,
    Succeeded,
    /// Back to `Waiting` after a retryable failure.
    Requeued { retries_left: u32 },
    GivenUp,
}

/// Tracks every job of a batch run and its status.
#[derive(Debug, Clone)]
pub struct JobDispatcher {
    jobs: Vec<Job>,
    policy: RetryPolicy,
}

impl JobDispatcher {
    /// Register `descriptors` in order; every job starts out `Waiting`.
    ///
    /// Fails if a descriptor is invalid or two jobs share a name.
    pub fn new(
        descriptors: impl IntoIterator<Item = JobDescriptor>,
        policy: RetryPolicy,
    ) -> Result<Self, CoreError> {
        let mut seen = HashSet::new();
        let mut jobs = Vec::new();

        for (index, descriptor) in descriptors.into_iter().enumerate() {
            descriptor.validate()?;
            if !seen.insert(descriptor.name.clone()) {
                return Err(CoreError::Validation(format!(
                    "Duplicate job name: \"{}\"",
                    descriptor.name
                )));
            }
            jobs.push(Job::new(JobId(index), descriptor));
        }

        Ok(Self { jobs, policy })
    }

    /// Retry policy applied to every failure.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// All jobs in registration order.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Look up a job by id.
    pub fn job(&self, id: JobId) -> Result<&Job, CoreError> {
        self.jobs.get(id.0).ok_or(CoreError::JobNotFound(id))
    }

    fn job_mut(&mut self, id: JobId) -> Result<&mut Job, CoreError> {
        self.jobs.get_mut(id.0).ok_or(CoreError::JobNotFound(id))
    }

    // -- queries --------------------------------------------------------------

    /// Up to `limit` waiting jobs, in registration order.
    pub fn jobs_to_start(&self, limit: usize) -> Vec<&Job> {
        self.jobs_in(JobStatus::Waiting).take(limit).collect()
    }

    /// Jobs submitted and waiting for a remote result.
    pub fn started_jobs(&self) -> Vec<&Job> {
        self.jobs_in(JobStatus::Started).collect()
    }

    /// Jobs that were given up.
    pub fn failed_jobs(&self) -> Vec<&Job> {
        self.jobs_in(JobStatus::GivenUp).collect()
    }

    /// True once every job is `Successful` or `GivenUp`.
    pub fn all_jobs_finished(&self) -> bool {
        self.jobs.iter().all(|job| job.status.is_terminal())
    }

    /// Snapshot of the run for reporting.
    pub fn summary(&self) -> BatchSummary {
        BatchSummary::from_jobs(&self.jobs)
    }

    fn jobs_in(&self, status: JobStatus) -> impl Iterator<Item = &Job> {
        self.jobs.iter().filter(move |job| job.status == status)
    }

    // -- transitions ----------------------------------------------------------

    /// Record a successful submission.
    pub fn mark_started(&mut self, id: JobId, task_id: TaskId) -> Result<Transition, CoreError> {
        let job = self.job_mut(id)?;
        expect_status(job, JobStatus::Waiting)?;

        job.task_id = Some(task_id);
        job.status = JobStatus::Started;
        job.submitted_at = Some(Utc::now());
        job.throttled_since = None;
        Ok(Transition::Started)
    }

    /// Record a submission attempt that did not start the job.
    ///
    /// Throttling leaves the retry counter alone unless the policy caps
    /// throttling streaks and this streak, measured up to `now`, has
    /// outlasted the cap.
    pub fn record_submission_failure(
        &mut self,
        id: JobId,
        error: &SubmitError,
        now: DateTime<Utc>,
    ) -> Result<Transition, CoreError> {
        let policy = self.policy;
        let job = self.job_mut(id)?;
        expect_status(job, JobStatus::Waiting)?;

        match error {
            SubmitError::Throttled => {
                let since = *job.throttled_since.get_or_insert(now);
                let elapsed = (now - since).to_std().unwrap_or_default();
                if !policy.throttle_expired(elapsed) {
                    return Ok(Transition::Unchanged);
                }
                job.throttled_since = None;
                let message = format!(
                    "{SUBMIT_FAILURE_PREFIX}: remote queue stayed full for {}s",
                    elapsed.as_secs()
                );
                Ok(apply_failure(job, &policy, true, vec![message], now))
            }
            SubmitError::Failed(reason) => {
                job.throttled_since = None;
                let message = format!("{SUBMIT_FAILURE_PREFIX}: {reason}");
                Ok(apply_failure(job, &policy, true, vec![message], now))
            }
        }
    }

    /// Apply a status observation of a started job.
    pub fn update_job_status(
        &mut self,
        id: JobId,
        report: &TaskReport,
    ) -> Result<Transition, CoreError> {
        let policy = self.policy;
        let job = self.job_mut(id)?;
        expect_status(job, JobStatus::Started)?;

        let now = Utc::now();
        match report.status {
            RemoteStatus::Finished => {
                job.status = JobStatus::Successful;
                job.finished_at = Some(now);
                Ok(Transition::Succeeded)
            }
            RemoteStatus::Error => Ok(apply_failure(
                job,
                &policy,
                report.is_retryable(),
                report.messages().to_vec(),
                now,
            )),
            RemoteStatus::Other => Ok(Transition::Unchanged),
        }
    }
}

fn expect_status(job: &Job, expected: JobStatus) -> Result<(), CoreError> {
    if job.status == expected {
        Ok(())
    } else {
        Err(CoreError::UnexpectedStatus {
            id: job.id,
            expected,
            actual: job.status,
        })
    }
}

/// Append `messages` and either requeue the job or give it up.
fn apply_failure(
    job: &mut Job,
    policy: &RetryPolicy,
    retryable: bool,
    messages: Vec<String>,
    now: DateTime<Utc>,
) -> Transition {
    job.error_messages.extend(messages);

    match policy.decide(job.retry_count, retryable) {
        RetryDecision::Retry { next_count } => {
            job.retry_count = next_count;
            job.status = JobStatus::Waiting;
            Transition::Requeued {
                retries_left: policy.retries_left(next_count),
            }
        }
        RetryDecision::GiveUp => {
            job.status = JobStatus::GivenUp;
            job.finished_at = Some(now);
            Transition::GivenUp
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

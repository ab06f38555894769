//! One-at-a-time execution: submit a job, wait for it, then move on.

use chrono::Utc;
use encbatch_core::dispatcher::{JobDispatcher, Transition};
use encbatch_core::job::JobDescriptor;
use encbatch_core::poll::{poll_until, sleep_or_cancel, PollError, PollOptions};
use encbatch_core::remote::{EncodingService, RemoteStatus, ServiceError, SubmitError, TaskReport};
use encbatch_core::types::TaskId;
use tokio_util::sync::CancellationToken;

use crate::driver::{log_summary, RunOutcome};

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// The task was started but never reported a terminal status.
    #[error("Waiting for task {task_id} failed: {source}")]
    Wait {
        task_id: TaskId,
        #[source]
        source: PollError<ServiceError>,
    },
}

/// Start `job` and poll its status until it is finished or errored.
pub async fn execute_and_wait<S>(
    service: &S,
    job: &JobDescriptor,
    previous: Option<&TaskId>,
    options: &PollOptions,
    cancel: &CancellationToken,
) -> Result<(TaskId, TaskReport), ExecuteError>
where
    S: EncodingService + ?Sized,
{
    let task_id = service.submit(job, previous).await?;
    tracing::info!(job = %job.name, task_id = %task_id, "Encoding started, waiting for completion");

    let report = poll_until(
        || service.query_status(&task_id),
        TaskReport::is_terminal,
        options,
        cancel,
    )
    .await;

    match report {
        Ok(report) => {
            if report.status == RemoteStatus::Error {
                for message in report.messages() {
                    tracing::error!(job = %job.name, task_id = %task_id, "{message}");
                }
            } else {
                tracing::info!(job = %job.name, task_id = %task_id, "Encoding finished successfully");
            }
            Ok((task_id, report))
        }
        Err(source) => Err(ExecuteError::Wait { task_id, source }),
    }
}

/// Run every job of `dispatcher` one after the other.
///
/// Retryable failures put a job back at its place in the queue, so it is
/// attempted again before any later job.
pub async fn run_sequential<S>(
    service: &S,
    mut dispatcher: JobDispatcher,
    options: &PollOptions,
    cancel: &CancellationToken,
) -> RunOutcome
where
    S: EncodingService + ?Sized,
{
    let mut rounds = 0u64;
    let mut cancelled = false;

    loop {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        let Some(job) = dispatcher.jobs_to_start(1).into_iter().next() else {
            break;
        };
        let (id, descriptor, previous) = (job.id(), job.descriptor().clone(), job.task_id().cloned());
        rounds += 1;

        match execute_and_wait(service, &descriptor, previous.as_ref(), options, cancel).await {
            Ok((task_id, report)) => {
                let recorded = dispatcher
                    .mark_started(id, task_id)
                    .and_then(|_| dispatcher.update_job_status(id, &report));
                if let Err(e) = recorded {
                    tracing::error!(job = %descriptor.name, error = %e, "Failed to record result");
                }
            }
            Err(ExecuteError::Submit(err)) => {
                let throttled = err == SubmitError::Throttled;
                match dispatcher.record_submission_failure(id, &err, Utc::now()) {
                    Ok(Transition::GivenUp) => {
                        tracing::error!(job = %descriptor.name, error = %err, "Encoding could not be started, giving up");
                    }
                    Ok(_) => {
                        tracing::warn!(job = %descriptor.name, error = %err, "Encoding could not be started, will retry");
                    }
                    Err(e) => {
                        tracing::error!(job = %descriptor.name, error = %e, "Failed to record submission failure");
                    }
                }
                if throttled && !sleep_or_cancel(options.interval, cancel).await {
                    cancelled = true;
                    break;
                }
            }
            Err(ExecuteError::Wait { task_id, source }) => {
                if let Err(e) = dispatcher.mark_started(id, task_id) {
                    tracing::error!(job = %descriptor.name, error = %e, "Failed to record start");
                }
                if matches!(source, PollError::Cancelled) {
                    cancelled = true;
                    break;
                }
                // Treat a lost status as a retryable task failure.
                let report = TaskReport::failed(true, vec![source.to_string()]);
                if let Err(e) = dispatcher.update_job_status(id, &report) {
                    tracing::error!(job = %descriptor.name, error = %e, "Failed to record status");
                }
            }
        }
    }

    log_summary(&dispatcher.summary());
    RunOutcome {
        dispatcher,
        cancelled,
        rounds,
    }
}

//! Batch driver loop.
//!
//! Keeps the remote queue topped up to `target_queue_size`, polls started
//! jobs, and feeds every result into the [`JobDispatcher`]. Runs until all
//! jobs are terminal or the [`CancellationToken`] fires. Remote calls are
//! made one at a time with a short pause in between.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use encbatch_core::dispatcher::{JobDispatcher, Transition};
use encbatch_core::job::JobDescriptor;
use encbatch_core::poll::sleep_or_cancel;
use encbatch_core::remote::{EncodingService, SubmitError};
use encbatch_core::summary::BatchSummary;
use encbatch_core::types::{JobId, TaskId};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::BatchConfig;

/// Timing and sizing of the driver loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSettings {
    pub target_queue_size: usize,
    /// Pause between scheduling rounds.
    pub poll_interval: Duration,
    /// Pause between two remote calls within a round.
    pub request_pause: Duration,
}

impl From<&BatchConfig> for DriverSettings {
    fn from(config: &BatchConfig) -> Self {
        Self {
            target_queue_size: config.target_queue_size,
            poll_interval: config.poll_interval,
            request_pause: config.request_pause,
        }
    }
}

/// Final state of a run, handed back to the caller.
#[derive(Debug)]
pub struct RunOutcome {
    pub dispatcher: JobDispatcher,
    /// The run stopped because of cancellation, not because every job
    /// reached a terminal status.
    pub cancelled: bool,
    pub rounds: u64,
}

impl RunOutcome {
    pub fn summary(&self) -> BatchSummary {
        self.dispatcher.summary()
    }
}

/// Drives a [`JobDispatcher`] against an [`EncodingService`].
pub struct BatchDriver<S: ?Sized> {
    service: Arc<S>,
    settings: DriverSettings,
}

impl<S> BatchDriver<S>
where
    S: EncodingService + ?Sized,
{
    pub fn new(service: Arc<S>, settings: DriverSettings) -> Self {
        Self { service, settings }
    }

    /// Run rounds until every job is terminal or `cancel` fires.
    pub async fn run(&self, dispatcher: JobDispatcher, cancel: CancellationToken) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("batch_run", %run_id);
        self.run_rounds(dispatcher, cancel).instrument(span).await
    }

    async fn run_rounds(&self, mut dispatcher: JobDispatcher, cancel: CancellationToken) -> RunOutcome {
        tracing::info!(
            jobs = dispatcher.jobs().len(),
            target_queue_size = self.settings.target_queue_size,
            max_retries = dispatcher.policy().max_retries,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Batch run started",
        );

        let mut rounds = 0u64;
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if dispatcher.all_jobs_finished() {
                break;
            }
            rounds += 1;

            self.fill_queue(&mut dispatcher, &cancel).await;

            if !sleep_or_cancel(self.settings.poll_interval, &cancel).await {
                cancelled = true;
                break;
            }

            self.refresh_started(&mut dispatcher, &cancel).await;
        }

        if cancelled {
            tracing::warn!(rounds, "Batch run cancelled before all jobs finished");
        } else {
            tracing::info!(rounds, "All encoding jobs are finished");
        }
        log_summary(&dispatcher.summary());

        RunOutcome {
            dispatcher,
            cancelled,
            rounds,
        }
    }

    /// Start as many waiting jobs as the remote queue has room for.
    async fn fill_queue(&self, dispatcher: &mut JobDispatcher, cancel: &CancellationToken) {
        let target = self.settings.target_queue_size;
        let queued = match self.service.count_queued().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to count queued encodings, skipping submissions");
                return;
            }
        };

        let free = target.saturating_sub(queued);
        if free == 0 {
            tracing::info!(queued, target, "Remote queue is full, waiting for free slots");
            return;
        }

        let batch: Vec<(JobId, JobDescriptor, Option<TaskId>)> = dispatcher
            .jobs_to_start(free)
            .into_iter()
            .map(|job| (job.id(), job.descriptor().clone(), job.task_id().cloned()))
            .collect();

        if batch.is_empty() {
            tracing::info!(
                started = dispatcher.started_jobs().len(),
                "No more jobs to start, waiting for started jobs to finish",
            );
            return;
        }

        tracing::info!(
            queued,
            starting = batch.len(),
            target,
            "Starting encodings to reach target queue size",
        );

        for (index, (id, descriptor, previous)) in batch.into_iter().enumerate() {
            if index > 0 && !sleep_or_cancel(self.settings.request_pause, cancel).await {
                return;
            }

            match self.service.submit(&descriptor, previous.as_ref()).await {
                Ok(task_id) => {
                    tracing::info!(job = %descriptor.name, task_id = %task_id, "Encoding started");
                    if let Err(e) = dispatcher.mark_started(id, task_id) {
                        tracing::error!(job = %descriptor.name, error = %e, "Failed to record start");
                    }
                }
                Err(err) => {
                    let throttled = err == SubmitError::Throttled;
                    match dispatcher.record_submission_failure(id, &err, Utc::now()) {
                        Ok(transition) => log_submission_failure(&descriptor.name, &err, transition),
                        Err(e) => {
                            tracing::error!(job = %descriptor.name, error = %e, "Failed to record submission failure");
                        }
                    }
                    // The queue is full; the rest of this round's jobs would be throttled too.
                    if throttled {
                        return;
                    }
                }
            }
        }
    }

    /// Query every started job and apply the result.
    async fn refresh_started(&self, dispatcher: &mut JobDispatcher, cancel: &CancellationToken) {
        let started: Vec<(JobId, String, TaskId)> = dispatcher
            .started_jobs()
            .into_iter()
            .filter_map(|job| {
                job.task_id()
                    .map(|task_id| (job.id(), job.name().to_string(), task_id.clone()))
            })
            .collect();

        for (index, (id, name, task_id)) in started.into_iter().enumerate() {
            if index > 0 && !sleep_or_cancel(self.settings.request_pause, cancel).await {
                return;
            }

            let report = match self.service.query_status(&task_id).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::warn!(job = %name, task_id = %task_id, error = %e, "Status query failed, will retry next round");
                    continue;
                }
            };

            match dispatcher.update_job_status(id, &report) {
                Ok(Transition::Succeeded) => {
                    tracing::info!(job = %name, task_id = %task_id, "Encoding finished successfully");
                }
                Ok(Transition::Requeued { retries_left }) => {
                    tracing::warn!(
                        job = %name,
                        task_id = %task_id,
                        retries_left,
                        messages = ?report.messages(),
                        "Encoding failed, will retry",
                    );
                }
                Ok(Transition::GivenUp) => {
                    tracing::error!(
                        job = %name,
                        task_id = %task_id,
                        retryable = report.is_retryable(),
                        messages = ?report.messages(),
                        "Encoding failed, giving up",
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(job = %name, error = %e, "Failed to record status");
                }
            }
        }
    }
}

fn log_submission_failure(name: &str, err: &SubmitError, transition: Transition) {
    match transition {
        Transition::Unchanged => {
            tracing::info!(job = %name, "Remote queue limit reached, will retry");
        }
        Transition::Requeued { retries_left } => {
            tracing::warn!(job = %name, error = %err, retries_left, "Encoding could not be started, will retry");
        }
        Transition::GivenUp => {
            tracing::error!(job = %name, error = %err, "Encoding could not be started, giving up");
        }
        _ => {}
    }
}

/// Log totals and every job that had to be given up.
pub fn log_summary(summary: &BatchSummary) {
    tracing::info!(
        total = summary.total,
        successful = summary.successful,
        given_up = summary.given_up,
        unfinished = summary.waiting + summary.started,
        "Batch summary",
    );

    for failure in &summary.failures {
        tracing::error!(
            job = %failure.name,
            task_id = failure.task_id.as_ref().map(TaskId::as_str),
            retry_count = failure.retry_count,
            messages = ?failure.error_messages,
            "Encoding could not be finished successfully",
        );
    }
}

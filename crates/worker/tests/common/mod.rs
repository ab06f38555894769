//! Shared helpers for worker integration tests.
//!
//! [`ScriptedService`] is an in-memory [`EncodingService`] whose answers
//! are scripted per job name. Unscripted calls succeed: submissions are
//! accepted, status queries report `Finished`, the remote queue is empty.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use encbatch_core::dispatcher::JobDispatcher;
use encbatch_core::job::JobDescriptor;
use encbatch_core::remote::{EncodingService, ServiceError, SubmitError, TaskReport};
use encbatch_core::retry::RetryPolicy;
use encbatch_core::types::TaskId;
use encbatch_worker::driver::DriverSettings;

/// One recorded `submit` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub job: String,
    pub previous: Option<TaskId>,
    /// Number of `count_queued` calls made before this submission,
    /// i.e. the scheduling round it belongs to.
    pub round: usize,
    pub accepted: bool,
}

#[derive(Default)]
struct State {
    submit_results: HashMap<String, VecDeque<Result<(), SubmitError>>>,
    statuses: HashMap<String, VecDeque<Result<TaskReport, ServiceError>>>,
    queue_counts: VecDeque<usize>,
    default_queue_count: usize,
    task_jobs: HashMap<TaskId, String>,
    next_task: usize,
    count_calls: usize,
    submissions: Vec<Submission>,
    status_queries: Vec<TaskId>,
}

#[derive(Default)]
pub struct ScriptedService {
    state: Mutex<State>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results of successive submissions of `job`.
    pub fn with_submit_results(self, job: &str, results: Vec<Result<(), SubmitError>>) -> Self {
        self.state
            .lock()
            .unwrap()
            .submit_results
            .insert(job.to_string(), results.into());
        self
    }

    /// Results of successive status queries for `job`.
    pub fn with_statuses(self, job: &str, statuses: Vec<Result<TaskReport, ServiceError>>) -> Self {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(job.to_string(), statuses.into());
        self
    }

    /// Answers of successive `count_queued` calls, then `default` forever.
    pub fn with_queue_counts(self, counts: Vec<usize>, default: usize) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.queue_counts = counts.into();
            state.default_queue_count = default;
        }
        self
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn accepted_jobs(&self) -> Vec<String> {
        self.submissions()
            .into_iter()
            .filter(|s| s.accepted)
            .map(|s| s.job)
            .collect()
    }

    pub fn status_query_count(&self) -> usize {
        self.state.lock().unwrap().status_queries.len()
    }
}

#[async_trait]
impl EncodingService for ScriptedService {
    async fn submit(
        &self,
        job: &JobDescriptor,
        previous: Option<&TaskId>,
    ) -> Result<TaskId, SubmitError> {
        let mut state = self.state.lock().unwrap();
        let result = state
            .submit_results
            .get_mut(&job.name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()));

        let round = state.count_calls;
        state.submissions.push(Submission {
            job: job.name.clone(),
            previous: previous.cloned(),
            round,
            accepted: result.is_ok(),
        });
        result?;

        let task_id = match previous {
            Some(id) => id.clone(),
            None => {
                state.next_task += 1;
                TaskId::new(format!("task-{}", state.next_task))
            }
        };
        state.task_jobs.insert(task_id.clone(), job.name.clone());
        Ok(task_id)
    }

    async fn query_status(&self, task_id: &TaskId) -> Result<TaskReport, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.status_queries.push(task_id.clone());
        let job = state
            .task_jobs
            .get(task_id)
            .cloned()
            .ok_or_else(|| ServiceError::Api {
                status: 404,
                body: format!("unknown task {task_id}"),
            })?;
        state
            .statuses
            .get_mut(&job)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(TaskReport::finished()))
    }

    async fn count_queued(&self) -> Result<usize, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.count_calls += 1;
        let default = state.default_queue_count;
        Ok(state.queue_counts.pop_front().unwrap_or(default))
    }
}

pub fn descriptors(count: usize) -> Vec<JobDescriptor> {
    (1..=count)
        .map(|i| {
            JobDescriptor::new(
                format!("encoding{i}"),
                "videos/input.mp4",
                format!("out/encoding{i}"),
            )
        })
        .collect()
}

pub fn dispatcher(count: usize, max_retries: u32) -> JobDispatcher {
    JobDispatcher::new(descriptors(count), RetryPolicy::new(max_retries)).unwrap()
}

/// Fast settings so tests finish in milliseconds.
pub fn settings(target_queue_size: usize) -> DriverSettings {
    DriverSettings {
        target_queue_size,
        poll_interval: Duration::from_millis(1),
        request_pause: Duration::ZERO,
    }
}

pub fn retryable(message: &str) -> Result<TaskReport, ServiceError> {
    Ok(TaskReport::failed(true, vec![message.to_string()]))
}

pub fn permanent(message: &str) -> Result<TaskReport, ServiceError> {
    Ok(TaskReport::failed(false, vec![message.to_string()]))
}

pub fn running() -> Result<TaskReport, ServiceError> {
    Ok(TaskReport::in_progress())
}

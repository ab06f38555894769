//! Retry policy shared by submission failures and remote task errors.

use std::time::Duration;

/// Default retry budget per job.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Tunable parameters for retrying failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retryable failures a job may accumulate before it is given up.
    pub max_retries: u32,
    /// Upper bound on an uninterrupted run of throttled submissions.
    /// `None` keeps retrying throttled submissions forever.
    pub throttle_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            throttle_timeout: None,
        }
    }
}

/// Outcome of applying the policy to one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the job back in the queue with the incremented counter.
    Retry { next_count: u32 },
    /// Stop trying; the job is terminal.
    GiveUp,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_throttle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.throttle_timeout = timeout;
        self
    }

    /// Decide what happens to a job that has already been retried
    /// `retry_count` times and just failed again.
    ///
    /// Non-retryable failures bypass the budget entirely.
    pub fn decide(&self, retry_count: u32, retryable: bool) -> RetryDecision {
        if !retryable || retry_count >= self.max_retries {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry {
                next_count: retry_count + 1,
            }
        }
    }

    /// Retries still available to a job at `retry_count`.
    pub fn retries_left(&self, retry_count: u32) -> u32 {
        self.max_retries.saturating_sub(retry_count)
    }

    /// Whether a throttling streak of `elapsed` has outlasted the cap.
    pub fn throttle_expired(&self, elapsed: Duration) -> bool {
        self.throttle_timeout
            .is_some_and(|timeout| elapsed > timeout)
    }
}

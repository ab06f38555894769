//! Fixed-interval polling with cancellation.
//!
//! [`poll_until`] keeps fetching a status until it satisfies a terminal
//! predicate, pausing `interval` between attempts, until the
//! [`CancellationToken`] fires or the optional overall timeout elapses.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default pause between two status fetches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Tunable parameters for [`poll_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Pause between two fetches.
    pub interval: Duration,
    /// Give up after this much time in total. `None` polls forever.
    pub timeout: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    #[error("Polling cancelled")]
    Cancelled,

    #[error("No terminal status within {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("Status fetch failed: {0}")]
    Fetch(E),
}

/// Sleep for `duration` unless `cancel` fires first.
///
/// Returns `false` if the sleep was cut short by cancellation.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Fetch a status repeatedly until `is_terminal` accepts it.
///
/// The first fetch happens immediately. A fetch error ends polling.
pub async fn poll_until<T, E, F, Fut, P>(
    mut fetch: F,
    is_terminal: P,
    options: &PollOptions,
    cancel: &CancellationToken,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&T) -> bool,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let value = tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            result = fetch() => result.map_err(PollError::Fetch)?,
        };

        if is_terminal(&value) {
            tracing::debug!(attempt, "Poll reached terminal status");
            return Ok(value);
        }

        let wait = match options.timeout {
            Some(timeout) => {
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    return Err(PollError::TimedOut(timeout));
                }
                options.interval.min(timeout - elapsed)
            }
            None => options.interval,
        };

        if !sleep_or_cancel(wait, cancel).await {
            return Err(PollError::Cancelled);
        }
    }
}

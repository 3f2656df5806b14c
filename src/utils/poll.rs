//! Bounded submit-then-poll loops.
//!
//! Some upstreams accept work in one call and publish the result later. The
//! poll loop is explicit so callers know exactly how many probes were made.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::sources::SourceError;

/// Bounds for a poll loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    /// Probes before giving up
    pub max_attempts: u32,
    /// Wait after the first pending probe
    pub initial_delay: Duration,
    /// Ceiling for the doubling delay
    pub max_delay: Duration,
    /// Ceiling for the summed waits
    pub max_total_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            max_total_wait: Duration::from_secs(60),
        }
    }
}

/// Outcome of a single probe
#[derive(Debug)]
pub enum PollStatus<T> {
    Ready(T),
    Pending,
}

/// A ready value and the probes it took
#[derive(Debug)]
pub struct Polled<T> {
    pub value: T,
    pub attempts: u32,
}

/// Probe until the value is ready.
///
/// `probe` receives the 1-based attempt number. Errors from a probe end the
/// loop immediately; running out of attempts or wait budget yields
/// [`SourceError::SearchTimeout`].
pub async fn poll_until<T, F, Fut>(policy: &PollPolicy, mut probe: F) -> Result<Polled<T>, SourceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PollStatus<T>, SourceError>>,
{
    let mut delay = policy.initial_delay;
    let mut waited = Duration::ZERO;
    let mut attempt = 0;

    loop {
        attempt += 1;

        if let PollStatus::Ready(value) = probe(attempt).await? {
            tracing::debug!("Poll ready after {} attempt(s)", attempt);
            return Ok(Polled {
                value,
                attempts: attempt,
            });
        }

        if attempt >= policy.max_attempts || waited + delay > policy.max_total_wait {
            tracing::warn!(
                "Poll gave up after {} attempt(s), waited {:?}",
                attempt,
                waited
            );
            return Err(SourceError::SearchTimeout {
                attempts: attempt,
                waited,
            });
        }

        sleep(delay).await;
        waited += delay;
        delay = (delay * 2).min(policy.max_delay);
    }
}

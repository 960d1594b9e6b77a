//! Backoff policy for chunk sends and fetches.
//!
//! Retries are unbounded in count. Delays escalate `1s -> 5s -> 15s -> 30s` and
//! then hold at the last step, so a sustained outage keeps the transfer
//! retrying until it is cancelled. Callers that need a hard ceiling must put a
//! deadline (or a cancellation) on top.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Result, StoreError};

/// Escalating delay schedule with a plateau at the last step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(5),
            Duration::from_secs(15),
            Duration::from_secs(30),
        ])
    }
}

impl RetryPolicy {
    /// Build a policy from an explicit schedule. An empty schedule retries immediately.
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        match self.delays.last() {
            None => Duration::ZERO,
            Some(last) => self.delays.get(attempt).copied().unwrap_or(*last),
        }
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or `cancel`
    /// fires while waiting between attempts.
    ///
    /// Cancellation is only observed during the backoff sleep; an in-flight
    /// attempt always runs to completion.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0usize;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        op = what,
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                        "transient failure, backing off"
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                    }
                    attempt += 1;
                }
            }
        }
    }
}

//! Retry and polling policies.
//!
//! Every retrying or polling call site shares these two types instead of
//! carrying its own loop; the ceilings are configuration, not constants
//! baked into call sites.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::warn;

use crate::error::{Error, Result};

/// Bounded retry with a fixed delay, for transient control-plane failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// The observed default for eventual-consistency lag: 3 attempts, 5s apart.
    pub const fn eventual_consistency() -> Self {
        Self::new(3, Duration::from_secs(5))
    }

    /// Run `op`, retrying transient failures up to `max_attempts` total
    /// attempts. Non-transient errors propagate immediately; an exhausted
    /// budget reports `Unrecoverable`.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(what, attempt, error = %e, "transient failure, retrying");
                    attempt += 1;
                    sleep(self.delay).await;
                }
                Err(e) if e.is_transient() => {
                    return Err(Error::Unrecoverable(format!(
                        "{what}: {e} (gave up after {attempt} attempts)"
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Sleep-based polling with a hard ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Poll `check` until it yields a value or the ceiling elapses.
    ///
    /// `check` returns `Ok(None)` to keep waiting; errors propagate
    /// immediately so a broken describe call is not mistaken for slowness.
    pub async fn wait_for<T, F, Fut>(&self, what: &str, mut check: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(v) = check().await? {
                return Ok(v);
            }
            if Instant::now() + self.interval > deadline {
                return Err(Error::Timeout(format!(
                    "{what}: no terminal state within {}s",
                    self.timeout.as_secs()
                )));
            }
            sleep(self.interval).await;
        }
    }
}

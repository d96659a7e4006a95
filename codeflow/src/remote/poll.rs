//! Convergence polling.
//!
//! The control plane applies changes asynchronously and offers no
//! notifications, so every mutation is followed by re-querying until the
//! expected state shows up or a wall-clock ceiling passes. A slow query
//! eats into the same window rather than extending it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

fn default_interval_ms() -> u64 {
    200
}

fn default_timeout_ms() -> u64 {
    5000
}

/// Interval and ceiling for convergence polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Delay between checks in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Wall-clock ceiling in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl PollPolicy {
    /// Creates the default policy (200 ms / 5 s).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the interval.
    #[must_use]
    pub const fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Sets the ceiling.
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Interval as a duration.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Ceiling as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Time source for polling.
#[async_trait]
pub trait Clock: Send + Sync + Debug {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;

    /// Waits for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Real time, sleeping on the tokio timer.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl SystemClock {
    /// Creates a clock with its origin at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Re-evaluates `condition` until it holds or the policy's ceiling passes.
///
/// Returns `Ok(false)` on timeout. Errors from the condition abort polling
/// and are returned as-is.
///
/// # Errors
///
/// Returns the first error produced by `condition`.
pub async fn poll_until<F, Fut, E>(
    policy: &PollPolicy,
    clock: &dyn Clock,
    what: &str,
    mut condition: F,
) -> Result<bool, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let start = clock.now();
    let mut checks: u32 = 0;
    loop {
        checks += 1;
        if condition().await? {
            debug!(what, checks, "Condition reached");
            return Ok(true);
        }
        let elapsed = clock.now().saturating_sub(start);
        if elapsed >= policy.timeout() {
            warn!(
                what,
                checks,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "Condition not reached before timeout"
            );
            return Ok(false);
        }
        clock.sleep(policy.interval()).await;
    }
}

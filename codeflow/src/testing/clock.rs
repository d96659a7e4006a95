//! A clock that only moves when told to.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

use crate::remote::Clock;

/// A [`Clock`] whose sleeps advance time instantly.
///
/// Polling under this clock runs without real delays, and the elapsed time
/// afterwards tells exactly how many intervals were waited.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_advances() {
        let clock = ManualClock::new();
        clock.sleep(Duration::from_millis(200)).await;
        clock.advance(Duration::from_millis(50));
        assert_eq!(clock.now(), Duration::from_millis(250));
    }
}

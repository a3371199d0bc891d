use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Source of time for rate limiting.
///
/// Limiters never read the system clock directly so that tests can drive
/// them deterministically.
#[async_trait]
pub trait Clock: Debug + Send + Sync {
    /// The current monotonic time
    fn now(&self) -> Instant;

    /// Suspend the caller for (at least) `duration`
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
///
/// Honors tokio's paused test time (`#[tokio::test(start_paused = true)]`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock that only moves when something sleeps on it.
///
/// Sleeping advances the clock by the requested duration and yields once,
/// which makes time-dependent code run instantly and reproducibly.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock starting at the current instant
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward by `duration`
    ///
    /// # Panics
    ///
    /// Panics if the offset mutex is poisoned
    pub fn advance(&self, duration: Duration) {
        *self.offset.lock().unwrap() += duration;
    }

    /// Time elapsed since the clock was created
    ///
    /// # Panics
    ///
    /// Panics if the offset mutex is poisoned
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

use rand::Rng;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::{Clock, RateLimitConfig, RateWindow, TokioClock};
use crate::Result;

/// Sliding-window rate limiter.
///
/// At most `max_calls` admissions fall into any window of `period` length.
/// Callers that find the window full sleep until the oldest admission ages
/// out (plus a random jitter, so that many waiters do not wake up at the
/// same instant) and then check again.
///
/// [`SlidingWindowRateLimiter::acquire`] never fails, but it may wait for a
/// long time under contention. Wrapping it in a timeout that is shorter than
/// `period` turns that wait into an observable timeout; callers who do so
/// accept starvation as a possible outcome.
#[derive(Debug)]
pub struct SlidingWindowRateLimiter<C = TokioClock> {
    window: Mutex<RateWindow>,
    jitter: Duration,
    clock: C,
}

impl SlidingWindowRateLimiter<TokioClock> {
    /// Create a limiter driven by the tokio timer
    ///
    /// # Errors
    ///
    /// Returns an error if `config` describes an empty window
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        Self::with_clock(config, TokioClock)
    }
}

impl<C: Clock> SlidingWindowRateLimiter<C> {
    /// Create a limiter driven by the given clock
    ///
    /// # Errors
    ///
    /// Returns an error if `config` describes an empty window
    pub fn with_clock(config: RateLimitConfig, clock: C) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            window: Mutex::new(RateWindow::new(config.max_calls, config.period)),
            jitter: config.jitter,
            clock,
        })
    }

    /// Wait until one more call can be issued without exceeding the limit,
    /// and record it.
    ///
    /// # Panics
    ///
    /// Panics if the window mutex is poisoned
    pub async fn acquire(&self) {
        loop {
            let wait = match self.window.lock().unwrap().try_admit(self.clock.now()) {
                Ok(()) => return,
                Err(wait) => wait,
            };
            let wait = wait + self.sample_jitter();
            log::trace!("Rate window full, waiting {}ms", wait.as_millis());
            self.clock.sleep(wait).await;
        }
    }

    /// Record an admission if the window has room, without waiting
    ///
    /// # Panics
    ///
    /// Panics if the window mutex is poisoned
    pub fn try_acquire(&self) -> bool {
        self.window
            .lock()
            .unwrap()
            .try_admit(self.clock.now())
            .is_ok()
    }

    /// Number of admissions inside the current window
    ///
    /// # Panics
    ///
    /// Panics if the window mutex is poisoned
    #[must_use]
    pub fn in_window(&self) -> usize {
        let mut window = self.window.lock().unwrap();
        window.purge(self.clock.now());
        window.len()
    }

    /// Snapshot of the admission timestamps inside the current window
    ///
    /// # Panics
    ///
    /// Panics if the window mutex is poisoned
    #[must_use]
    pub fn admissions(&self) -> Vec<Instant> {
        let mut window = self.window.lock().unwrap();
        window.purge(self.clock.now());
        window.iter().copied().collect()
    }

    /// The clock driving this limiter
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    fn sample_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        #[allow(clippy::cast_possible_truncation)]
        let max = self.jitter.as_micros() as u64;
        Duration::from_micros(rand::thread_rng().gen_range(0..=max))
    }
}

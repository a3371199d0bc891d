use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::{Clock, ThrottleConfig, TokioClock};
use crate::Result;

#[derive(Debug)]
struct Bucket {
    started: Instant,
    calls: usize,
}

/// Coarse, fixed-bucket call counter.
///
/// Counts calls in consecutive buckets of length `per`; once a bucket holds
/// `calls` calls, further callers sleep until the next bucket starts.
/// This is cheaper and looser than [`super::SlidingWindowRateLimiter`]: a
/// burst straddling a bucket boundary may briefly exceed the nominal rate.
/// It exists to smooth bursts on call paths that do not go through a
/// dispatcher.
#[derive(Debug)]
pub struct CallThrottle<C = TokioClock> {
    config: ThrottleConfig,
    bucket: Mutex<Bucket>,
    clock: C,
}

impl CallThrottle<TokioClock> {
    /// Create a throttle driven by the tokio timer
    ///
    /// # Errors
    ///
    /// Returns an error if `config` describes an empty bucket
    pub fn new(config: ThrottleConfig) -> Result<Self> {
        Self::with_clock(config, TokioClock)
    }
}

impl<C: Clock> CallThrottle<C> {
    /// Create a throttle driven by the given clock
    ///
    /// # Errors
    ///
    /// Returns an error if `config` describes an empty bucket
    pub fn with_clock(config: ThrottleConfig, clock: C) -> Result<Self> {
        config.validate()?;
        let started = clock.now();
        Ok(Self {
            config,
            bucket: Mutex::new(Bucket { started, calls: 0 }),
            clock,
        })
    }

    /// Count one call, sleeping first if the current bucket is exhausted
    ///
    /// # Panics
    ///
    /// Panics if the bucket mutex is poisoned
    pub async fn throttle(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().unwrap();
                let now = self.clock.now();
                let age = now.saturating_duration_since(bucket.started);
                if age >= self.config.per {
                    bucket.started = now;
                    bucket.calls = 0;
                }
                if bucket.calls < self.config.calls {
                    bucket.calls += 1;
                    return;
                }
                self.config.per.saturating_sub(age)
            };
            log::debug!(
                "Call throttle exhausted, pausing {}ms before the next call",
                wait.as_millis()
            );
            self.clock.sleep(wait).await;
        }
    }

    /// Calls counted in the current bucket
    ///
    /// # Panics
    ///
    /// Panics if the bucket mutex is poisoned
    #[must_use]
    pub fn calls_in_bucket(&self) -> usize {
        self.bucket.lock().unwrap().calls
    }

    /// The clock driving this throttle
    pub const fn clock(&self) -> &C {
        &self.clock
    }
}

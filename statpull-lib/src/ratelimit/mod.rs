//! Admission control for outbound calls.
//!
//! This module provides the two throttling primitives used by statpull:
//!
//! - [`SlidingWindowRateLimiter`]: strict limit of `max_calls` per rolling
//!   `period`, shared by all workers of a [`crate::Dispatcher`]
//! - [`CallThrottle`]: a coarse fixed-bucket counter used by the retry wrapper
//!   on call paths without a dispatcher
//!
//! Both are driven by a [`Clock`], so tests can run them on a [`ManualClock`]
//! or on tokio's paused time.

use async_trait::async_trait;
use std::fmt::Debug;

mod clock;
mod config;
mod limiter;
mod throttle;
mod window;

pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{
    DEFAULT_JITTER, DEFAULT_MAX_CALLS, DEFAULT_PERIOD, RateLimitConfig, ThrottleConfig,
};
pub use limiter::SlidingWindowRateLimiter;
pub use throttle::CallThrottle;
pub use window::RateWindow;

/// Anything that can hold a caller back until it may issue one more call.
///
/// The [`crate::Dispatcher`] takes its limiter as a trait object, so one
/// limiter instance (typically one per upstream service) can be injected and
/// shared.
#[async_trait]
pub trait Admission: Debug + Send + Sync {
    /// Wait until one more call may be issued and account for it
    async fn admit(&self);
}

#[async_trait]
impl<C: Clock> Admission for SlidingWindowRateLimiter<C> {
    async fn admit(&self) {
        self.acquire().await;
    }
}

#[async_trait]
impl<C: Clock> Admission for CallThrottle<C> {
    async fn admit(&self) {
        self.throttle().await;
    }
}

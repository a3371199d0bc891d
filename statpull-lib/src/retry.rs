use futures::FutureExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use typed_builder::TypedBuilder;

use crate::ratelimit::{Admission, CallThrottle, ThrottleConfig};
use crate::types::{IntoOutcome, Outcome, OutcomeKind};
use crate::{ErrorKind, Result};

/// Default number of attempts before a call is given up, 3.
pub const DEFAULT_RETRIES: u32 = 3;
/// Default base of the exponential backoff, 2 seconds.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
/// Default upper bound of the random delay added to every backoff, 1 second.
pub const DEFAULT_RETRY_JITTER: Duration = Duration::from_secs(1);

/// Backoff delays are capped here, however large `base_delay ^ attempt` grows
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// An extension trait to help determine if a classified call should be
/// attempted again.
pub(crate) trait RetryExt {
    fn should_retry(&self) -> bool;
}

impl RetryExt for OutcomeKind {
    #[allow(clippy::match_same_arms)]
    fn should_retry(&self) -> bool {
        match self {
            OutcomeKind::Success => false,
            OutcomeKind::RateLimited => true,
            OutcomeKind::NotFound => false,
            OutcomeKind::ServerError => true,
            OutcomeKind::Timeout => true,
            OutcomeKind::Malformed => false,
            OutcomeKind::Failed => false,
        }
    }
}

impl<T> RetryExt for Outcome<T> {
    fn should_retry(&self) -> bool {
        self.kind().should_retry()
    }
}

/// Serializable settings of a [`RetryPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base of the exponential backoff: attempt `n` waits `base_delay ^ n`
    /// seconds
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound of the random delay added to every backoff
    #[serde(default = "default_retry_jitter", with = "humantime_serde")]
    pub retry_jitter: Duration,

    /// Optional local throttle applied before every attempt
    #[serde(default)]
    pub throttle: Option<ThrottleConfig>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            retry_jitter: DEFAULT_RETRY_JITTER,
            throttle: None,
        }
    }
}

const fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

const fn default_base_delay() -> Duration {
    DEFAULT_BASE_DELAY
}

const fn default_retry_jitter() -> Duration {
    DEFAULT_RETRY_JITTER
}

impl RetryConfig {
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] if `retries` is zero or the
    /// throttle is empty
    pub fn validate(&self) -> Result<()> {
        if self.retries == 0 {
            return Err(ErrorKind::InvalidConfig(
                "`retries` must allow at least one attempt".into(),
            ));
        }
        if let Some(throttle) = &self.throttle {
            throttle.validate()?;
        }
        Ok(())
    }
}

/// What happened during [`RetryPolicy::call_with_retry_detailed`]
#[derive(Debug)]
pub struct RetryReport<T> {
    /// Number of times the callable was invoked
    pub attempts: u32,
    /// Classification of the last attempt, `None` if the callable panicked
    pub last: Option<OutcomeKind>,
    /// The payload, if an attempt succeeded
    pub value: Option<T>,
}

/// Classification-driven retry with exponential backoff.
///
/// Rate-limited, server-error and timed-out calls are retried up to
/// `retries` attempts in total. A missing resource, a malformed payload, any
/// other failure and a panicking callable end the call right away.
///
/// ```
/// # use statpull_lib::{Outcome, RetryPolicy};
/// # use std::time::Duration;
/// # #[tokio::main]
/// # async fn main() {
/// let policy = RetryPolicy::builder()
///     .retries(5)
///     .base_delay(Duration::from_millis(10))
///     .build();
/// let value = policy.call_with_retry(|| async { Outcome::Success(1) }).await;
/// assert_eq!(value, Some(1));
/// # }
/// ```
#[derive(TypedBuilder, Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    /// Zero is treated like one.
    #[builder(default = DEFAULT_RETRIES)]
    retries: u32,

    /// Base of the exponential backoff
    #[builder(default = DEFAULT_BASE_DELAY)]
    base_delay: Duration,

    /// Upper bound of the random delay added to every backoff
    #[builder(default = DEFAULT_RETRY_JITTER)]
    retry_jitter: Duration,

    /// Admission applied before every attempt, usually a [`CallThrottle`]
    #[builder(default, setter(strip_option))]
    throttle: Option<Arc<dyn Admission>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Build a policy, and its throttle if one is configured
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    pub fn from_config(config: &RetryConfig) -> Result<Self> {
        config.validate()?;
        let throttle = config
            .throttle
            .map(CallThrottle::new)
            .transpose()?
            .map(|throttle| Arc::new(throttle) as Arc<dyn Admission>);
        Ok(Self {
            retries: config.retries,
            base_delay: config.base_delay,
            retry_jitter: config.retry_jitter,
            throttle,
        })
    }

    /// Maximum number of attempts per call
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries.max(1)
    }

    /// Delay before attempt `attempt + 1`, jitter excluded
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64().powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    fn sample_jitter(&self) -> Duration {
        if self.retry_jitter.is_zero() {
            return Duration::ZERO;
        }
        #[allow(clippy::cast_possible_truncation)]
        let max = self.retry_jitter.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    /// Call `f` until it yields a payload or a terminal outcome.
    ///
    /// Returns the payload, or `None` if the call was given up.
    pub async fn call_with_retry<F, Fut, T>(&self, f: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future,
        Fut::Output: IntoOutcome<T>,
    {
        self.call_with_retry_detailed(f).await.value
    }

    /// Like [`RetryPolicy::call_with_retry`], also reporting how many attempts
    /// were made and how the last one was classified
    pub async fn call_with_retry_detailed<F, Fut, T>(&self, mut f: F) -> RetryReport<T>
    where
        F: FnMut() -> Fut,
        Fut: Future,
        Fut::Output: IntoOutcome<T>,
    {
        let retries = self.retries();
        let mut attempts = 0;
        loop {
            attempts += 1;
            if let Some(throttle) = &self.throttle {
                throttle.admit().await;
            }

            let attempt = AssertUnwindSafe(async { f().await.into_outcome() })
                .catch_unwind()
                .await;
            let outcome = match attempt {
                Ok(outcome) => outcome,
                Err(_) => {
                    log::error!("Call panicked on attempt {attempts}, giving up");
                    return RetryReport {
                        attempts,
                        last: None,
                        value: None,
                    };
                }
            };

            let kind = outcome.kind();
            match outcome {
                Outcome::Success(value) => {
                    return RetryReport {
                        attempts,
                        last: Some(kind),
                        value: Some(value),
                    };
                }
                outcome if outcome.should_retry() && attempts < retries => {
                    let wait = self.backoff(attempts) + self.sample_jitter();
                    log::warn!(
                        "Attempt {attempts}/{retries} was {kind}, retrying in {}ms",
                        wait.as_millis()
                    );
                    tokio::time::sleep(wait).await;
                }
                outcome if outcome.should_retry() => {
                    log::warn!("Giving up after {attempts} attempt(s), last one was {kind}");
                    return RetryReport {
                        attempts,
                        last: Some(kind),
                        value: None,
                    };
                }
                Outcome::NotFound => {
                    log::debug!("Resource not found, not retrying");
                    return RetryReport {
                        attempts,
                        last: Some(kind),
                        value: None,
                    };
                }
                Outcome::Malformed(reason) => {
                    log::error!("Malformed response: {reason}");
                    return RetryReport {
                        attempts,
                        last: Some(kind),
                        value: None,
                    };
                }
                outcome => {
                    if let Outcome::Failed(e) = &outcome {
                        log::error!("Call failed: {e}");
                    }
                    return RetryReport {
                        attempts,
                        last: Some(kind),
                        value: None,
                    };
                }
            }
        }
    }
}

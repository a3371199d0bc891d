use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ratelimit::RateLimitConfig;
use crate::{ErrorKind, Result};

/// Default number of dispatcher workers
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default deadline for a single dispatched call
pub const DEFAULT_PER_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration of a [`super::Dispatcher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Number of workers, i.e. the maximum number of calls in flight
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Deadline for a single call, not counting the time spent waiting for
    /// the rate limiter
    #[serde(default = "default_per_call_timeout", with = "humantime_serde")]
    pub per_call_timeout: Duration,

    /// Sliding-window limit applied before every call
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            per_call_timeout: DEFAULT_PER_CALL_TIMEOUT,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

const fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

const fn default_per_call_timeout() -> Duration {
    DEFAULT_PER_CALL_TIMEOUT
}

impl DispatcherConfig {
    /// Set the worker count
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the per-call deadline
    #[must_use]
    pub const fn with_per_call_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = timeout;
        self
    }

    /// Set the rate limit
    #[must_use]
    pub const fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Check the worker count and deadline.
    ///
    /// The rate limit is validated by the limiter itself.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] if `concurrency` or
    /// `per_call_timeout` is zero
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(ErrorKind::InvalidConfig(
                "`concurrency` must be greater than zero".into(),
            ));
        }
        if self.per_call_timeout.is_zero() {
            return Err(ErrorKind::InvalidConfig(
                "`per_call_timeout` must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_rate_limit_table() {
        let config: DispatcherConfig = toml::from_str(
            r#"
            concurrency = 3
            per_call_timeout = "2s"

            [rate_limit]
            max_calls = 4
            period = "500ms"
            "#,
        )
        .unwrap();

        assert_eq!(config.concurrency, 3);
        assert_eq!(config.per_call_timeout, Duration::from_secs(2));
        assert_eq!(config.rate_limit.max_calls, 4);
        assert_eq!(config.rate_limit.period, Duration::from_millis(500));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let config = DispatcherConfig::default().with_concurrency(0);
        assert!(matches!(config.validate(), Err(ErrorKind::InvalidConfig(_))));
    }
}

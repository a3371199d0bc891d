use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ErrorKind, Result};

/// Default number of admissions per window
pub const DEFAULT_MAX_CALLS: usize = 10;

/// Default length of the sliding window
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

/// Default upper bound of the random delay added to every limiter wait
pub const DEFAULT_JITTER: Duration = Duration::from_millis(50);

/// Sliding-window rate limit shared by every call of one dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Maximum number of calls admitted per `period`
    #[serde(default = "default_max_calls")]
    pub max_calls: usize,

    /// Length of the sliding window
    #[serde(default = "default_period", with = "humantime_serde")]
    pub period: Duration,

    /// Upper bound of the random delay added when a caller has to wait
    #[serde(default = "default_jitter", with = "humantime_serde")]
    pub jitter: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: DEFAULT_MAX_CALLS,
            period: DEFAULT_PERIOD,
            jitter: DEFAULT_JITTER,
        }
    }
}

const fn default_max_calls() -> usize {
    DEFAULT_MAX_CALLS
}

const fn default_period() -> Duration {
    DEFAULT_PERIOD
}

const fn default_jitter() -> Duration {
    DEFAULT_JITTER
}

impl RateLimitConfig {
    /// Create a configuration without jitter
    #[must_use]
    pub const fn new(max_calls: usize, period: Duration) -> Self {
        Self {
            max_calls,
            period,
            jitter: Duration::ZERO,
        }
    }

    /// Set the jitter bound
    #[must_use]
    pub const fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Reject windows that could never admit a call
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] if `max_calls` or `period` is zero
    pub fn validate(&self) -> Result<()> {
        if self.max_calls == 0 {
            return Err(ErrorKind::InvalidConfig(
                "`max_calls` must be greater than zero".into(),
            ));
        }
        if self.period.is_zero() {
            return Err(ErrorKind::InvalidConfig(
                "`period` must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Fixed-bucket call throttle used by the retry wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThrottleConfig {
    /// Calls allowed per bucket
    pub calls: usize,

    /// Bucket length
    #[serde(with = "humantime_serde")]
    pub per: Duration,
}

impl ThrottleConfig {
    /// Reject buckets that could never admit a call
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] if `calls` or `per` is zero
    pub fn validate(&self) -> Result<()> {
        if self.calls == 0 || self.per.is_zero() {
            return Err(ErrorKind::InvalidConfig(
                "throttle needs a non-zero call count and bucket length".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rate_limit_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_calls, 10);
        assert_eq!(config.period, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_sized_windows_are_rejected() {
        assert!(RateLimitConfig::new(0, Duration::from_secs(1)).validate().is_err());
        assert!(RateLimitConfig::new(5, Duration::ZERO).validate().is_err());

        let throttle = ThrottleConfig {
            calls: 0,
            per: Duration::from_secs(1),
        };
        assert!(throttle.validate().is_err());
    }

    #[test]
    fn test_config_deserialization() {
        let config: RateLimitConfig = toml::from_str(
            r#"
            max_calls = 30
            period = "1m"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_calls, 30);
        assert_eq!(config.period, Duration::from_secs(60));
        assert_eq!(config.jitter, DEFAULT_JITTER);
    }

    #[test]
    fn test_config_serialization() {
        let config = RateLimitConfig::new(15, Duration::from_millis(200));

        let toml = toml::to_string(&config).unwrap();
        let deserialized: RateLimitConfig = toml::from_str(&toml).unwrap();

        assert_eq!(config, deserialized);
    }
}

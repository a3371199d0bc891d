use serde::Serialize;
use serde::ser::SerializeStruct;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::request::CallStatus;

/// Number of call durations kept for the median
const CALL_TIME_SAMPLES: usize = 1024;

/// Record and report statistics for a [`crate::Dispatcher`]
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    /// Requests accepted by `submit`/`dispatch`
    pub submitted: u64,
    /// Calls that returned a value
    pub succeeded: u64,
    /// Calls that returned an error of their own
    pub failed: u64,
    /// Calls that exceeded the per-call deadline
    pub timed_out: u64,
    /// Calls that panicked
    pub panicked: u64,
    /// Requests resolved as cancelled by a shutdown
    pub cancelled: u64,
    /// Timestamp of the last successful call
    pub last_success: Option<Instant>,
    /// Most recent call durations, oldest first
    call_times: VecDeque<Duration>,
}

impl DispatchStats {
    pub(crate) fn record_submitted(&mut self) {
        self.submitted += 1;
    }

    pub(crate) fn record_call(&mut self, status: CallStatus) {
        match status {
            CallStatus::Succeeded(elapsed) => {
                self.succeeded += 1;
                self.last_success = Some(Instant::now());
                self.push_call_time(elapsed);
            }
            CallStatus::Failed(elapsed) => {
                self.failed += 1;
                self.push_call_time(elapsed);
            }
            CallStatus::TimedOut => self.timed_out += 1,
            CallStatus::Panicked => self.panicked += 1,
        }
    }

    fn push_call_time(&mut self, elapsed: Duration) {
        if self.call_times.len() >= CALL_TIME_SAMPLES {
            self.call_times.pop_front();
        }
        self.call_times.push_back(elapsed);
    }

    /// Number of calls that ran to a terminal state on a worker
    #[must_use]
    pub const fn completed(&self) -> u64 {
        self.succeeded + self.failed + self.timed_out + self.panicked
    }

    /// Get median call time
    #[must_use]
    pub fn median_call_time(&self) -> Option<Duration> {
        if self.call_times.is_empty() {
            return None;
        }

        let mut times: Vec<_> = self.call_times.iter().copied().collect();
        times.sort();
        let mid = times.len() / 2;

        if times.len().is_multiple_of(2) {
            // Average of two middle values
            Some((times[mid - 1] + times[mid]) / 2)
        } else {
            Some(times[mid])
        }
    }

    /// Get the current success rate (0.0 to 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let completed = self.completed();
        if completed == 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.succeeded as f64 / completed as f64;
        rate
    }
}

impl Serialize for DispatchStats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("DispatchStats", 7)?;
        s.serialize_field("submitted", &self.submitted)?;
        s.serialize_field("succeeded", &self.succeeded)?;
        s.serialize_field("failed", &self.failed)?;
        s.serialize_field("timed_out", &self.timed_out)?;
        s.serialize_field("panicked", &self.panicked)?;
        s.serialize_field("cancelled", &self.cancelled)?;
        s.serialize_field(
            "median_call_time_ms",
            &self.median_call_time().map(|d| d.as_millis()),
        )?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_call_time() {
        let mut stats = DispatchStats::default();
        assert_eq!(stats.median_call_time(), None);

        for ms in [40, 10, 30] {
            stats.record_call(CallStatus::Succeeded(Duration::from_millis(ms)));
        }
        assert_eq!(stats.median_call_time(), Some(Duration::from_millis(30)));

        stats.record_call(CallStatus::Failed(Duration::from_millis(20)));
        assert_eq!(stats.median_call_time(), Some(Duration::from_millis(25)));
    }

    #[test]
    fn test_success_rate_counts_timeouts() {
        let mut stats = DispatchStats::default();
        assert!((stats.success_rate() - 1.0).abs() < f64::EPSILON);

        stats.record_call(CallStatus::Succeeded(Duration::from_millis(5)));
        stats.record_call(CallStatus::TimedOut);
        assert!((stats.success_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.completed(), 2);
    }

    #[test]
    fn test_call_time_sample_is_bounded() {
        let mut stats = DispatchStats::default();
        for _ in 0..CALL_TIME_SAMPLES + 10 {
            stats.record_call(CallStatus::Succeeded(Duration::from_millis(1)));
        }
        assert_eq!(stats.call_times.len(), CALL_TIME_SAMPLES);
        assert_eq!(stats.succeeded, (CALL_TIME_SAMPLES + 10) as u64);
    }
}

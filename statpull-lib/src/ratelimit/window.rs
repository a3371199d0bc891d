use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Admission timestamps of the last `period`, oldest first.
///
/// The window never holds more than `max_calls` timestamps that are younger
/// than `period`. Stale timestamps are only dropped by [`RateWindow::purge`],
/// which callers run before every admission check.
#[derive(Debug, Clone)]
pub struct RateWindow {
    stamps: VecDeque<Instant>,
    max_calls: usize,
    period: Duration,
}

impl RateWindow {
    /// Create an empty window admitting `max_calls` per `period`
    #[must_use]
    pub fn new(max_calls: usize, period: Duration) -> Self {
        Self {
            stamps: VecDeque::with_capacity(max_calls),
            max_calls,
            period,
        }
    }

    /// Drop every timestamp at or before `now - period`
    pub fn purge(&mut self, now: Instant) {
        while let Some(&oldest) = self.stamps.front() {
            if now.saturating_duration_since(oldest) >= self.period {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Try to record an admission at `now`.
    ///
    /// Returns `Ok(())` if the admission was recorded, otherwise the time
    /// until the oldest timestamp leaves the window.
    pub fn try_admit(&mut self, now: Instant) -> Result<(), Duration> {
        self.purge(now);
        if self.stamps.len() < self.max_calls {
            self.stamps.push_back(now);
            return Ok(());
        }
        let oldest = self.stamps.front().copied().unwrap_or(now);
        Err(self
            .period
            .saturating_sub(now.saturating_duration_since(oldest)))
    }

    /// Number of timestamps currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    /// Check if the window is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// Get an iterator over the admission timestamps, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Instant> {
        self.stamps.iter()
    }

    /// Maximum admissions per period
    #[must_use]
    pub const fn max_calls(&self) -> usize {
        self.max_calls
    }

    /// Length of the sliding window
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }
}

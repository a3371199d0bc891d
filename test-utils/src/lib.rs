//! `test-utils` is used for testing in both `statpull-lib` and `statpull-bin`.
//! This crate does not depend on `statpull-lib` or `statpull-bin`, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

use log::{LevelFilter, Log, Metadata, Record};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once, PoisonError};

/// Create a mock web server, which responds with a predefined status when
/// handling a matching request
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Mount a JSON response for `GET $path` on an existing mock server
#[macro_export]
macro_rules! mount_json {
    ($server:expr, $path:expr, $body:expr) => {
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path($path))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json($body))
            .mount(&$server)
            .await
    };
}

/// Records how many tasks are inside a section at once.
///
/// Clones share their counters, so a gauge can be moved into many tasks.
///
/// ```
/// let gauge = test_utils::ConcurrencyGauge::new();
/// {
///     let _a = gauge.enter();
///     let _b = gauge.enter();
///     assert_eq!(gauge.active(), 2);
/// }
/// assert_eq!(gauge.active(), 0);
/// assert_eq!(gauge.max_active(), 2);
/// assert_eq!(gauge.total(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyGauge {
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    max_active: AtomicUsize,
    total: AtomicUsize,
}

impl ConcurrencyGauge {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one task as inside the section until the returned guard is dropped
    #[must_use]
    pub fn enter(&self) -> GaugeGuard {
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_active.fetch_max(active, Ordering::SeqCst);
        self.counters.total.fetch_add(1, Ordering::SeqCst);
        GaugeGuard {
            counters: Arc::clone(&self.counters),
        }
    }

    #[must_use]
    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Highest number of tasks seen inside the section at the same time
    #[must_use]
    pub fn max_active(&self) -> usize {
        self.counters.max_active.load(Ordering::SeqCst)
    }

    /// Number of times the section was entered
    #[must_use]
    pub fn total(&self) -> usize {
        self.counters.total.load(Ordering::SeqCst)
    }
}

/// Returned by [`ConcurrencyGauge::enter`]
#[derive(Debug)]
pub struct GaugeGuard {
    counters: Arc<Counters>,
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Log lines emitted anywhere in the test binary, as `[LEVEL] message`
#[derive(Debug)]
pub struct LogCapture {
    lines: Mutex<Vec<String>>,
}

static LOGS: LogCapture = LogCapture {
    lines: Mutex::new(Vec::new()),
};

/// Install the capturing logger for the current test binary.
///
/// Later calls return the same capture. Tests run in parallel, so assertions
/// should look for messages unique to the test.
///
/// ```
/// let logs = test_utils::capture_logs();
/// log::warn!("platform returned 429 for team 7");
/// assert_eq!(logs.count("[WARN] platform returned 429 for team 7"), 1);
/// ```
pub fn capture_logs() -> &'static LogCapture {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if log::set_logger(&LOGS).is_ok() {
            log::set_max_level(LevelFilter::Trace);
        }
    });
    &LOGS
}

impl LogCapture {
    /// Number of captured lines containing `needle`
    #[must_use]
    pub fn count(&self, needle: &str) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }
}

impl Log for LogCapture {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        let line = format!("[{}] {}", record.level(), record.args());
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }

    fn flush(&self) {}
}

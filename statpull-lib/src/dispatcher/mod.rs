//! Bounded-concurrency, rate-limited request dispatcher.
//!
//! A [`Dispatcher`] owns a fixed pool of `concurrency` workers. Callers hand
//! it async closures; each worker pulls one request at a time off a FIFO
//! queue, waits for the shared rate limiter, runs the closure under a
//! deadline and resolves the caller's [`ResultHandle`].
//!
//! ```
//! use statpull_lib::{Dispatcher, DispatcherConfig, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let dispatcher = Dispatcher::new(DispatcherConfig::default())?;
//!     dispatcher.start();
//!     let answer = dispatcher.submit(|| async { Ok(6 * 7) }).await?;
//!     assert_eq!(answer, 42);
//!     dispatcher.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! Throughput is bounded by `min(concurrency, max_calls / period)`.

mod config;
mod request;
mod stats;

pub use config::{DEFAULT_CONCURRENCY, DEFAULT_PER_CALL_TIMEOUT, DispatcherConfig};
pub use request::ResultHandle;
pub(crate) use request::panic_message;
pub use stats::DispatchStats;

use async_channel::{Receiver, Sender};
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::ratelimit::{Admission, SlidingWindowRateLimiter};
use crate::waiter::DrainBarrier;
use crate::{ErrorKind, Result};
use request::CallRequest;

/// State shared by the dispatcher handle and its workers
#[derive(Debug)]
struct Shared {
    limiter: Arc<dyn Admission>,
    per_call_timeout: Duration,
    stats: Mutex<DispatchStats>,
    in_flight: AtomicUsize,
    /// Bumped by every request dropped before it was resolved
    cancelled: Arc<AtomicU64>,
}

/// A started worker pool
#[derive(Debug)]
struct Running {
    queue: Sender<CallRequest>,
    backlog: Receiver<CallRequest>,
    workers: Vec<JoinHandle<()>>,
}

impl Running {
    /// Close the queue, abort the workers and drop every queued request.
    ///
    /// Returns the worker handles, so the caller can decide whether to await
    /// them. In-flight requests are cancelled once their worker unwinds.
    fn tear_down(self) -> Vec<JoinHandle<()>> {
        self.queue.close();
        for worker in &self.workers {
            worker.abort();
        }
        while let Ok(request) = self.backlog.try_recv() {
            log::debug!("Cancelling queued request {:?}", request.id);
        }
        self.workers
    }
}

#[derive(Debug)]
struct Inner {
    concurrency: usize,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
    barrier: DrainBarrier,
}

impl Inner {
    fn take_running(&self) -> Option<Running> {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(running) = self.take_running() {
            let unresolved = self.barrier.outstanding();
            running.tear_down();
            log::debug!("Dispatcher dropped while running, cancelled {unresolved} request(s)");
        }
    }
}

/// Bounded-concurrency, rate-limited request dispatcher.
///
/// Cloning a dispatcher is cheap and yields another handle to the same
/// worker pool, queue and limiter, so a single dispatcher can be shared by
/// many unrelated callers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a stopped dispatcher with its own sliding-window limiter
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        let limiter = SlidingWindowRateLimiter::new(config.rate_limit)?;
        Self::with_limiter(config, Arc::new(limiter))
    }

    /// Create a stopped dispatcher that admits calls through `limiter`.
    ///
    /// `config.rate_limit` is ignored in favor of the injected limiter.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    pub fn with_limiter(config: DispatcherConfig, limiter: Arc<dyn Admission>) -> Result<Self> {
        config.validate()?;
        let shared = Shared {
            limiter,
            per_call_timeout: config.per_call_timeout,
            stats: Mutex::new(DispatchStats::default()),
            in_flight: AtomicUsize::new(0),
            cancelled: Arc::new(AtomicU64::new(0)),
        };
        Ok(Self {
            inner: Arc::new(Inner {
                concurrency: config.concurrency,
                shared: Arc::new(shared),
                running: Mutex::new(None),
                barrier: DrainBarrier::new(),
            }),
        })
    }

    /// Start the worker pool and return a guard that stops it when dropped
    #[must_use]
    pub fn scoped(&self) -> DispatcherGuard {
        self.start();
        DispatcherGuard {
            dispatcher: self.clone(),
        }
    }

    /// Spawn the workers. Does nothing if the dispatcher is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            log::debug!("Dispatcher already running");
            return;
        }

        let (queue, backlog) = async_channel::unbounded();
        let workers = (0..self.inner.concurrency)
            .map(|worker_id| {
                tokio::spawn(work(
                    worker_id,
                    backlog.clone(),
                    Arc::clone(&self.inner.shared),
                ))
            })
            .collect();
        log::debug!(
            "Started dispatcher with {} worker(s)",
            self.inner.concurrency
        );
        *running = Some(Running {
            queue,
            backlog,
            workers,
        });
    }

    /// Stop the workers and wait for them to exit.
    ///
    /// Requests that are still queued or running are resolved with
    /// [`ErrorKind::Cancelled`]. Does nothing if the dispatcher is not
    /// running.
    pub async fn stop(&self) {
        let Some(running) = self.inner.take_running() else {
            return;
        };
        let unresolved = self.inner.barrier.outstanding();
        for worker in running.tear_down() {
            // Aborted workers report a cancelled `JoinError`
            let _ = worker.await;
        }
        log_shutdown(unresolved);
    }

    /// Stop without waiting for the aborted workers to unwind
    fn stop_now(&self) {
        if let Some(running) = self.inner.take_running() {
            let unresolved = self.inner.barrier.outstanding();
            running.tear_down();
            log_shutdown(unresolved);
        }
    }

    /// Queue a call and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns the callable's own error, [`ErrorKind::Timeout`] if the call
    /// exceeded the per-call deadline, [`ErrorKind::Cancelled`] if the
    /// dispatcher was stopped first, or [`ErrorKind::NotRunning`] if it was
    /// never started.
    pub async fn submit<F, Fut, T>(&self, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.dispatch(call)?.await
    }

    /// Like [`Dispatcher::submit`], tagging the request with a correlation id
    /// that shows up in log lines and in timeout/cancellation errors.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::submit`]
    pub async fn submit_with_id<F, Fut, T>(&self, id: impl Into<String>, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(Some(id.into()), call)?.await
    }

    /// Queue a call and return its handle without waiting
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NotRunning`] if the dispatcher is not running
    pub fn dispatch<F, Fut, T>(&self, call: F) -> Result<ResultHandle<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(None, call)
    }

    fn enqueue<F, Fut, T>(&self, id: Option<String>, call: F) -> Result<ResultHandle<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        // Held until the request is queued, so `stop` cannot close the queue
        // in between
        let running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(running) = running.as_ref() else {
            return Err(ErrorKind::NotRunning);
        };

        let (request, handle) = CallRequest::new(
            id,
            call,
            self.inner.barrier.guard(),
            Arc::clone(&self.inner.shared.cancelled),
        );
        running
            .queue
            .try_send(request)
            .map_err(|_| ErrorKind::NotRunning)?;
        self.inner
            .shared
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_submitted();
        Ok(handle)
    }

    /// Wait until every request submitted so far has been resolved
    pub async fn join(&self) {
        self.inner.barrier.wait().await;
    }

    /// Requests that are queued or running
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.barrier.outstanding()
    }

    /// Requests taken off the queue by a worker and not yet resolved,
    /// including those waiting for the rate limiter
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Whether the worker pool is started
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Number of workers spawned on start
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Snapshot of the call statistics
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        let shared = &self.inner.shared;
        let mut stats = shared
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        stats.cancelled = shared.cancelled.load(Ordering::SeqCst);
        stats
    }
}

fn log_shutdown(unresolved: usize) {
    if unresolved > 0 {
        log::warn!("Dispatcher stopped with {unresolved} unresolved request(s)");
    }
    log::debug!("Dispatcher stopped");
}

/// Marks a call as running for as long as it is alive
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Worker loop: one request at a time until the queue closes or the task is
/// aborted. A failing call never ends the loop.
async fn work(worker_id: usize, backlog: Receiver<CallRequest>, shared: Arc<Shared>) {
    while let Ok(CallRequest { id, job, guard }) = backlog.recv().await {
        let status = {
            let _in_flight = InFlight::enter(&shared.in_flight);
            shared.limiter.admit().await;
            job(shared.per_call_timeout).await
        };
        log::trace!("Worker {worker_id} finished request {id:?}: {status:?}");

        shared
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_call(status);
        guard.done();
    }
    log::trace!("Worker {worker_id} exiting");
}

/// Scoped acquisition of a running [`Dispatcher`].
///
/// The worker pool is stopped when the guard goes out of scope, including on
/// early returns and panics. Use [`DispatcherGuard::stop`] to stop it
/// explicitly and wait for the workers to exit.
#[derive(Debug)]
pub struct DispatcherGuard {
    dispatcher: Dispatcher,
}

impl DispatcherGuard {
    /// Stop the dispatcher and wait for its workers to exit
    pub async fn stop(self) {
        self.dispatcher.stop().await;
    }
}

impl Deref for DispatcherGuard {
    type Target = Dispatcher;

    fn deref(&self) -> &Self::Target {
        &self.dispatcher
    }
}

impl Drop for DispatcherGuard {
    fn drop(&mut self) {
        self.dispatcher.stop_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::RateLimitConfig;
    use futures::future::join_all;
    use pretty_assertions::assert_eq;
    use test_utils::ConcurrencyGauge;

    fn fast_config(concurrency: usize) -> DispatcherConfig {
        DispatcherConfig::default()
            .with_concurrency(concurrency)
            .with_rate_limit(RateLimitConfig::new(1000, Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_submit_returns_value() {
        let dispatcher = Dispatcher::new(fast_config(2)).unwrap();
        dispatcher.start();

        let value = dispatcher.submit(|| async { Ok("ok") }).await;
        assert_eq!(value, Ok("ok"));

        dispatcher.stop().await;
        assert!(!dispatcher.is_running());
    }

    #[tokio::test]
    async fn test_submit_requires_start() {
        let dispatcher = Dispatcher::new(fast_config(1)).unwrap();
        let result = dispatcher.submit(|| async { Ok(()) }).await;
        assert_eq!(result, Err(ErrorKind::NotRunning));
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let dispatcher = Dispatcher::new(fast_config(3)).unwrap();
        dispatcher.start();
        dispatcher.start();
        assert!(dispatcher.is_running());

        dispatcher.stop().await;
        dispatcher.stop().await;
        assert!(!dispatcher.is_running());

        // Can be started again after a stop
        dispatcher.start();
        assert_eq!(dispatcher.submit(|| async { Ok(1) }).await, Ok(1));
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let dispatcher = Dispatcher::new(fast_config(3)).unwrap();
        dispatcher.start();
        let gauge = ConcurrencyGauge::new();

        let calls = (0..10).map(|_| {
            let gauge = gauge.clone();
            dispatcher.submit(move || async move {
                let _active = gauge.enter();
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
        });
        let results = join_all(calls).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(gauge.max_active(), 3);
        assert_eq!(gauge.total(), 10);
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_failed_call_does_not_kill_worker() {
        let dispatcher = Dispatcher::new(fast_config(1)).unwrap();
        dispatcher.start();

        let failed = dispatcher
            .submit(|| async { Err::<(), _>(ErrorKind::call("upstream said no")) })
            .await;
        assert_eq!(failed, Err(ErrorKind::call("upstream said no")));

        let panicked = dispatcher
            .submit(|| async {
                if true {
                    panic!("bad payload");
                }
                Ok(())
            })
            .await;
        assert_eq!(panicked, Err(ErrorKind::Panicked("bad payload".into())));

        // The single worker is still alive
        assert_eq!(dispatcher.submit(|| async { Ok(5) }).await, Ok(5));

        let stats = dispatcher.stats();
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.succeeded, 1);
        dispatcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported_per_call() {
        let config = fast_config(2).with_per_call_timeout(Duration::from_secs(10));
        let dispatcher = Dispatcher::new(config).unwrap();
        dispatcher.start();

        let slow = dispatcher.submit_with_id("slow", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        let fast = dispatcher.submit(|| async { Ok(()) });
        let (slow, fast) = futures::join!(slow, fast);

        assert_eq!(
            slow,
            Err(ErrorKind::Timeout(Duration::from_secs(10), Some("slow".into())))
        );
        assert_eq!(fast, Ok(()));
        assert_eq!(dispatcher.stats().timed_out, 1);
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_stop_cancels_in_flight_and_queued() {
        let dispatcher = Dispatcher::new(fast_config(4)).unwrap();
        dispatcher.start();

        let handles: Vec<ResultHandle<()>> = (0..6)
            .map(|_| {
                dispatcher
                    .dispatch(|| futures::future::pending::<Result<()>>())
                    .unwrap()
            })
            .collect();

        while dispatcher.in_flight() < 4 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        dispatcher.stop().await;

        let results = tokio::time::timeout(Duration::from_secs(1), join_all(handles))
            .await
            .expect("all handles resolve after stop");
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| matches!(r, Err(e) if e.is_cancelled())));
        assert_eq!(dispatcher.stats().cancelled, 6);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_every_request_is_counted_once_after_stop() {
        let dispatcher = Dispatcher::new(fast_config(1)).unwrap();
        dispatcher.start();

        for i in 0..2 {
            assert_eq!(dispatcher.submit(move || async move { Ok(i) }).await, Ok(i));
        }
        let handles: Vec<ResultHandle<()>> = (0..3)
            .map(|_| {
                dispatcher
                    .dispatch(|| futures::future::pending::<Result<()>>())
                    .unwrap()
            })
            .collect();
        while dispatcher.in_flight() < 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        dispatcher.stop().await;
        join_all(handles).await;

        let stats = dispatcher.stats();
        assert_eq!(stats.submitted, 5);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.cancelled, 3);
        assert_eq!(stats.completed() + stats.cancelled, stats.submitted);
    }

    #[tokio::test]
    async fn test_join_waits_for_all_requests() {
        let dispatcher = Dispatcher::new(fast_config(2)).unwrap();
        dispatcher.start();

        let handles: Vec<_> = (0..5u64)
            .map(|i| {
                dispatcher
                    .dispatch(move || async move {
                        tokio::time::sleep(Duration::from_millis(10 * i)).await;
                        Ok(i)
                    })
                    .unwrap()
            })
            .collect();

        dispatcher.join().await;
        assert_eq!(dispatcher.pending(), 0);
        assert_eq!(dispatcher.stats().completed(), 5);

        let values: Vec<_> = join_all(handles).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_scoped_guard_stops_on_drop() {
        let dispatcher = Dispatcher::new(fast_config(1)).unwrap();
        let handle = {
            let guard = dispatcher.scoped();
            assert!(guard.is_running());
            guard
                .dispatch(|| futures::future::pending::<Result<()>>())
                .unwrap()
        };

        assert!(!dispatcher.is_running());
        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(matches!(result, Ok(Err(ErrorKind::Cancelled(None)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_limiter_caps_throughput() {
        let config = DispatcherConfig::default().with_concurrency(8);
        let limiter = Arc::new(
            SlidingWindowRateLimiter::new(RateLimitConfig::new(4, Duration::from_secs(1)))
                .unwrap(),
        );
        let dispatcher = Dispatcher::with_limiter(config, limiter.clone()).unwrap();
        dispatcher.start();
        let start = tokio::time::Instant::now();

        let calls = (0..10).map(|_| dispatcher.submit(|| async { Ok(()) }));
        join_all(calls).await;

        // 4 at t=0, 4 at t=1s, 2 at t=2s
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(limiter.in_window(), 2);
        dispatcher.stop().await;
    }
}

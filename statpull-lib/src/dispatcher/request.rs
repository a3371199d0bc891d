use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, ready};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use crate::waiter::WorkGuard;
use crate::{ErrorKind, Result};

/// How a dispatched call ended, as seen by the worker that ran it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallStatus {
    Succeeded(Duration),
    Failed(Duration),
    TimedOut,
    Panicked,
}

impl CallStatus {
    fn of<T>(result: &Result<T>, elapsed: Duration) -> Self {
        match result {
            Ok(_) => Self::Succeeded(elapsed),
            Err(ErrorKind::Timeout(..)) => Self::TimedOut,
            Err(ErrorKind::Panicked(_)) => Self::Panicked,
            Err(_) => Self::Failed(elapsed),
        }
    }
}

/// Type-erased call: runs the callable under the given deadline and resolves
/// the caller's handle.
type Job = Box<dyn FnOnce(Duration) -> BoxFuture<'static, CallStatus> + Send>;

/// Sending half of a [`ResultHandle`].
///
/// Dropped unresolved, it bumps the dispatcher's cancellation counter. This
/// happens wherever the request dies: drained from the queue on shutdown, or
/// inside a worker that was aborted mid-call.
struct Resolver<T> {
    tx: Option<oneshot::Sender<Result<T>>>,
    cancelled: Arc<AtomicU64>,
}

impl<T> Resolver<T> {
    fn resolve(mut self, result: Result<T>) {
        if let Some(tx) = self.tx.take() {
            // The caller may have dropped its handle; there is nobody
            // left to resolve then.
            let _ = tx.send(result);
        }
    }
}

impl<T> Drop for Resolver<T> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A unit of work queued on a [`super::Dispatcher`].
///
/// Dropping a request that has not been run (e.g. on shutdown) resolves the
/// caller's [`ResultHandle`] with [`ErrorKind::Cancelled`], because the
/// sending half of its channel goes away with it.
pub(crate) struct CallRequest {
    pub(crate) id: Option<String>,
    pub(crate) job: Job,
    pub(crate) guard: WorkGuard,
}

impl std::fmt::Debug for CallRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRequest").field("id", &self.id).finish()
    }
}

impl CallRequest {
    pub(crate) fn new<F, Fut, T>(
        id: Option<String>,
        call: F,
        guard: WorkGuard,
        cancelled: Arc<AtomicU64>,
    ) -> (Self, ResultHandle<T>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let resolver = Resolver {
            tx: Some(tx),
            cancelled,
        };
        let call_id = id.clone();
        let job: Job = Box::new(move |deadline| {
            Box::pin(async move {
                let started = Instant::now();
                let guarded = AssertUnwindSafe(async move { call().await }).catch_unwind();
                let result = match tokio::time::timeout(deadline, guarded).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(panic)) => Err(ErrorKind::Panicked(panic_message(panic.as_ref()))),
                    Err(_) => Err(ErrorKind::Timeout(deadline, call_id)),
                };
                let status = CallStatus::of(&result, started.elapsed());
                resolver.resolve(result);
                status
            })
        });
        let handle = ResultHandle {
            rx,
            id: id.clone(),
        };
        (Self { id, job, guard }, handle)
    }
}

/// The eventual result of a dispatched call.
///
/// Resolves exactly once: with the callable's value or error, with
/// [`ErrorKind::Timeout`], or with [`ErrorKind::Cancelled`] if the dispatcher
/// stopped before the call completed.
#[derive(Debug)]
#[must_use = "a result handle does nothing unless awaited"]
pub struct ResultHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
    id: Option<String>,
}

impl<T> ResultHandle<T> {
    /// Correlation id supplied at submission, if any
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl<T> Future for ResultHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let received = ready!(Pin::new(&mut self.rx).poll(cx));
        Poll::Ready(match received {
            Ok(result) => result,
            Err(_) => Err(ErrorKind::Cancelled(self.id.clone())),
        })
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

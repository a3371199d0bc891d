//! Fan-out/fan-in aggregation over a dynamically discovered set of entities.
//!
//! [`Aggregator::run`] takes the work items of a planning step and an async
//! handler. A pool of `pool_size` workers drains the items; every batch of
//! records a handler returns is merged into shared [`Collection`]s, which
//! keep at most one record per natural key no matter how many workers
//! fetched it.
//!
//! Shutdown is a two-phase handshake: once every item has been marked done
//! on a [`DrainBarrier`], one stop message per worker is queued and the
//! workers are awaited. No item is dropped and no worker outlives the run.
//! A panic in a handler or in the merge of its records is recorded as an
//! item failure; any other worker panic is propagated out of `run`.

mod batch;
mod collection;
pub mod plan;

pub use batch::Batch;
pub use collection::{Collection, Keyed};

use async_channel::Receiver;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::dispatcher::panic_message;
use crate::waiter::{DrainBarrier, WorkGuard};
use crate::{ErrorKind, Result};

/// Default number of aggregation workers
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Configuration of an [`Aggregator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregatorConfig {
    /// Number of workers draining the work items.
    ///
    /// Usually smaller than the dispatcher's concurrency, as a single
    /// handler may issue several calls.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

const fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

impl AggregatorConfig {
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] if `pool_size` is zero
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(ErrorKind::InvalidConfig(
                "`pool_size` must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// A work item whose handler failed or panicked
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    /// `Debug` rendering of the work item
    pub item: String,
    /// What went wrong
    pub error: String,
}

/// Bookkeeping of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Work items handled, including failed ones
    pub processed: usize,
    /// Records merged into the collections
    pub merged: usize,
    /// Work items whose handler failed, in completion order
    pub failed: Vec<ItemFailure>,
}

impl RunSummary {
    /// Work items whose handler returned records
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.processed - self.failed.len()
    }

    /// Whether every work item was handled successfully
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The merged result of one [`Aggregator::run`]
#[derive(Debug)]
pub struct Harvest<S> {
    /// Deduplicated collections, e.g. `(Collection<Team>, Collection<Match>)`
    pub collections: S,
    /// What happened to the individual work items
    pub summary: RunSummary,
}

/// Shared destination of a run, guarded by a single lock
#[derive(Debug, Default)]
struct RunState<S> {
    collections: S,
    summary: RunSummary,
}

/// Message on the aggregation queue
#[derive(Debug)]
enum Job<W> {
    Item(W, WorkGuard),
    Stop,
}

/// Runs fan-out aggregations with a fixed-size worker pool.
///
/// ```
/// use statpull_lib::{Aggregator, AggregatorConfig, Keyed, Result};
///
/// #[derive(Debug)]
/// struct Team(u32);
///
/// impl Keyed for Team {
///     type Key = u32;
///
///     fn key(&self) -> u32 {
///         self.0
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let aggregator = Aggregator::new(AggregatorConfig::default());
///     // Every division lists team 1
///     let harvest = aggregator
///         .run(1..=3, |division: u32| async move { Ok(vec![Team(1), Team(division * 10)]) })
///         .await?;
///     assert_eq!(harvest.collections.len(), 4);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Aggregator {
    config: AggregatorConfig,
}

impl Aggregator {
    #[must_use]
    pub const fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Handle every item and merge the produced records.
    ///
    /// A failing or panicking handler is logged and recorded in the
    /// [`RunSummary`]; the records of all other items are still merged.
    /// Dropping the returned future aborts the workers.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::EmptyPlan`] if `items` is empty and
    /// [`ErrorKind::InvalidConfig`] if the pool size is zero. Both are
    /// checked before any worker starts.
    pub async fn run<I, W, H, Fut, B>(&self, items: I, handler: H) -> Result<Harvest<B::State>>
    where
        I: IntoIterator<Item = W>,
        W: Debug + Send + 'static,
        H: Fn(W) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<B>> + Send + 'static,
        B: Batch,
    {
        self.config.validate()?;
        let items: Vec<W> = items.into_iter().collect();
        if items.is_empty() {
            return Err(ErrorKind::EmptyPlan);
        }

        let pool_size = self.config.pool_size;
        let total = items.len();
        log::debug!("Aggregating {total} item(s) with {pool_size} worker(s)");

        let state = Arc::new(Mutex::new(RunState::<B::State>::default()));
        let handler = Arc::new(handler);
        let barrier = DrainBarrier::new();
        let (queue, backlog) = async_channel::unbounded();

        let mut workers = JoinSet::new();
        for worker_id in 0..pool_size {
            workers.spawn(work(
                worker_id,
                backlog.clone(),
                Arc::clone(&handler),
                Arc::clone(&state),
            ));
        }

        for item in items {
            queue
                .send(Job::Item(item, barrier.guard()))
                .await
                .map_err(|_| ErrorKind::Cancelled(None))?;
        }
        // A worker can only exit early by panicking outside the handler, e.g.
        // in a `Debug` impl. Re-raise that panic instead of waiting for items
        // nobody will take.
        let drained = barrier.wait();
        tokio::pin!(drained);
        loop {
            tokio::select! {
                () = &mut drained => break,
                joined = workers.join_next() => match joined {
                    Some(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                    Some(Err(e)) => log::error!("Aggregation worker exited abnormally: {e}"),
                    Some(Ok(())) => {}
                    None => return Err(ErrorKind::Cancelled(None)),
                },
            }
        }

        for _ in 0..pool_size {
            queue
                .send(Job::Stop)
                .await
                .map_err(|_| ErrorKind::Cancelled(None))?;
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                log::error!("Aggregation worker exited abnormally: {e}");
            }
        }

        let RunState {
            collections,
            summary,
        } = match Arc::try_unwrap(state) {
            Ok(state) => state.into_inner(),
            Err(shared) => std::mem::take(&mut *shared.lock().await),
        };
        log::debug!(
            "Aggregated {} of {total} item(s), {} failed, {} record(s) merged",
            summary.succeeded(),
            summary.failed.len(),
            summary.merged
        );
        Ok(Harvest {
            collections,
            summary,
        })
    }
}

/// Worker loop: drain items until a [`Job::Stop`] arrives
async fn work<W, H, Fut, B>(
    worker_id: usize,
    backlog: Receiver<Job<W>>,
    handler: Arc<H>,
    state: Arc<Mutex<RunState<B::State>>>,
) where
    W: Debug + Send + 'static,
    H: Fn(W) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<B>> + Send + 'static,
    B: Batch,
{
    while let Ok(job) = backlog.recv().await {
        let (item, guard) = match job {
            Job::Item(item, guard) => (item, guard),
            Job::Stop => break,
        };

        let label = format!("{item:?}");
        let handled = AssertUnwindSafe(async { handler(item).await })
            .catch_unwind()
            .await;

        let mut run = state.lock().await;
        run.summary.processed += 1;
        let error = match handled {
            // `Keyed::key` and the key's `Hash` are user code as well
            Ok(Ok(batch)) => {
                let collections = &mut run.collections;
                match std::panic::catch_unwind(AssertUnwindSafe(|| batch.merge_into(collections))) {
                    Ok(merged) => {
                        run.summary.merged += merged;
                        None
                    }
                    Err(panic) => Some(format!(
                        "merge panicked: {}",
                        panic_message(panic.as_ref())
                    )),
                }
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            )),
        };
        if let Some(error) = error {
            log::error!("Failed to aggregate {label}: {error}");
            run.summary.failed.push(ItemFailure { item: label, error });
        }
        drop(run);
        guard.done();
    }
    log::trace!("Aggregation worker {worker_id} exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::RateLimitConfig;
    use crate::{Dispatcher, DispatcherConfig};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use test_utils::{ConcurrencyGauge, capture_logs};

    #[derive(Debug, Clone, PartialEq)]
    struct Team {
        id: u32,
        name: String,
    }

    impl Keyed for Team {
        type Key = u32;

        fn key(&self) -> u32 {
            self.id
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct StatLine {
        match_id: u64,
        player_id: u64,
    }

    impl Keyed for StatLine {
        type Key = (u64, u64);

        fn key(&self) -> Self::Key {
            (self.match_id, self.player_id)
        }
    }

    fn team(id: u32) -> Team {
        Team {
            id,
            name: format!("team-{id}"),
        }
    }

    fn aggregator(pool_size: usize) -> Aggregator {
        Aggregator::new(AggregatorConfig { pool_size })
    }

    #[rstest]
    #[tokio::test]
    async fn test_overlapping_items_are_deduplicated(
        #[values(1, 2, 3, 4, 5, 6, 7, 8)] pool_size: usize,
    ) {
        let harvest = aggregator(pool_size)
            .run(1..=5, |_item: u32| async {
                tokio::task::yield_now().await;
                Ok(vec![team(42)])
            })
            .await
            .unwrap();

        assert_eq!(harvest.collections.as_slice(), &[team(42)]);
        assert_eq!(harvest.summary.processed, 5);
        assert_eq!(harvest.summary.merged, 1);
        assert!(harvest.summary.is_success());
    }

    #[tokio::test]
    async fn test_failed_item_contributes_nothing() {
        let logs = capture_logs();
        let harvest = aggregator(2)
            .run(1..=5, |item: u32| async move {
                if item == 3 {
                    return Err(ErrorKind::call("upstream returned garbage"));
                }
                Ok(vec![team(item)])
            })
            .await
            .unwrap();

        let mut ids: Vec<_> = harvest.collections.iter().map(|t| t.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 4, 5]);
        assert_eq!(
            harvest.summary.failed,
            vec![ItemFailure {
                item: "3".into(),
                error: "Call failed: upstream returned garbage".into(),
            }]
        );
        assert_eq!(harvest.summary.succeeded(), 4);
        assert_eq!(
            logs.count("[ERROR] Failed to aggregate 3: Call failed: upstream returned garbage"),
            1
        );
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_kill_worker() {
        let harvest = aggregator(1)
            .run(1..=3, |item: u32| async move {
                assert_ne!(item, 2, "cannot handle item 2");
                Ok(vec![team(item)])
            })
            .await
            .unwrap();

        assert_eq!(harvest.collections.len(), 2);
        assert_eq!(harvest.summary.failed.len(), 1);
        assert!(harvest.summary.failed[0].error.contains("cannot handle item 2"));
    }

    /// Record whose key extractor fails for id 1
    #[derive(Debug)]
    struct Fragile(u32);

    impl Keyed for Fragile {
        type Key = u32;

        fn key(&self) -> u32 {
            assert_ne!(self.0, 1, "key extractor bug");
            self.0
        }
    }

    #[tokio::test]
    async fn test_panicking_merge_is_recorded() {
        let pool = aggregator(1);
        let run = pool.run(1..=3, |item: u32| async move { Ok(vec![Fragile(item)]) });
        let harvest = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("run returns after a merge panic")
            .unwrap();

        let ids: Vec<_> = harvest.collections.iter().map(|f| f.0).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(harvest.summary.processed, 3);
        assert_eq!(harvest.summary.failed.len(), 1);
        assert_eq!(harvest.summary.failed[0].item, "1");
        assert!(harvest.summary.failed[0].error.starts_with("merge panicked: "));
        assert!(harvest.summary.failed[0].error.contains("key extractor bug"));
    }

    /// Work item that cannot be formatted
    struct Unprintable(u32);

    impl Debug for Unprintable {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            assert_ne!(self.0, 2, "cannot format item");
            write!(f, "Unprintable({})", self.0)
        }
    }

    #[tokio::test]
    async fn test_worker_panic_is_propagated() {
        let run = tokio::spawn(async move {
            aggregator(1)
                .run((1..=3).map(Unprintable), |item: Unprintable| async move {
                    Ok(vec![team(item.0)])
                })
                .await
        });

        let joined = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("run returns after a worker panic");
        let panic = joined.unwrap_err().into_panic();
        assert!(panic_message(panic.as_ref()).contains("cannot format item"));
    }

    #[tokio::test]
    async fn test_runs_start_from_empty_state() {
        let aggregator = aggregator(3);
        let first = aggregator
            .run(vec![1, 2], |item: u32| async move { Ok(vec![team(item)]) })
            .await
            .unwrap();
        let second = aggregator
            .run(vec![2, 3, 4], |item: u32| async move { Ok(vec![team(item)]) })
            .await
            .unwrap();

        assert_eq!(first.collections.len(), 2);
        assert_eq!(second.collections.len(), 3);
        assert_eq!(second.summary.processed, 3);
    }

    #[tokio::test]
    async fn test_preconditions_are_checked_before_work_starts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = {
            let calls = Arc::clone(&calls);
            move |_: u32| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(vec![team(1)]) }
            }
        };

        let empty = aggregator(2).run(Vec::<u32>::new(), handler.clone()).await;
        assert!(matches!(empty, Err(ErrorKind::EmptyPlan)));

        let no_workers = aggregator(0).run(vec![1, 2], handler).await;
        assert!(matches!(no_workers, Err(ErrorKind::InvalidConfig(_))));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pool_size_bounds_handler_concurrency() {
        let gauge = ConcurrencyGauge::new();
        let harvest = aggregator(3)
            .run(0..10, {
                let gauge = gauge.clone();
                move |item: u32| {
                    let gauge = gauge.clone();
                    async move {
                        let _active = gauge.enter();
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(vec![team(item)])
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(harvest.collections.len(), 10);
        assert_eq!(gauge.max_active(), 3);
        assert_eq!(gauge.total(), 10);
    }

    #[tokio::test]
    async fn test_multiple_collections_through_dispatcher() {
        let dispatcher = Dispatcher::new(
            DispatcherConfig::default()
                .with_concurrency(4)
                .with_rate_limit(RateLimitConfig::new(1000, Duration::from_secs(1))),
        )
        .unwrap();
        dispatcher.start();

        // Both teams played match 7, so its stat lines are fetched twice
        let plan = plan::zip_exact(vec![1u32, 2], vec![vec![7u64, 8], vec![7, 9]]).unwrap();
        let harvest = aggregator(2)
            .run(plan, {
                let dispatcher = dispatcher.clone();
                move |(team_id, matches): (u32, Vec<u64>)| {
                    let dispatcher = dispatcher.clone();
                    async move {
                        let fetched = dispatcher
                            .submit(move || async move { Ok(team(team_id)) })
                            .await?;
                        let lines: Vec<StatLine> = matches
                            .iter()
                            .flat_map(|&match_id| {
                                [1, 2].map(|player_id| StatLine {
                                    match_id,
                                    player_id,
                                })
                            })
                            .collect();
                        Ok((vec![fetched], lines))
                    }
                }
            })
            .await
            .unwrap();

        let (teams, lines): (Collection<Team>, Collection<StatLine>) = harvest.collections;
        assert_eq!(teams.len(), 2);
        // Matches 7, 8 and 9 with two players each
        assert_eq!(lines.len(), 6);
        assert!(lines.contains_key(&(7, 2)));
        assert_eq!(harvest.summary.merged, 8);
        dispatcher.stop().await;
    }
}

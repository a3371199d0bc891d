//! `statpull` is a library for pulling data from rate-limited stats
//! platforms without tripping their limits.
//!
//! It provides three composable building blocks:
//!
//! - a [`Dispatcher`]: a bounded pool of workers that admits every call
//!   through a [`SlidingWindowRateLimiter`] and runs it under a deadline
//! - a [`RetryPolicy`]: classification-driven retry with exponential backoff
//! - an [`Aggregator`]: a fan-out worker pool that merges the records of many
//!   work items into deduplicated [`Collection`]s
//!
//! "Hello world" example:
//! ```
//! use statpull_lib::{Dispatcher, DispatcherConfig, Outcome, Result, RetryPolicy};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let dispatcher = Dispatcher::new(DispatcherConfig::default())?;
//!   let guard = dispatcher.scoped();
//!
//!   let roster = RetryPolicy::default()
//!       .call_with_retry(|| guard.submit(|| async { Ok(Outcome::Success(vec!["ana", "bo"])) }))
//!       .await;
//!   assert_eq!(roster, Some(vec!["ana", "bo"]));
//!
//!   guard.stop().await;
//!   Ok(())
//! }
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
// #![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

mod types;
mod waiter;

pub mod aggregate;
pub mod dispatcher;
pub mod ratelimit;
pub mod retry;

pub use aggregate::{Aggregator, AggregatorConfig, Collection, Harvest, Keyed, RunSummary};
pub use dispatcher::{DispatchStats, Dispatcher, DispatcherConfig, DispatcherGuard, ResultHandle};
pub use ratelimit::{CallThrottle, RateLimitConfig, SlidingWindowRateLimiter};
pub use retry::{RetryConfig, RetryPolicy, RetryReport};
pub use types::*;
pub use waiter::{DrainBarrier, WorkGuard};

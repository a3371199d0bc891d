use serde::{Serialize, Serializer};
use std::hash::Hash;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by a dispatched callable
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Possible errors when interacting with `statpull_lib`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A configuration value is out of range, e.g. a zero-sized rate window
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A request was submitted to a dispatcher that has not been started
    /// or has already been stopped
    #[error("Dispatcher is not running")]
    NotRunning,

    /// The dispatcher shut down before the request was resolved
    #[error("Request was cancelled before completion{}", fmt_id(.0.as_deref()))]
    Cancelled(Option<String>),

    /// A single call exceeded its deadline
    #[error("Call timed out after {}ms{}", .0.as_millis(), fmt_id(.1.as_deref()))]
    Timeout(Duration, Option<String>),

    /// The callable panicked while it was being executed
    #[error("Call panicked: {0}")]
    Panicked(String),

    /// The callable returned an error of its own
    #[error("Call failed: {0}")]
    Call(#[source] BoxError),

    /// The planning step yielded no work items
    #[error("Planning step yielded no work items")]
    EmptyPlan,

    /// Two planning inputs that must be paired up have different lengths
    #[error("Planning inputs differ in length: {left} vs {right}")]
    PlanLengthMismatch {
        /// Length of the first input
        left: usize,
        /// Length of the second input
        right: usize,
    },

    /// The upstream platform answered with a status code that is neither
    /// a success nor one of the classified failures
    #[error("Rejected status code: {0}")]
    RejectedStatusCode(http::StatusCode),

    /// Network error while talking to the upstream platform
    #[error("Network error while trying to reach the stats platform")]
    Network(#[from] reqwest::Error),

    /// The response body could not be decoded into the expected shape
    #[error("Cannot decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

fn fmt_id(id: Option<&str>) -> String {
    id.map(|id| format!(" (request `{id}`)")).unwrap_or_default()
}

impl ErrorKind {
    /// Wrap an arbitrary error returned by a callable
    pub fn call<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Call(error.into())
    }

    /// Whether this error represents a call that ran out of time
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(..))
    }

    /// Whether this error represents a request dropped by a shutdown
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Return the underlying `reqwest` error, if any
    #[must_use]
    pub const fn reqwest_error(&self) -> Option<&reqwest::Error> {
        match self {
            Self::Network(e) => Some(e),
            _ => None,
        }
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InvalidConfig(a), Self::InvalidConfig(b))
            | (Self::Panicked(a), Self::Panicked(b)) => a == b,
            (Self::Cancelled(a), Self::Cancelled(b)) => a == b,
            (Self::Timeout(d1, a), Self::Timeout(d2, b)) => d1 == d2 && a == b,
            (Self::Call(e1), Self::Call(e2)) => e1.to_string() == e2.to_string(),
            (
                Self::PlanLengthMismatch {
                    left: l1,
                    right: r1,
                },
                Self::PlanLengthMismatch {
                    left: l2,
                    right: r2,
                },
            ) => l1 == l2 && r1 == r2,
            (Self::RejectedStatusCode(c1), Self::RejectedStatusCode(c2)) => c1 == c2,
            (Self::Network(e1), Self::Network(e2)) => e1.to_string() == e2.to_string(),
            (Self::Decode(e1), Self::Decode(e2)) => e1.to_string() == e2.to_string(),
            (Self::NotRunning, Self::NotRunning) | (Self::EmptyPlan, Self::EmptyPlan) => true,
            _ => false,
        }
    }
}

impl Eq for ErrorKind {}

impl Hash for ErrorKind {
    fn hash<H>(&self, state: &mut H)
    where
        H: std::hash::Hasher,
    {
        match self {
            Self::InvalidConfig(s) | Self::Panicked(s) => s.hash(state),
            Self::Cancelled(id) => id.hash(state),
            Self::Timeout(d, id) => (d, id).hash(state),
            Self::Call(e) => e.to_string().hash(state),
            Self::PlanLengthMismatch { left, right } => (left, right).hash(state),
            Self::RejectedStatusCode(c) => c.hash(state),
            Self::Network(e) => e.to_string().hash(state),
            Self::Decode(e) => e.to_string().hash(state),
            Self::NotRunning | Self::EmptyPlan => std::mem::discriminant(self).hash(state),
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

#![allow(unreachable_pub)]

mod error;
mod outcome;

pub use error::{BoxError, ErrorKind};
pub use outcome::{IntoOutcome, Outcome, OutcomeKind};

/// The statpull `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;

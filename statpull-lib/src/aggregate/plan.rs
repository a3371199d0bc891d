//! Helpers for the planning step that produces work items.

use std::collections::HashSet;
use std::hash::Hash;

use crate::{ErrorKind, Result};

/// Pair up two descriptor lists element by element.
///
/// # Errors
///
/// Returns [`ErrorKind::PlanLengthMismatch`] if the lists differ in length,
/// instead of silently dropping the tail of the longer one.
pub fn zip_exact<A, B>(left: Vec<A>, right: Vec<B>) -> Result<Vec<(A, B)>> {
    if left.len() != right.len() {
        return Err(ErrorKind::PlanLengthMismatch {
            left: left.len(),
            right: right.len(),
        });
    }
    Ok(left.into_iter().zip(right).collect())
}

/// Drop repeated descriptors, keeping the first occurrence of each
pub fn unique<T, I>(items: I) -> Vec<T>
where
    T: Eq + Hash + Clone,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

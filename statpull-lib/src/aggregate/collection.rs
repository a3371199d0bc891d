use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

/// A record with a natural key.
///
/// Two records with equal keys describe the same entity, even if they were
/// fetched by different workers. Composite keys are expressed as tuples.
pub trait Keyed {
    /// The natural key, e.g. a match id or a `(match_id, player_id)` pair
    type Key: Eq + Hash + Clone + Debug + Send + 'static;

    /// Extract the natural key of this record
    fn key(&self) -> Self::Key;
}

/// An insertion-ordered collection holding at most one record per key.
///
/// The first record inserted for a key wins; later records with the same
/// key are discarded.
#[derive(Debug, Clone)]
pub struct Collection<R: Keyed> {
    items: Vec<R>,
    seen: HashSet<R::Key>,
}

impl<R: Keyed> Default for Collection<R> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            seen: HashSet::new(),
        }
    }
}

impl<R: Keyed> Collection<R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record` unless a record with the same key is present.
    ///
    /// Returns `true` if the record was inserted.
    pub fn insert(&mut self, record: R) -> bool {
        if self.seen.insert(record.key()) {
            self.items.push(record);
            true
        } else {
            false
        }
    }

    /// Whether a record with `key` was inserted
    #[must_use]
    pub fn contains_key(&self, key: &R::Key) -> bool {
        self.seen.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.items.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[R] {
        &self.items
    }

    /// Consume the collection, returning the records in insertion order
    #[must_use]
    pub fn into_vec(self) -> Vec<R> {
        self.items
    }
}

impl<R: Keyed> Extend<R> for Collection<R> {
    fn extend<I: IntoIterator<Item = R>>(&mut self, records: I) {
        for record in records {
            self.insert(record);
        }
    }
}

impl<R: Keyed> FromIterator<R> for Collection<R> {
    fn from_iter<I: IntoIterator<Item = R>>(records: I) -> Self {
        let mut collection = Self::new();
        collection.extend(records);
        collection
    }
}

impl<R: Keyed> IntoIterator for Collection<R> {
    type Item = R;
    type IntoIter = std::vec::IntoIter<R>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, R: Keyed> IntoIterator for &'a Collection<R> {
    type Item = &'a R;
    type IntoIter = std::slice::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<R: Keyed + Serialize> Serialize for Collection<R> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(&self.items)
    }
}

//! A hash-based multiset.
//!
//! [`Bag`] tracks per-element multiplicity rather than only presence. It is
//! the aggregate container for the multiset terminal: batch-local bags are
//! merged by summing multiplicities, so an element occurring twice in one
//! batch and three times in another occurs five times in the aggregate.

use std::collections::HashMap;
use std::collections::hash_map;
use std::hash::Hash;

/// A multiset backed by a `HashMap` of multiplicities.
///
/// Equality compares multiplicity maps, so two bags are equal regardless of
/// the order elements were added. Enumeration order is unspecified.
#[derive(Debug, Clone)]
pub struct Bag<T: Hash + Eq> {
    counts: HashMap<T, usize>,
    len: usize,
}

impl<T: Hash + Eq> Bag<T> {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            len: 0,
        }
    }

    /// Total number of occurrences across all elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the bag holds no occurrences.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of distinct elements.
    pub fn distinct_len(&self) -> usize {
        self.counts.len()
    }

    /// Multiplicity of `item`, zero if absent.
    pub fn occurrences_of(&self, item: &T) -> usize {
        self.counts.get(item).copied().unwrap_or(0)
    }

    /// Add one occurrence of `item`.
    pub fn add_occurrence(&mut self, item: T) {
        self.add_occurrences(item, 1);
    }

    /// Add `count` occurrences of `item`. Adding zero is a no-op.
    pub fn add_occurrences(&mut self, item: T, count: usize) {
        if count == 0 {
            return;
        }
        *self.counts.entry(item).or_insert(0) += count;
        self.len += count;
    }

    /// Absorb all occurrences of `other` into `self`.
    pub fn merge(&mut self, other: Bag<T>) {
        for (item, count) in other.counts {
            self.add_occurrences(item, count);
        }
    }

    /// Iterate over `(element, multiplicity)` pairs in unspecified order.
    pub fn occurrences(&self) -> impl Iterator<Item = (&T, usize)> {
        self.counts.iter().map(|(item, &count)| (item, count))
    }

    /// Iterate over distinct elements in unspecified order.
    pub fn distinct(&self) -> hash_map::Keys<'_, T, usize> {
        self.counts.keys()
    }
}

impl<T: Hash + Eq> Default for Bag<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Hash + Eq> PartialEq for Bag<T> {
    fn eq(&self, other: &Self) -> bool {
        self.counts == other.counts
    }
}

impl<T: Hash + Eq> Eq for Bag<T> {}

impl<T: Hash + Eq> FromIterator<T> for Bag<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut bag = Bag::new();
        bag.extend(iter);
        bag
    }
}

impl<T: Hash + Eq> Extend<T> for Bag<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.add_occurrence(item);
        }
    }
}

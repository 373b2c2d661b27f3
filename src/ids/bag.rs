//! Counted multiset of identifiers with threshold queries.

use std::collections::{HashMap, HashSet};
use std::fmt;

use super::Id;

/// A multiset of [`Id`]s.
///
/// Counts how many times each id has been added and tracks which ids have
/// reached the configured threshold. The conflict graph consumes a `Bag`
/// per poll: ids at or above the threshold count as a successful poll for
/// the transaction they name.
#[derive(Clone, Default)]
pub struct Bag {
    counts: HashMap<Id, u64>,
    size: u64,
    threshold: u64,
    met_threshold: HashSet<Id>,
}

impl Bag {
    /// An empty bag with no threshold.
    pub fn new() -> Self {
        Bag::default()
    }

    /// Set the count an id must reach to appear in [`Bag::threshold_met`].
    ///
    /// Retroactive: ids already at or above the new threshold are included,
    /// ids below it are dropped.
    pub fn set_threshold(&mut self, threshold: u64) {
        if self.threshold == threshold {
            return;
        }
        self.threshold = threshold;
        self.met_threshold.clear();
        for (id, &count) in &self.counts {
            if count >= threshold {
                self.met_threshold.insert(*id);
            }
        }
    }

    /// Add one occurrence of `id`.
    pub fn add(&mut self, id: Id) {
        self.add_count(id, 1);
    }

    /// Add `count` occurrences of `id`.
    pub fn add_count(&mut self, id: Id, count: u64) {
        if count == 0 {
            return;
        }
        let entry = self.counts.entry(id).or_insert(0);
        *entry += count;
        self.size += count;
        if *entry >= self.threshold {
            self.met_threshold.insert(id);
        }
    }

    /// Occurrences of `id` in the bag.
    pub fn count(&self, id: &Id) -> u64 {
        self.counts.get(id).copied().unwrap_or(0)
    }

    /// Total occurrences across all ids.
    pub fn len(&self) -> u64 {
        self.size
    }

    /// True when nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The distinct ids in the bag, in arbitrary order.
    pub fn list(&self) -> Vec<Id> {
        self.counts.keys().copied().collect()
    }

    /// Ids whose count has reached the threshold.
    pub fn threshold_met(&self) -> &HashSet<Id> {
        &self.met_threshold
    }
}

impl fmt::Debug for Bag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self.counts.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        f.debug_map().entries(entries).finish()
    }
}

//! Merge policies: how batch-local partial results fold into one aggregate.
//!
//! Each terminal kind supplies a [`MergePolicy`]: batch jobs accumulate
//! surviving elements into a policy partial, and the coordinator merges the
//! partials in ascending batch-ordinal order. Only the merge step imposes
//! order; unordered kinds (set, bag) simply ignore it.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use crate::bag::Bag;

/// Folds batch partial results into a final aggregate.
///
/// A policy value is shared across all batch jobs of one drive (behind an
/// `Arc`), so it holds no per-drive mutable state; all mutation happens on
/// the partial owned by a single job.
pub(crate) trait MergePolicy<T>: Send + Sync {
    /// Batch-local accumulation state, owned by one job at a time.
    type Partial: Send + 'static;
    /// The materialized aggregate handed back to the caller.
    type Output;

    /// Fresh partial for one batch.
    fn new_partial(&self) -> Self::Partial;

    /// Fold one surviving element into a batch partial.
    fn accumulate(&self, partial: &mut Self::Partial, item: T);

    /// Whether this partial alone decides the aggregate, making the
    /// remaining batches irrelevant. Only legal when skipped batches cannot
    /// change the merged outcome.
    fn is_decisive(&self, _partial: &Self::Partial) -> bool {
        false
    }

    /// Merge all partials, provided in ascending batch-ordinal order.
    fn merge(&self, partials: Vec<Self::Partial>) -> Self::Output;
}

/// Order-preserving sequence terminal: concatenation in ordinal order.
pub(crate) struct OrderedList;

impl<T: Send + 'static> MergePolicy<T> for OrderedList {
    type Partial = Vec<T>;
    type Output = Vec<T>;

    fn new_partial(&self) -> Vec<T> {
        Vec::new()
    }

    fn accumulate(&self, partial: &mut Vec<T>, item: T) {
        partial.push(item);
    }

    fn merge(&self, partials: Vec<Vec<T>>) -> Vec<T> {
        let total = partials.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(total);
        for partial in partials {
            out.extend(partial);
        }
        out
    }
}

/// Set terminal: duplicates across batches collapse under the element's
/// `Eq`/`Hash` contract.
pub(crate) struct DedupSet;

impl<T: Hash + Eq + Send + 'static> MergePolicy<T> for DedupSet {
    type Partial = HashSet<T>;
    type Output = HashSet<T>;

    fn new_partial(&self) -> HashSet<T> {
        HashSet::new()
    }

    fn accumulate(&self, partial: &mut HashSet<T>, item: T) {
        partial.insert(item);
    }

    fn merge(&self, partials: Vec<HashSet<T>>) -> HashSet<T> {
        let mut out = HashSet::new();
        for partial in partials {
            out.extend(partial);
        }
        out
    }
}

/// Multiset terminal: per-element multiplicities are SUMMED across batches,
/// never collapsed.
pub(crate) struct CountingBag;

impl<T: Hash + Eq + Send + 'static> MergePolicy<T> for CountingBag {
    type Partial = Bag<T>;
    type Output = Bag<T>;

    fn new_partial(&self) -> Bag<T> {
        Bag::new()
    }

    fn accumulate(&self, partial: &mut Bag<T>, item: T) {
        partial.add_occurrence(item);
    }

    fn merge(&self, partials: Vec<Bag<T>>) -> Bag<T> {
        let mut out = Bag::new();
        for partial in partials {
            out.merge(partial);
        }
        out
    }
}

/// Grouped terminal: per-key member lists, appended in ordinal order so
/// group membership preserves original relative order across batches.
pub(crate) struct GroupMap<T, K> {
    pub(crate) key_fn: Arc<dyn Fn(&T) -> K + Send + Sync>,
}

impl<T, K> MergePolicy<T> for GroupMap<T, K>
where
    T: Send + 'static,
    K: Hash + Eq + Send + 'static,
{
    type Partial = HashMap<K, Vec<T>>;
    type Output = HashMap<K, Vec<T>>;

    fn new_partial(&self) -> HashMap<K, Vec<T>> {
        HashMap::new()
    }

    fn accumulate(&self, partial: &mut HashMap<K, Vec<T>>, item: T) {
        let key = (self.key_fn)(&item);
        partial.entry(key).or_default().push(item);
    }

    fn merge(&self, partials: Vec<HashMap<K, Vec<T>>>) -> HashMap<K, Vec<T>> {
        let mut out: HashMap<K, Vec<T>> = HashMap::new();
        for partial in partials {
            for (key, members) in partial {
                out.entry(key).or_default().extend(members);
            }
        }
        out
    }
}

/// Side-effecting terminal: runs the action on worker threads as elements
/// survive the chain, with no ordering guarantee between batches.
pub(crate) struct ForEach<T> {
    pub(crate) action: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T: Send + 'static> MergePolicy<T> for ForEach<T> {
    type Partial = ();
    type Output = ();

    fn new_partial(&self) {}

    fn accumulate(&self, _partial: &mut (), item: T) {
        (self.action)(item);
    }

    fn merge(&self, _partials: Vec<()>) {}
}

/// Counting terminal: per-batch counts of matching elements, summed.
pub(crate) struct Count<T> {
    pub(crate) predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: Send + 'static> MergePolicy<T> for Count<T> {
    type Partial = usize;
    type Output = usize;

    fn new_partial(&self) -> usize {
        0
    }

    fn accumulate(&self, partial: &mut usize, item: T) {
        if (self.predicate)(&item) {
            *partial += 1;
        }
    }

    fn merge(&self, partials: Vec<usize>) -> usize {
        partials.into_iter().sum()
    }
}

/// Existential terminal: true as soon as any batch finds a match. A match
/// is decisive, letting unstarted batches skip their work.
pub(crate) struct AnySatisfy<T> {
    pub(crate) predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: Send + 'static> MergePolicy<T> for AnySatisfy<T> {
    type Partial = bool;
    type Output = bool;

    fn new_partial(&self) -> bool {
        false
    }

    fn accumulate(&self, partial: &mut bool, item: T) {
        if !*partial && (self.predicate)(&item) {
            *partial = true;
        }
    }

    fn is_decisive(&self, partial: &bool) -> bool {
        *partial
    }

    fn merge(&self, partials: Vec<bool>) -> bool {
        partials.into_iter().any(|found| found)
    }
}

/// Universal terminal: the partial records whether a counterexample was
/// found; one counterexample is decisive.
pub(crate) struct AllSatisfy<T> {
    pub(crate) predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: Send + 'static> MergePolicy<T> for AllSatisfy<T> {
    type Partial = bool;
    type Output = bool;

    fn new_partial(&self) -> bool {
        false
    }

    fn accumulate(&self, counterexample: &mut bool, item: T) {
        if !*counterexample && !(self.predicate)(&item) {
            *counterexample = true;
        }
    }

    fn is_decisive(&self, counterexample: &bool) -> bool {
        *counterexample
    }

    fn merge(&self, partials: Vec<bool>) -> bool {
        !partials.into_iter().any(|counterexample| counterexample)
    }
}

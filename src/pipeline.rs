//! The public parallel pipeline: lazy composition and terminal drives.
//!
//! A [`ParallelPipeline`] wraps a source, a reference to a caller-owned
//! [`WorkerPool`], and a batch size. Chaining operations (`select`,
//! `reject`, `collect`, `flat_collect`, `group_by`) performs no work; each
//! returns a new pipeline value whose chain conses onto the predecessor's.
//! Work happens only when a terminal is called, which splits the source into
//! batches, fans them out across the pool, and blocks until the merged
//! aggregate (or the first failure) is available.
//!
//! Pipelines are immutable and cheaply cloneable; a pipeline may be driven
//! to a terminal any number of times, each drive being an independent
//! execution over the same source.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use crate::aggregate::{
    AllSatisfy, AnySatisfy, Count, CountingBag, DedupSet, ForEach, GroupMap, OrderedList,
};
use crate::bag::Bag;
use crate::chain::StageChain;
use crate::error::{Error, Result};
use crate::executor;
use crate::pool::WorkerPool;

type KeyFn<T, K> = Arc<dyn Fn(&T) -> K + Send + Sync>;

/// A lazy, parallel pipeline from source elements `S` to outputs `T`.
///
/// `K` is the grouping key type once a `group_by` stage has been composed;
/// it defaults to `()` for ungrouped pipelines.
pub struct ParallelPipeline<S, T, K = ()> {
    source: Arc<Vec<S>>,
    pool: Arc<WorkerPool>,
    batch_size: usize,
    chain: StageChain<S, T>,
    key_fn: Option<KeyFn<T, K>>,
}

impl<S, T, K> Clone for ParallelPipeline<S, T, K> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            pool: Arc::clone(&self.pool),
            batch_size: self.batch_size,
            chain: self.chain.clone(),
            key_fn: self.key_fn.clone(),
        }
    }
}

impl<S> ParallelPipeline<S, S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Wrap a source for parallel evaluation on `pool`, splitting drives
    /// into batches of at most `batch_size` elements.
    ///
    /// The pool stays caller-owned: the pipeline only holds a reference and
    /// never shuts it down. Fails with [`Error::InvalidConfiguration`] when
    /// `batch_size` is zero.
    pub fn new(source: Vec<S>, pool: Arc<WorkerPool>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidConfiguration(
                "batch size must be positive".into(),
            ));
        }
        Ok(Self {
            source: Arc::new(source),
            pool,
            batch_size,
            chain: StageChain::source(),
            key_fn: None,
        })
    }
}

impl<S, T, K> ParallelPipeline<S, T, K>
where
    S: Send + Sync + 'static,
    T: Send + 'static,
    K: 'static,
{
    /// Number of elements in the backing source.
    pub fn source_len(&self) -> usize {
        self.source.len()
    }

    /// Batch size used when splitting drives into jobs.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn with_chain<U>(&self, chain: StageChain<S, U>) -> ParallelPipeline<S, U, ()> {
        // A type-changing stage invalidates any pending grouping key.
        ParallelPipeline {
            source: Arc::clone(&self.source),
            pool: Arc::clone(&self.pool),
            batch_size: self.batch_size,
            chain,
            key_fn: None,
        }
    }

    // ------------------------------------------------------------------
    // Chained (lazy) operations
    // ------------------------------------------------------------------

    /// Keep only elements satisfying `predicate`. Lazy.
    pub fn select<P>(&self, predicate: P) -> ParallelPipeline<S, T, K>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        ParallelPipeline {
            source: Arc::clone(&self.source),
            pool: Arc::clone(&self.pool),
            batch_size: self.batch_size,
            chain: self.chain.select(predicate),
            key_fn: self.key_fn.clone(),
        }
    }

    /// Drop elements satisfying `predicate`. Lazy.
    pub fn reject<P>(&self, predicate: P) -> ParallelPipeline<S, T, K>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        ParallelPipeline {
            source: Arc::clone(&self.source),
            pool: Arc::clone(&self.pool),
            batch_size: self.batch_size,
            chain: self.chain.reject(predicate),
            key_fn: self.key_fn.clone(),
        }
    }

    /// Transform each element. Lazy; clears any pending grouping key.
    pub fn collect<U, F>(&self, transform: F) -> ParallelPipeline<S, U, ()>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.with_chain(self.chain.collect(transform))
    }

    /// Transform each element with a fallible transform. The first failing
    /// element fails the whole drive. Lazy; clears any pending grouping key.
    pub fn try_collect<U, F>(&self, transform: F) -> ParallelPipeline<S, U, ()>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U> + Send + Sync + 'static,
    {
        self.with_chain(self.chain.try_collect(transform))
    }

    /// Replace each element with zero or more outputs. Lazy; clears any
    /// pending grouping key.
    pub fn flat_collect<U, I, F>(&self, transform: F) -> ParallelPipeline<S, U, ()>
    where
        U: Send + 'static,
        I: IntoIterator<Item = U>,
        F: Fn(T) -> I + Send + Sync + 'static,
    {
        self.with_chain(self.chain.flat_collect(transform))
    }

    /// Record a grouping key extractor for a later [`to_grouped`] terminal.
    /// Elements pass through unchanged for further chaining. Lazy.
    ///
    /// [`to_grouped`]: ParallelPipeline::to_grouped
    pub fn group_by<K2, F>(&self, key_fn: F) -> ParallelPipeline<S, T, K2>
    where
        K2: Hash + Eq + Send + 'static,
        F: Fn(&T) -> K2 + Send + Sync + 'static,
    {
        ParallelPipeline {
            source: Arc::clone(&self.source),
            pool: Arc::clone(&self.pool),
            batch_size: self.batch_size,
            chain: self.chain.clone(),
            key_fn: Some(Arc::new(key_fn)),
        }
    }

    // ------------------------------------------------------------------
    // Terminal operations
    // ------------------------------------------------------------------

    /// Force evaluation into a sequence preserving the source's original
    /// relative order across batch boundaries.
    pub fn to_list(&self) -> Result<Vec<T>> {
        executor::execute(
            &self.source,
            &self.pool,
            self.batch_size,
            &self.chain,
            &Arc::new(OrderedList),
        )
    }

    /// Force evaluation into a set; duplicates across batches collapse
    /// under `T`'s `Eq`/`Hash` contract. No enumeration order.
    pub fn to_set(&self) -> Result<HashSet<T>>
    where
        T: Hash + Eq,
    {
        executor::execute(
            &self.source,
            &self.pool,
            self.batch_size,
            &self.chain,
            &Arc::new(DedupSet),
        )
    }

    /// Force evaluation into a multiset; per-element multiplicities are
    /// summed across batches.
    pub fn to_bag(&self) -> Result<Bag<T>>
    where
        T: Hash + Eq,
    {
        executor::execute(
            &self.source,
            &self.pool,
            self.batch_size,
            &self.chain,
            &Arc::new(CountingBag),
        )
    }

    /// Force evaluation into a map from grouping key to members, with each
    /// group's members in original relative order.
    ///
    /// Fails with [`Error::IncompatibleTerminal`] when no `group_by` stage
    /// was composed (or a type-changing stage cleared it).
    pub fn to_grouped(&self) -> Result<HashMap<K, Vec<T>>>
    where
        K: Hash + Eq + Send,
    {
        let key_fn = self.key_fn.clone().ok_or_else(|| {
            Error::IncompatibleTerminal(
                "grouped terminal requires a group_by stage".into(),
            )
        })?;
        executor::execute(
            &self.source,
            &self.pool,
            self.batch_size,
            &self.chain,
            &Arc::new(GroupMap { key_fn }),
        )
    }

    /// Apply `action` to every surviving element, on worker threads, with
    /// no ordering guarantee between batches.
    pub fn for_each<F>(&self, action: F) -> Result<()>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        executor::execute(
            &self.source,
            &self.pool,
            self.batch_size,
            &self.chain,
            &Arc::new(ForEach {
                action: Arc::new(action),
            }),
        )
    }

    /// Count surviving elements satisfying `predicate`.
    pub fn count<P>(&self, predicate: P) -> Result<usize>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        executor::execute(
            &self.source,
            &self.pool,
            self.batch_size,
            &self.chain,
            &Arc::new(Count {
                predicate: Arc::new(predicate),
            }),
        )
    }

    /// True when any surviving element satisfies `predicate`. A match lets
    /// unstarted batches skip their work.
    pub fn any_satisfy<P>(&self, predicate: P) -> Result<bool>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        executor::execute(
            &self.source,
            &self.pool,
            self.batch_size,
            &self.chain,
            &Arc::new(AnySatisfy {
                predicate: Arc::new(predicate),
            }),
        )
    }

    /// True when every surviving element satisfies `predicate`. A
    /// counterexample lets unstarted batches skip their work.
    pub fn all_satisfy<P>(&self, predicate: P) -> Result<bool>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        executor::execute(
            &self.source,
            &self.pool,
            self.batch_size,
            &self.chain,
            &Arc::new(AllSatisfy {
                predicate: Arc::new(predicate),
            }),
        )
    }
}

/// Entry point sugar: `vec.as_parallel(pool, batch_size)`.
pub trait AsParallel<S> {
    /// Wrap this collection in a lazy parallel pipeline.
    fn as_parallel(
        self,
        pool: Arc<WorkerPool>,
        batch_size: usize,
    ) -> Result<ParallelPipeline<S, S>>;
}

impl<S> AsParallel<S> for Vec<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn as_parallel(
        self,
        pool: Arc<WorkerPool>,
        batch_size: usize,
    ) -> Result<ParallelPipeline<S, S>> {
        ParallelPipeline::new(self, pool, batch_size)
    }
}

impl<'a, S> AsParallel<S> for &'a [S]
where
    S: Clone + Send + Sync + 'static,
{
    fn as_parallel(
        self,
        pool: Arc<WorkerPool>,
        batch_size: usize,
    ) -> Result<ParallelPipeline<S, S>> {
        ParallelPipeline::new(self.to_vec(), pool, batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool(threads: usize) -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(threads).unwrap())
    }

    #[test]
    fn test_new_rejects_zero_batch_size() {
        assert!(matches!(
            ParallelPipeline::new(vec![1, 2, 3], pool(1), 0),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_chaining_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_chain = Arc::clone(&calls);

        let pipeline = ParallelPipeline::new(vec![1u32, 2, 3], pool(2), 1)
            .unwrap()
            .collect(move |x| {
                calls_in_chain.fetch_add(1, Ordering::AcqRel);
                x * 2
            });

        assert_eq!(calls.load(Ordering::Acquire), 0);
        let out = pipeline.to_list().unwrap();
        assert_eq!(out, vec![2, 4, 6]);
        assert_eq!(calls.load(Ordering::Acquire), 3);
    }

    #[test]
    fn test_chaining_never_mutates_predecessor() {
        let base = ParallelPipeline::new(vec![1u32, 2, 3, 4], pool(2), 2).unwrap();
        let evens = base.select(|x| x % 2 == 0);

        assert_eq!(base.to_list().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(evens.to_list().unwrap(), vec![2, 4]);
    }

    #[test]
    fn test_to_grouped_without_group_by_is_incompatible() {
        let pipeline = ParallelPipeline::new(vec![1u32, 2, 3], pool(1), 2).unwrap();
        assert!(matches!(
            pipeline.to_grouped(),
            Err(Error::IncompatibleTerminal(_))
        ));
    }

    #[test]
    fn test_collect_after_group_by_clears_key() {
        let pipeline = ParallelPipeline::new(vec![1u32, 2, 3, 4], pool(2), 2)
            .unwrap()
            .group_by(|x| x % 2)
            .collect(|x| x + 1);
        assert!(matches!(
            pipeline.to_grouped(),
            Err(Error::IncompatibleTerminal(_))
        ));
    }

    #[test]
    fn test_select_after_group_by_keeps_key() {
        let grouped = ParallelPipeline::new((1u32..=10).collect(), pool(2), 3)
            .unwrap()
            .group_by(|x| x % 2)
            .select(|x| *x > 4)
            .to_grouped()
            .unwrap();

        assert_eq!(grouped[&0], vec![6, 8, 10]);
        assert_eq!(grouped[&1], vec![5, 7, 9]);
    }

    #[test]
    fn test_for_each_visits_every_surviving_element() {
        let sum = Arc::new(AtomicUsize::new(0));
        let sum_in_action = Arc::clone(&sum);

        ParallelPipeline::new((1usize..=100).collect(), pool(4), 7)
            .unwrap()
            .reject(|x| x % 2 == 0)
            .for_each(move |x| {
                sum_in_action.fetch_add(x, Ordering::AcqRel);
            })
            .unwrap();

        // 1 + 3 + ... + 99
        assert_eq!(sum.load(Ordering::Acquire), 2500);
    }

    #[test]
    fn test_count_any_all() {
        let pipeline = ParallelPipeline::new((1u32..=20).collect(), pool(2), 4).unwrap();
        assert_eq!(pipeline.count(|x| x % 5 == 0).unwrap(), 4);
        assert!(pipeline.any_satisfy(|x| *x == 13).unwrap());
        assert!(!pipeline.any_satisfy(|x| *x > 20).unwrap());
        assert!(pipeline.all_satisfy(|x| *x >= 1).unwrap());
        assert!(!pipeline.all_satisfy(|x| *x < 20).unwrap());
    }

    #[test]
    fn test_as_parallel_entry_points() {
        let from_vec = vec![1u32, 2, 3]
            .as_parallel(pool(1), 2)
            .unwrap()
            .to_list()
            .unwrap();
        assert_eq!(from_vec, vec![1, 2, 3]);

        let slice: &[u32] = &[4, 5, 6];
        let from_slice = slice.as_parallel(pool(1), 2).unwrap().to_list().unwrap();
        assert_eq!(from_slice, vec![4, 5, 6]);
    }
}

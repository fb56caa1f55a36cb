//! The lazy stage chain: an immutable cons list of transformation stages.
//!
//! Composing a stage never evaluates anything; it returns a new chain whose
//! evaluation closure captures the predecessor's closure behind an `Arc`.
//! Evaluating one source element is a pure function of the element and the
//! chain, so batch jobs on different threads share the chain with no
//! synchronization.
//!
//! Each stage maps one upstream element to zero (suppressed by select or
//! reject), one (collect), or many (flat_collect) downstream elements, so
//! per-element output is a `SmallVec<[T; 1]>` that stays allocation-free on
//! the common single-output path.

use std::sync::Arc;

use smallvec::{SmallVec, smallvec};

use crate::error::Result;

/// Per-element output of a chain: zero, one, or many downstream elements.
pub(crate) type StageOutput<T> = SmallVec<[T; 1]>;

type EvalFn<S, T> = Arc<dyn Fn(&S) -> Result<StageOutput<T>> + Send + Sync>;

/// Discriminates the operation a stage performs. Recorded per composed
/// stage for tracing and debug output; evaluation itself dispatches through
/// the composed closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StageKind {
    Source,
    Select,
    Reject,
    Collect,
    FlatCollect,
}

impl StageKind {
    fn label(self) -> &'static str {
        match self {
            StageKind::Source => "source",
            StageKind::Select => "select",
            StageKind::Reject => "reject",
            StageKind::Collect => "collect",
            StageKind::FlatCollect => "flat_collect",
        }
    }
}

/// An immutable chain of stages from source elements `S` to outputs `T`.
///
/// Cloning is cheap (the evaluation closure is shared via `Arc`); every
/// composing method returns a new chain and leaves `self`'s stages intact.
pub(crate) struct StageChain<S, T> {
    eval: EvalFn<S, T>,
    kinds: Vec<StageKind>,
}

impl<S, T> Clone for StageChain<S, T> {
    fn clone(&self) -> Self {
        Self {
            eval: Arc::clone(&self.eval),
            kinds: self.kinds.clone(),
        }
    }
}

impl<S> StageChain<S, S>
where
    S: Clone + Send + Sync + 'static,
{
    /// The identity chain: each source element passes through unchanged.
    pub(crate) fn source() -> Self {
        Self {
            eval: Arc::new(|element: &S| Ok(smallvec![element.clone()])),
            kinds: vec![StageKind::Source],
        }
    }
}

impl<S, T> StageChain<S, T>
where
    S: Send + Sync + 'static,
    T: Send + 'static,
{
    /// Evaluate one source element through every stage of the chain.
    pub(crate) fn evaluate(&self, element: &S) -> Result<StageOutput<T>> {
        (self.eval)(element)
    }

    /// Number of stages composed so far, the identity stage included.
    pub(crate) fn depth(&self) -> usize {
        self.kinds.len()
    }

    /// Human-readable stage listing, e.g. `source->select->collect`.
    pub(crate) fn describe(&self) -> String {
        self.kinds
            .iter()
            .map(|kind| kind.label())
            .collect::<Vec<_>>()
            .join("->")
    }

    fn compose<U, F>(&self, kind: StageKind, eval: F) -> StageChain<S, U>
    where
        F: Fn(&S) -> Result<StageOutput<U>> + Send + Sync + 'static,
    {
        let mut kinds = self.kinds.clone();
        kinds.push(kind);
        StageChain {
            eval: Arc::new(eval),
            kinds,
        }
    }

    /// Keep only elements satisfying `predicate`.
    pub(crate) fn select<P>(&self, predicate: P) -> StageChain<S, T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let prev = Arc::clone(&self.eval);
        self.compose(StageKind::Select, move |element| {
            let mut out = prev(element)?;
            out.retain(|item| predicate(item));
            Ok(out)
        })
    }

    /// Drop elements satisfying `predicate`.
    pub(crate) fn reject<P>(&self, predicate: P) -> StageChain<S, T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let prev = Arc::clone(&self.eval);
        self.compose(StageKind::Reject, move |element| {
            let mut out = prev(element)?;
            out.retain(|item| !predicate(item));
            Ok(out)
        })
    }

    /// Replace each element with the transform's output.
    pub(crate) fn collect<U, F>(&self, transform: F) -> StageChain<S, U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let prev = Arc::clone(&self.eval);
        self.compose(StageKind::Collect, move |element| {
            Ok(prev(element)?.into_iter().map(&transform).collect())
        })
    }

    /// Replace each element with the transform's output, where the transform
    /// may fail. A failed element aborts the batch evaluating it.
    pub(crate) fn try_collect<U, F>(&self, transform: F) -> StageChain<S, U>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U> + Send + Sync + 'static,
    {
        let prev = Arc::clone(&self.eval);
        self.compose(StageKind::Collect, move |element| {
            let mut out = StageOutput::new();
            for item in prev(element)? {
                out.push(transform(item)?);
            }
            Ok(out)
        })
    }

    /// Replace each element with zero or more outputs, each flowing
    /// independently downstream in the transform's own order.
    pub(crate) fn flat_collect<U, I, F>(&self, transform: F) -> StageChain<S, U>
    where
        U: Send + 'static,
        I: IntoIterator<Item = U>,
        F: Fn(T) -> I + Send + Sync + 'static,
    {
        let prev = Arc::clone(&self.eval);
        self.compose(StageKind::FlatCollect, move |element| {
            let mut out = StageOutput::new();
            for item in prev(element)? {
                out.extend(transform(item));
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_identity_chain_clones_source() {
        let chain = StageChain::<u32, u32>::source();
        assert_eq!(chain.evaluate(&7).unwrap().as_slice(), &[7]);
        assert_eq!(chain.depth(), 1);
    }

    #[test]
    fn test_select_suppresses_elements() {
        let chain = StageChain::<u32, u32>::source().select(|x| *x % 2 == 0);
        assert_eq!(chain.evaluate(&4).unwrap().as_slice(), &[4]);
        assert!(chain.evaluate(&3).unwrap().is_empty());
    }

    #[test]
    fn test_reject_is_inverse_of_select() {
        let select = StageChain::<u32, u32>::source().select(|x| *x > 2);
        let reject = StageChain::<u32, u32>::source().reject(|x| *x <= 2);
        for value in 0..5 {
            assert_eq!(
                select.evaluate(&value).unwrap(),
                reject.evaluate(&value).unwrap()
            );
        }
    }

    #[test]
    fn test_collect_transforms() {
        let chain = StageChain::<u32, u32>::source().collect(|x| x * 10);
        assert_eq!(chain.evaluate(&3).unwrap().as_slice(), &[30]);
    }

    #[test]
    fn test_flat_collect_multiplies_elements() {
        let chain = StageChain::<u32, u32>::source().flat_collect(|x| vec![x; x as usize]);
        assert_eq!(chain.evaluate(&3).unwrap().as_slice(), &[3, 3, 3]);
        assert!(chain.evaluate(&0).unwrap().is_empty());
    }

    #[test]
    fn test_composing_leaves_predecessor_intact() {
        let base = StageChain::<u32, u32>::source();
        let doubled = base.collect(|x| x * 2);
        // The predecessor chain still evaluates as the identity.
        assert_eq!(base.evaluate(&5).unwrap().as_slice(), &[5]);
        assert_eq!(doubled.evaluate(&5).unwrap().as_slice(), &[10]);
    }

    #[test]
    fn test_try_collect_propagates_failure() {
        let chain = StageChain::<u32, u32>::source().try_collect(|x| {
            if x == 3 {
                Err(Error::evaluation("cannot handle 3"))
            } else {
                Ok(x)
            }
        });
        assert_eq!(chain.evaluate(&2).unwrap().as_slice(), &[2]);
        assert!(matches!(
            chain.evaluate(&3),
            Err(Error::ElementEvaluation(_))
        ));
    }

    #[test]
    fn test_describe_lists_stages() {
        let chain = StageChain::<u32, u32>::source()
            .select(|x| *x > 0)
            .collect(|x| x + 1);
        assert_eq!(chain.describe(), "source->select->collect");
        assert_eq!(chain.depth(), 3);
    }
}

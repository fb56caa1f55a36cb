//! The execution coordinator: fans batch jobs out across the worker pool
//! and folds their partial results back into one aggregate.
//!
//! A drive is synchronous from the caller's point of view: the calling
//! thread submits one job per batch, then blocks on a kanal channel until
//! every submitted job has reported. Jobs may start and finish in any order;
//! partials are slotted by batch ordinal so order-preserving merges are
//! independent of completion order.
//!
//! On the first failure (a fallible stage erroring, or a stage panicking)
//! the job raises a shared abort flag. Batches that have not started yet
//! observe the flag and report a cancelled partial without evaluating;
//! batches already in flight run to completion and are still awaited, so a
//! failed drive never leaks pool capacity. The first error received is the
//! one surfaced, and no partial aggregate is ever returned alongside it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::aggregate::MergePolicy;
use crate::batch::{self, Batch};
use crate::chain::StageChain;
use crate::error::{Error, Result};
use crate::pool::WorkerPool;

/// Drive the full chain over the source and merge per-batch results.
pub(crate) fn execute<S, T, P>(
    source: &Arc<Vec<S>>,
    pool: &WorkerPool,
    batch_size: usize,
    chain: &StageChain<S, T>,
    policy: &Arc<P>,
) -> Result<P::Output>
where
    S: Send + Sync + 'static,
    T: Send + 'static,
    P: MergePolicy<T> + 'static,
{
    let batches = batch::split(source.len(), batch_size)?;
    if batches.is_empty() {
        // Nothing to do: no jobs are submitted and the terminal
        // short-circuits to the empty aggregate.
        return Ok(policy.merge(Vec::new()));
    }

    tracing::debug!(
        batches = batches.len(),
        batch_size,
        elements = source.len(),
        chain = %chain.describe(),
        "dispatching parallel drive"
    );

    let total = batches.len();
    let (report_tx, report_rx) = kanal::bounded::<BatchReport<P::Partial>>(total);
    let abort = Arc::new(AtomicBool::new(false));

    for batch in batches {
        let source = Arc::clone(source);
        let chain = chain.clone();
        let policy = Arc::clone(policy);
        let abort = Arc::clone(&abort);
        let report_tx = report_tx.clone();

        pool.submit(move || {
            let outcome = if abort.load(Ordering::Acquire) {
                // Another batch already failed or decided the aggregate.
                Ok(None)
            } else {
                run_batch(&source, batch, &chain, &policy, &abort)
            };
            // The driving thread only disappears once all reports are in,
            // so a send failure here means the drive was abandoned.
            let _ = report_tx.send(BatchReport {
                ordinal: batch.ordinal,
                outcome,
            });
        })?;
    }
    drop(report_tx);

    collect_reports::<T, P>(report_rx, total, policy)
}

struct BatchReport<Partial> {
    ordinal: usize,
    /// `Ok(None)` marks a batch cancelled before it started.
    outcome: Result<Option<Partial>>,
}

/// Evaluate one batch's slice of the source through the chain, folding
/// outputs into a policy partial. Panics inside stage closures are caught
/// and reported as element evaluation failures.
fn run_batch<S, T, P>(
    source: &Arc<Vec<S>>,
    batch: Batch,
    chain: &StageChain<S, T>,
    policy: &Arc<P>,
    abort: &AtomicBool,
) -> Result<Option<P::Partial>>
where
    S: Send + Sync + 'static,
    T: Send + 'static,
    P: MergePolicy<T>,
{
    let evaluated = catch_unwind(AssertUnwindSafe(|| {
        let mut partial = policy.new_partial();
        for element in &source[batch.start..batch.end] {
            for item in chain.evaluate(element)? {
                policy.accumulate(&mut partial, item);
            }
        }
        Ok(partial)
    }));

    match evaluated {
        Ok(Ok(partial)) => {
            if policy.is_decisive(&partial) {
                tracing::trace!(ordinal = batch.ordinal, "batch is decisive, aborting rest");
                abort.store(true, Ordering::Release);
            }
            Ok(Some(partial))
        }
        Ok(Err(err)) => {
            tracing::warn!(ordinal = batch.ordinal, error = %err, "batch failed");
            abort.store(true, Ordering::Release);
            Err(err)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(ordinal = batch.ordinal, message, "batch panicked");
            abort.store(true, Ordering::Release);
            Err(Error::ElementEvaluation(format!(
                "stage panicked: {message}"
            )))
        }
    }
}

/// Block until every submitted batch has reported, then merge in ordinal
/// order. Waits out in-flight batches even after a failure so the pool is
/// fully quiesced before the error is surfaced.
fn collect_reports<T, P>(
    report_rx: kanal::Receiver<BatchReport<P::Partial>>,
    total: usize,
    policy: &Arc<P>,
) -> Result<P::Output>
where
    T: Send + 'static,
    P: MergePolicy<T>,
{
    let mut slots: Vec<Option<P::Partial>> = Vec::with_capacity(total);
    slots.resize_with(total, || None);
    let mut first_error: Option<Error> = None;
    let mut cancelled = 0usize;

    for _ in 0..total {
        let report = report_rx.recv().map_err(|_| {
            Error::Pool("worker pool disconnected before the drive finished".into())
        })?;
        match report.outcome {
            Ok(Some(partial)) => {
                let slot = &mut slots[report.ordinal];
                if slot.replace(partial).is_some() && first_error.is_none() {
                    first_error = Some(Error::Aggregation(format!(
                        "duplicate partial result for batch {}",
                        report.ordinal
                    )));
                }
            }
            Ok(None) => cancelled += 1,
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }

    if cancelled > 0 {
        tracing::debug!(cancelled, "batches skipped by short-circuit");
    }

    // Cancelled batches only occur on failure (already returned) or after a
    // decisive partial, where an empty partial cannot change the outcome.
    let partials = slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| policy.new_partial()))
        .collect();
    Ok(policy.merge(partials))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AnySatisfy, CountingBag, OrderedList};

    fn fixture(len: u32) -> Arc<Vec<u32>> {
        Arc::new((0..len).collect())
    }

    #[test]
    fn test_identity_drive_preserves_source_order() {
        let pool = WorkerPool::new(4).unwrap();
        let source = fixture(100);
        let chain = StageChain::<u32, u32>::source();

        for batch_size in [1, 3, 7, 100, 1000] {
            let out = execute(&source, &pool, batch_size, &chain, &Arc::new(OrderedList)).unwrap();
            assert_eq!(out, (0..100).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_empty_source_submits_no_jobs() {
        let pool = WorkerPool::new(2).unwrap();
        let source: Arc<Vec<u32>> = Arc::new(Vec::new());
        let chain = StageChain::<u32, u32>::source();

        let out = execute(&source, &pool, 8, &chain, &Arc::new(OrderedList)).unwrap();
        assert!(out.is_empty());
        assert_eq!(pool.jobs_completed(), 0);
    }

    #[test]
    fn test_zero_batch_size_fails_before_submitting() {
        let pool = WorkerPool::new(2).unwrap();
        let source = fixture(10);
        let chain = StageChain::<u32, u32>::source();

        let result = execute(&source, &pool, 0, &chain, &Arc::new(OrderedList));
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
        assert_eq!(pool.jobs_completed(), 0);
    }

    #[test]
    fn test_failing_stage_surfaces_first_error() {
        let pool = WorkerPool::new(4).unwrap();
        let source = fixture(64);
        let chain = StageChain::<u32, u32>::source().try_collect(|x| {
            if x % 10 == 3 {
                Err(Error::evaluation(format!("cannot handle {x}")))
            } else {
                Ok(x)
            }
        });

        let result = execute(&source, &pool, 4, &chain, &Arc::new(OrderedList));
        assert!(matches!(result, Err(Error::ElementEvaluation(_))));
    }

    #[test]
    fn test_panicking_stage_reported_as_evaluation_failure() {
        let pool = WorkerPool::new(2).unwrap();
        let source = fixture(8);
        let chain = StageChain::<u32, u32>::source().collect(|x| {
            if x == 5 {
                panic!("boom at {x}");
            }
            x
        });

        let result = execute(&source, &pool, 2, &chain, &Arc::new(OrderedList));
        match result {
            Err(Error::ElementEvaluation(message)) => {
                assert!(message.contains("boom at 5"), "got: {message}")
            }
            other => panic!("expected evaluation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_multiset_multiplicity_additive_across_batches() {
        let pool = WorkerPool::new(3).unwrap();
        let source = Arc::new(vec![1u32, 1, 1, 1, 2, 2, 2, 2]);
        let chain = StageChain::<u32, u32>::source();

        // Occurrences of each element straddle batch boundaries at every
        // batch size; the merged multiplicities must not depend on the split.
        for batch_size in [1, 2, 3, 8] {
            let bag = execute(&source, &pool, batch_size, &chain, &Arc::new(CountingBag)).unwrap();
            assert_eq!(bag.occurrences_of(&1), 4);
            assert_eq!(bag.occurrences_of(&2), 4);
            assert_eq!(bag.len(), 8);
        }
    }

    #[test]
    fn test_decisive_partial_short_circuits_correctly() {
        let pool = WorkerPool::new(2).unwrap();
        let source = fixture(10_000);
        let chain = StageChain::<u32, u32>::source();
        let policy = Arc::new(AnySatisfy {
            predicate: Arc::new(|x: &u32| *x == 3),
        });

        // Correct regardless of how many trailing batches were skipped.
        assert!(execute(&source, &pool, 16, &chain, &policy).unwrap());

        let never = Arc::new(AnySatisfy {
            predicate: Arc::new(|_: &u32| false),
        });
        assert!(!execute(&source, &pool, 16, &chain, &never).unwrap());
    }

    #[test]
    fn test_redrive_yields_equal_aggregate() {
        let pool = WorkerPool::new(4).unwrap();
        let source = fixture(50);
        let chain = StageChain::<u32, u32>::source().collect(|x| x / 5);

        let first = execute(&source, &pool, 7, &chain, &Arc::new(CountingBag)).unwrap();
        let second = execute(&source, &pool, 7, &chain, &Arc::new(CountingBag)).unwrap();
        assert_eq!(first, second);
    }
}

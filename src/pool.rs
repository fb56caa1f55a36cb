//! A caller-owned pool of worker threads.
//!
//! The pool is an explicit resource: pipelines borrow a reference to it and
//! never create, resize, or shut it down. Its lifecycle belongs to whoever
//! constructed it; dropping the pool closes the job queue and joins every
//! worker.
//!
//! Jobs are boxed closures pulled from an unbounded kanal channel by a fixed
//! set of named threads. A panicking job is caught and logged so the worker
//! thread stays available for subsequent jobs.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of worker threads consuming jobs from a shared queue.
pub struct WorkerPool {
    // Some until Drop; dropping the sender disconnects the queue so workers
    // drain pending jobs and exit.
    sender: Option<kanal::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    completed: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Create a pool with `threads` worker threads.
    ///
    /// Fails with [`Error::InvalidConfiguration`] when `threads` is zero and
    /// with [`Error::Pool`] when a worker thread cannot be spawned.
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::InvalidConfiguration(
                "worker pool needs at least one thread".into(),
            ));
        }

        let (sender, receiver) = kanal::unbounded::<Job>();
        let completed = Arc::new(AtomicU64::new(0));

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = receiver.clone();
            let completed = Arc::clone(&completed);
            let handle = std::thread::Builder::new()
                .name(format!("parafold-worker-{index}"))
                .spawn(move || worker_loop(index, receiver, completed))
                .map_err(|e| Error::Pool(format!("failed to spawn worker: {e}")))?;
            workers.push(handle);
        }

        tracing::debug!(threads, "worker pool started");
        Ok(Self {
            sender: Some(sender),
            workers,
            completed,
        })
    }

    /// Submit a job for execution on some worker thread.
    ///
    /// Jobs may start and finish in any order relative to each other.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.sender {
            Some(sender) => sender
                .send(Box::new(job))
                .map_err(|_| Error::Pool("job queue closed".into())),
            None => Err(Error::Pool("worker pool is shut down".into())),
        }
    }

    /// Number of worker threads in the pool.
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Total jobs that have finished running (panicked jobs included).
    pub fn jobs_completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropping the sender disconnects the queue; each worker drains
        // pending jobs and exits.
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked outside a job");
            }
        }
        tracing::debug!("worker pool shut down");
    }
}

fn worker_loop(index: usize, receiver: kanal::Receiver<Job>, completed: Arc<AtomicU64>) {
    while let Ok(job) = receiver.recv() {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::warn!(worker = index, "job panicked; worker continues");
        }
        completed.fetch_add(1, Ordering::AcqRel);
    }
    tracing::trace!(worker = index, "worker exiting");
}

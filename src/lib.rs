//! # parafold
//!
//! Parallel lazy evaluation pipelines over in-memory collections.
//!
//! A pipeline wraps a source collection, a caller-owned worker pool, and a
//! batch size. Chained operations (`select`, `reject`, `collect`,
//! `flat_collect`, `group_by`) build an immutable stage chain without doing
//! any work; terminals (`to_list`, `to_set`, `to_bag`, `to_grouped`,
//! `for_each`) split the source into contiguous batches, evaluate the full
//! chain over each batch on the pool's worker threads, and merge the
//! batch-local results into one aggregate whose semantics (sequence order,
//! set uniqueness, or multiset multiplicity) hold regardless of how the
//! work was scheduled.
//!
//! ## Quick Start
//!
//! ```rust
//! use parafold::prelude::*;
//! use std::sync::Arc;
//!
//! let pool = Arc::new(WorkerPool::new(4)?);
//!
//! let bag = vec![1, 2, 2, 3, 3, 3]
//!     .as_parallel(pool, 2)?
//!     .select(|x| *x > 1)
//!     .collect(|x| x * 10)
//!     .to_bag()?;
//!
//! assert_eq!(bag.occurrences_of(&20), 2);
//! assert_eq!(bag.occurrences_of(&30), 3);
//! # Ok::<(), parafold::Error>(())
//! ```
//!
//! ## Guarantees
//!
//! - A terminal call is a blocking, parallel fan-out/fan-in call; batches
//!   never depend on each other's results.
//! - Ordered terminals reproduce the source's relative order across batch
//!   boundaries; set/bag terminals impose no enumeration order.
//! - On failure the first observed error is surfaced and no partial
//!   aggregate is ever returned.
//! - The worker pool is a caller-owned resource; pipelines reference it and
//!   never manage its lifecycle.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bag;
pub mod batch;
pub mod error;
pub mod pipeline;
pub mod pool;

mod aggregate;
mod chain;
mod executor;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::bag::Bag;
    pub use crate::error::{Error, Result};
    pub use crate::pipeline::{AsParallel, ParallelPipeline};
    pub use crate::pool::WorkerPool;
}

pub use error::{Error, Result};

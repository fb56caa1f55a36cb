//! Batch splitting: partitioning a source into contiguous units of work.
//!
//! A terminal drive splits the source into `ceil(N / B)` contiguous,
//! non-overlapping index ranges. Each batch becomes exactly one job on the
//! worker pool, and its ordinal position is what lets order-preserving
//! terminals reassemble results regardless of completion order.

use crate::error::{Error, Result};

/// A contiguous half-open slice `[start, end)` of the source, plus its
/// ordinal position among all batches of one drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    /// Position of this batch among all batches of one drive (0-based).
    pub ordinal: usize,
    /// First source index covered (inclusive).
    pub start: usize,
    /// One past the last source index covered (exclusive).
    pub end: usize,
}

impl Batch {
    /// Number of source elements in this batch.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the batch covers no elements.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split a source of `len` elements into batches of at most `batch_size`.
///
/// Returns batches in ascending ordinal order, covering `[0, len)` exactly
/// once with no overlap. Every batch except possibly the last has exactly
/// `batch_size` elements. An empty source yields zero batches.
pub fn split(len: usize, batch_size: usize) -> Result<Vec<Batch>> {
    if batch_size == 0 {
        return Err(Error::InvalidConfiguration(
            "batch size must be positive".into(),
        ));
    }

    let count = len.div_ceil(batch_size);
    let mut batches = Vec::with_capacity(count);
    for ordinal in 0..count {
        let start = ordinal * batch_size;
        let end = usize::min(start + batch_size, len);
        batches.push(Batch {
            ordinal,
            start,
            end,
        });
    }
    Ok(batches)
}

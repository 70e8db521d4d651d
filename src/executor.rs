//! Executor contract: how work is spread over a worker pool.
//!
//! The drivers never talk to a threading library directly; they hand
//! contiguous index ranges to an [`Executor`]. Work is divided into blocks
//! of `block_size` points by [`batch_for`], with progress and interrupt
//! probes firing strictly between blocks, never mid-block. Within a block
//! the executor splits the range into chunks of at least `grain_size`
//! indices and runs them to completion; there are no suspension points.

use std::ops::Range;

use rayon::prelude::*;

use crate::error::{DescentError, Result};
use crate::progress::Progress;

/// Capability interface for running a loop body over index sub-ranges.
pub trait Executor: Sync {
    fn parallel_for(&self, range: Range<usize>, grain_size: usize, body: &(dyn Fn(Range<usize>) + Sync));
}

/// Runs everything inline on the calling thread.
pub struct SerialExecutor;

impl Executor for SerialExecutor {
    fn parallel_for(
        &self,
        range: Range<usize>,
        _grain_size: usize,
        body: &(dyn Fn(Range<usize>) + Sync),
    ) {
        if !range.is_empty() {
            body(range);
        }
    }
}

/// Fixed-size rayon pool; `n_threads` workers run chunks to completion.
pub struct RayonExecutor {
    pool: rayon::ThreadPool,
}

impl RayonExecutor {
    pub fn new(n_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build()
            .map_err(|e| DescentError::InvalidParameter(format!("n_threads: {e}")))?;
        Ok(Self { pool })
    }
}

impl Executor for RayonExecutor {
    fn parallel_for(
        &self,
        range: Range<usize>,
        grain_size: usize,
        body: &(dyn Fn(Range<usize>) + Sync),
    ) {
        if range.is_empty() {
            return;
        }
        let grain = grain_size.max(1);
        let chunks: Vec<Range<usize>> = range
            .clone()
            .step_by(grain)
            .map(|begin| begin..(begin + grain).min(range.end))
            .collect();
        self.pool
            .install(|| chunks.into_par_iter().for_each(|chunk| body(chunk)));
    }
}

/// Run `body` over `0..n` in blocks of `block_size`, consulting the
/// progress collaborator between blocks. Returns true if an interrupt
/// fired, in which case remaining blocks are abandoned.
pub fn batch_for(
    executor: &dyn Executor,
    progress: &mut dyn Progress,
    n: usize,
    block_size: usize,
    grain_size: usize,
    body: &(dyn Fn(Range<usize>) + Sync),
) -> bool {
    let mut begin = 0;
    while begin < n {
        let end = (begin + block_size).min(n);
        executor.parallel_for(begin..end, grain_size, body);
        if progress.check_interrupt() {
            return true;
        }
        progress.block_finished();
        begin = end;
    }
    false
}

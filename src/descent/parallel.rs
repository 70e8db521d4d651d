//! Parallel descent driver.
//!
//! Same contract as the serial loop, scheduled over a fixed worker pool:
//!
//! - candidate building parallelizes per point, with pushes serialized by
//!   the striped mutex bank (a pair push lands on two arbitrary rows);
//! - the retained-flag pass is row-owned and lock-free;
//! - local joins run in blocks of `block_size` points. With `low_memory`
//!   the streaming strategy pushes inline under the stripes; otherwise
//!   pairs are generated per block, deduplicated once, and only then
//!   evaluated and applied in parallel.
//!
//! Candidate sampling draws its random stream from the root seed and the
//! point range, not the worker id, so a fixed seed gives the same samples
//! at any thread count. Heap contents can still differ from a serial run
//! where equal distances race for the last slot; recall is unaffected.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rand::Rng;

use crate::descent::{stream_rng, NndParams, Termination};
use crate::dist::Distance;
use crate::error::Result;
use crate::executor::{Executor, RayonExecutor};
use crate::heap::{NnHeap, NndHeap, NPOS};
use crate::progress::Progress;
use crate::sync::{SharedNnHeap, SharedNndHeap, StripeLocks};
use crate::update::{collect_join_pairs, local_join_pairs};
use crate::Scalar;

pub(crate) fn nnd_build_parallel<T: Scalar>(
    heap: &mut NndHeap<T>,
    distance: &dyn Distance<T>,
    params: &NndParams,
    progress: &mut dyn Progress,
) -> Result<Termination> {
    let executor = RayonExecutor::new(params.n_threads)?;
    let n_points = heap.n_points;
    let n_nbrs = heap.n_nbrs;
    let max_candidates = params.max_candidates.unwrap_or(n_nbrs);
    let tol = params.delta * n_nbrs as f64 * n_points as f64;
    let grain = params.grain_size;
    let locks = StripeLocks::new();

    for iter in 0..params.n_iters {
        let mut new_cands = NnHeap::<f32>::new(n_points, max_candidates);
        let mut old_cands = NnHeap::<f32>::new(n_points, max_candidates);
        {
            let shared_new = SharedNnHeap::new(&mut new_cands, &locks);
            let shared_old = SharedNnHeap::new(&mut old_cands, &locks);
            let current = &*heap;
            executor.parallel_for(0..n_points, grain, &|range| {
                let mut rng = stream_rng(params.seed, iter as u64, range.start as u64);
                for i in range {
                    let i = i as u32;
                    for j in 0..n_nbrs {
                        let nbr = current.index(i, j);
                        if nbr == NPOS {
                            continue;
                        }
                        let priority: f32 = rng.random();
                        if current.flag(i, j) {
                            shared_new.checked_push_pair(i, priority, nbr);
                        } else {
                            shared_old.checked_push_pair(i, priority, nbr);
                        }
                    }
                }
            });
        }

        {
            let shared = SharedNndHeap::new(heap, &locks);
            let new_ref = &new_cands;
            executor.parallel_for(0..n_points, grain, &|range| {
                for i in range {
                    let i = i as u32;
                    shared.mark_retained(i, new_ref.row_idx(i));
                }
            });
        }

        let c_iter = AtomicUsize::new(0);
        let mut interrupted = false;
        {
            let shared = SharedNndHeap::new(heap, &locks);
            let new_ref = &new_cands;
            let old_ref = &old_cands;
            let mut begin = 0;
            while begin < n_points {
                let end = (begin + params.block_size).min(n_points);
                if params.low_memory {
                    executor.parallel_for(begin..end, grain, &|range| {
                        let mut c = 0;
                        for i in range {
                            let i = i as u32;
                            local_join_pairs(new_ref.row_idx(i), old_ref.row_idx(i), |p, q| {
                                let d = distance.distance(p, q);
                                c += shared.checked_push_pair(p, d, q, true);
                            });
                        }
                        c_iter.fetch_add(c, Ordering::Relaxed);
                    });
                } else {
                    let staged: Mutex<Vec<(u32, u32)>> = Mutex::new(Vec::new());
                    executor.parallel_for(begin..end, grain, &|range| {
                        let mut local: Vec<(u32, u32)> = Vec::new();
                        for i in range {
                            let i = i as u32;
                            local.extend(collect_join_pairs(
                                new_ref.row_idx(i),
                                old_ref.row_idx(i),
                            ));
                        }
                        staged.lock().append(&mut local);
                    });
                    let mut pairs = staged.into_inner();
                    pairs.sort_unstable();
                    pairs.dedup();
                    let pairs = &pairs;
                    executor.parallel_for(0..pairs.len(), grain, &|range| {
                        let mut c = 0;
                        for t in range {
                            let (p, q) = pairs[t];
                            let d = distance.distance(p, q);
                            c += shared.checked_push_pair(p, d, q, true);
                        }
                        c_iter.fetch_add(c, Ordering::Relaxed);
                    });
                }
                if progress.check_interrupt() {
                    interrupted = true;
                    break;
                }
                progress.block_finished();
                begin = end;
            }
        }
        if interrupted {
            return Ok(Termination::Interrupted);
        }

        let c = c_iter.into_inner();
        if progress.wants_heap_report() {
            progress.heap_report(heap.dist_sum());
        }
        progress.iter_finished(iter, params.n_iters);
        if (c as f64) <= tol {
            progress.converged(c, tol);
            return Ok(Termination::Converged);
        }
    }
    Ok(Termination::MaxIterations)
}

//! General-neighbor candidate sampling.
//!
//! Each descent iteration works on a per-point sample of the current
//! graph's forward *and* reverse neighbors. Entries are pushed into
//! fixed-capacity heaps keyed by fresh uniform random priorities rather
//! than distances, which draws `max_candidates` uniformly from the union
//! of both directions: the symmetric push deposits each edge on both
//! endpoints' candidate rows.
//!
//! Entries split by their "new" flag into two heaps. A pair of points is
//! only compared later if at least one of them is new, so after sampling
//! the entries that were retained in the new candidate heap are flipped
//! to old in the current graph: they are about to participate in a local
//! join and need not be offered again. This is the incremental bookkeeping
//! that makes the descent converge.

use rand::Rng;

use crate::heap::{NnHeap, NndHeap, NPOS};
use crate::Scalar;

/// Random-priority candidate heaps: `(new, old)`.
pub fn build_candidates<T: Scalar, R: Rng>(
    current: &NndHeap<T>,
    max_candidates: usize,
    rng: &mut R,
) -> (NnHeap<f32>, NnHeap<f32>) {
    let mut new_cands = NnHeap::new(current.n_points, max_candidates);
    let mut old_cands = NnHeap::new(current.n_points, max_candidates);
    for i in 0..current.n_points as u32 {
        for j in 0..current.n_nbrs {
            let nbr = current.index(i, j);
            if nbr == NPOS {
                continue;
            }
            let priority: f32 = rng.random();
            if current.flag(i, j) {
                new_cands.checked_push_pair(i, priority, nbr);
            } else {
                old_cands.checked_push_pair(i, priority, nbr);
            }
        }
    }
    (new_cands, old_cands)
}

/// Flip to old every still-new graph entry that was retained in the new
/// candidate sample.
pub fn flag_retained_new<T: Scalar>(current: &mut NndHeap<T>, new_cands: &NnHeap<f32>) {
    for i in 0..current.n_points as u32 {
        for j in 0..current.n_nbrs {
            let nbr = current.index(i, j);
            if nbr != NPOS && current.flag(i, j) && new_cands.contains(i, nbr) {
                current.set_flag(i, j, false);
            }
        }
    }
}

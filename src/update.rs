//! Graph updaters: how candidate pairs become heap updates.
//!
//! Two strategies with the same `{generate, apply}` surface:
//!
//! - [`StreamingUpdate`] evaluates the distance and pushes immediately.
//!   Constant memory, but a pair reachable from several candidate rows is
//!   evaluated once per appearance.
//! - [`BatchUpdate`] stages canonicalized pairs and deduplicates them
//!   before any distance is computed, trading O(staged) memory for fewer
//!   kernel calls.
//!
//! Neither strategy evaluates `(p, p)`, and sentinel slots never reach an
//! updater: the pair emitter skips them.

use smallvec::SmallVec;

use crate::dist::Distance;
use crate::heap::{NndHeap, NPOS};
use crate::Scalar;

/// Capability interface for applying local-join results to the heap.
pub trait GraphUpdate<T: Scalar> {
    /// Consider the unordered candidate pair `(p, q)`. Returns the number
    /// of heap slots updated now (streaming) or 0 if staged (batched).
    fn generate(&mut self, heap: &mut NndHeap<T>, p: u32, q: u32) -> usize;

    /// Flush staged updates, returning the number of slots updated.
    fn apply(&mut self, heap: &mut NndHeap<T>) -> usize;
}

/// Low-memory updater: evaluate and push inline.
pub struct StreamingUpdate<'a, T> {
    distance: &'a dyn Distance<T>,
}

impl<'a, T: Scalar> StreamingUpdate<'a, T> {
    pub fn new(distance: &'a dyn Distance<T>) -> Self {
        Self { distance }
    }
}

impl<T: Scalar> GraphUpdate<T> for StreamingUpdate<'_, T> {
    fn generate(&mut self, heap: &mut NndHeap<T>, p: u32, q: u32) -> usize {
        if p == q {
            return 0;
        }
        let d = self.distance.distance(p, q);
        heap.checked_push_pair(p, d, q, true)
    }

    fn apply(&mut self, _heap: &mut NndHeap<T>) -> usize {
        0
    }
}

/// High-memory updater: stage pairs, deduplicate, then evaluate.
pub struct BatchUpdate<'a, T> {
    distance: &'a dyn Distance<T>,
    staged: Vec<(u32, u32)>,
}

impl<'a, T: Scalar> BatchUpdate<'a, T> {
    pub fn new(distance: &'a dyn Distance<T>) -> Self {
        Self {
            distance,
            staged: Vec::new(),
        }
    }
}

impl<T: Scalar> GraphUpdate<T> for BatchUpdate<'_, T> {
    fn generate(&mut self, _heap: &mut NndHeap<T>, p: u32, q: u32) -> usize {
        if p == q {
            return 0;
        }
        self.staged.push(canonical_pair(p, q));
        0
    }

    fn apply(&mut self, heap: &mut NndHeap<T>) -> usize {
        self.staged.sort_unstable();
        self.staged.dedup();
        let mut c = 0;
        for &(p, q) in &self.staged {
            let d = self.distance.distance(p, q);
            c += heap.checked_push_pair(p, d, q, true);
        }
        self.staged.clear();
        c
    }
}

/// Unordered pair in canonical (min, max) order, so `(p, q)` and `(q, p)`
/// deduplicate together.
#[inline]
pub(crate) fn canonical_pair(p: u32, q: u32) -> (u32, u32) {
    if p <= q {
        (p, q)
    } else {
        (q, p)
    }
}

/// Emit the local-join pairs of one candidate row: the upper triangle of
/// new x new plus all of new x old, skipping sentinels. Identity pairs
/// cannot arise (candidate rows are deduplicated), but updaters reject
/// them anyway.
pub(crate) fn local_join_pairs(
    new_row: &[u32],
    old_row: &[u32],
    mut visit: impl FnMut(u32, u32),
) {
    for (a, &p) in new_row.iter().enumerate() {
        if p == NPOS {
            continue;
        }
        for &q in &new_row[a + 1..] {
            if q != NPOS {
                visit(p, q);
            }
        }
        for &q in old_row {
            if q != NPOS {
                visit(p, q);
            }
        }
    }
}

/// Collected join pairs for one candidate row; the parallel driver stages
/// these per task before merging into the block's update list.
pub(crate) fn collect_join_pairs(new_row: &[u32], old_row: &[u32]) -> SmallVec<[(u32, u32); 32]> {
    let mut pairs = SmallVec::new();
    local_join_pairs(new_row, old_row, |p, q| pairs.push(canonical_pair(p, q)));
    pairs
}

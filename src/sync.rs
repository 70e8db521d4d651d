//! Striped row locking for the parallel descent phases.
//!
//! The heap is the only mutable shared resource during a parallel pass.
//! Rows are sharded over a fixed bank of mutexes (`row % n_stripes`), so
//! writes to the same row serialize while different rows proceed
//! concurrently. Two access modes exist:
//!
//! - *striped*: `checked_push` / `checked_push_pair` take the row's stripe
//!   lock; any task may target any row.
//! - *row-owned*: the flag-maintenance and query-refinement passes touch
//!   only the row assigned to the calling task, so they skip the lock.
//!
//! Both modes materialize disjoint `&mut` row slices from raw pointers;
//! soundness rests on the stripe discipline (same row never aliased, rows
//! are disjoint array regions).

use std::marker::PhantomData;

use parking_lot::Mutex;

use crate::heap::{row_checked_push, row_checked_push_key, HeapKey, NnHeap, NndHeap, NPOS};
use crate::Scalar;

const DEFAULT_STRIPES: usize = 16;

/// Fixed bank of mutexes sharding heap rows.
pub(crate) struct StripeLocks {
    stripes: Vec<Mutex<()>>,
}

impl StripeLocks {
    pub(crate) fn new() -> Self {
        Self {
            stripes: (0..DEFAULT_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    #[inline]
    fn lock(&self, row: u32) -> parking_lot::MutexGuard<'_, ()> {
        self.stripes[row as usize % self.stripes.len()].lock()
    }
}

/// Flagged heap shared across join workers.
pub(crate) struct SharedNndHeap<'a, T> {
    idx: *mut u32,
    dist: *mut T,
    flags: *mut bool,
    n_nbrs: usize,
    locks: &'a StripeLocks,
    _marker: PhantomData<&'a mut NndHeap<T>>,
}

unsafe impl<T: Send> Sync for SharedNndHeap<'_, T> {}

impl<'a, T: Scalar> SharedNndHeap<'a, T> {
    pub(crate) fn new(heap: &'a mut NndHeap<T>, locks: &'a StripeLocks) -> Self {
        debug_assert!(!heap.is_sorted(), "parallel push into a sorted heap");
        Self {
            idx: heap.idx.as_mut_ptr(),
            dist: heap.dist.as_mut_ptr(),
            flags: heap.flags.as_mut_ptr(),
            n_nbrs: heap.n_nbrs,
            locks,
            _marker: PhantomData,
        }
    }

    /// Materialize row `i` as mutable slices.
    ///
    /// SAFETY: the caller must either hold the row's stripe lock or be the
    /// task that exclusively owns row `i` for the current pass.
    #[allow(clippy::mut_from_ref)]
    unsafe fn row(&self, i: u32) -> (&mut [u32], &mut [T], &mut [bool]) {
        let at = i as usize * self.n_nbrs;
        (
            std::slice::from_raw_parts_mut(self.idx.add(at), self.n_nbrs),
            std::slice::from_raw_parts_mut(self.dist.add(at), self.n_nbrs),
            std::slice::from_raw_parts_mut(self.flags.add(at), self.n_nbrs),
        )
    }

    pub(crate) fn checked_push(&self, i: u32, d: T, j: u32, flag: bool) -> usize {
        let guard = self.locks.lock(i);
        let (idx, dist, flags) = unsafe { self.row(i) };
        let n = row_checked_push(idx, dist, flags, d, j, flag);
        drop(guard);
        n
    }

    pub(crate) fn checked_push_pair(&self, i: u32, d: T, j: u32, flag: bool) -> usize {
        if i == j {
            return self.checked_push(i, d, j, flag);
        }
        self.checked_push(i, d, j, flag) + self.checked_push(j, d, i, flag)
    }

    /// Lock-free push into a row owned by the calling task.
    pub(crate) fn push_owned(&self, i: u32, d: T, j: u32, flag: bool) -> usize {
        let (idx, dist, flags) = unsafe { self.row(i) };
        row_checked_push(idx, dist, flags, d, j, flag)
    }

    /// Row-owned retained-new pass: flip to old every still-new entry of
    /// row `i` that made it into the sampled candidate list.
    pub(crate) fn mark_retained(&self, i: u32, retained: &[u32]) {
        let (idx, _, flags) = unsafe { self.row(i) };
        for (s, &nbr) in idx.iter().enumerate() {
            if flags[s] && nbr != NPOS && retained.contains(&nbr) {
                flags[s] = false;
            }
        }
    }

    /// Row-owned flag flip for a single slot.
    pub(crate) fn set_flag_owned(&self, i: u32, slot: usize, flag: bool) {
        let (_, _, flags) = unsafe { self.row(i) };
        flags[slot] = flag;
    }

    /// Row-owned slot reads.
    pub(crate) fn index_owned(&self, i: u32, slot: usize) -> u32 {
        let (idx, _, _) = unsafe { self.row(i) };
        idx[slot]
    }

    pub(crate) fn flag_owned(&self, i: u32, slot: usize) -> bool {
        let (_, _, flags) = unsafe { self.row(i) };
        flags[slot]
    }
}

/// Flagless heap shared across candidate workers.
pub(crate) struct SharedNnHeap<'a, K> {
    idx: *mut u32,
    key: *mut K,
    n_nbrs: usize,
    locks: &'a StripeLocks,
    _marker: PhantomData<&'a mut NnHeap<K>>,
}

unsafe impl<K: Send> Sync for SharedNnHeap<'_, K> {}

impl<'a, K: HeapKey> SharedNnHeap<'a, K> {
    pub(crate) fn new(heap: &'a mut NnHeap<K>, locks: &'a StripeLocks) -> Self {
        debug_assert!(!heap.is_sorted(), "parallel push into a sorted heap");
        Self {
            idx: heap.idx.as_mut_ptr(),
            key: heap.key.as_mut_ptr(),
            n_nbrs: heap.n_nbrs,
            locks,
            _marker: PhantomData,
        }
    }

    /// SAFETY: same row discipline as [`SharedNndHeap::row`].
    #[allow(clippy::mut_from_ref)]
    unsafe fn row(&self, i: u32) -> (&mut [u32], &mut [K]) {
        let at = i as usize * self.n_nbrs;
        (
            std::slice::from_raw_parts_mut(self.idx.add(at), self.n_nbrs),
            std::slice::from_raw_parts_mut(self.key.add(at), self.n_nbrs),
        )
    }

    pub(crate) fn checked_push(&self, i: u32, k: K, j: u32) -> usize {
        let guard = self.locks.lock(i);
        let (idx, key) = unsafe { self.row(i) };
        let n = row_checked_push_key(idx, key, k, j);
        drop(guard);
        n
    }

    pub(crate) fn checked_push_pair(&self, i: u32, k: K, j: u32) -> usize {
        if i == j {
            return self.checked_push(i, k, j);
        }
        self.checked_push(i, k, j) + self.checked_push(j, k, i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn striped_pushes_preserve_row_invariants() {
        let n_points = 64;
        let n_nbrs = 8;
        let mut heap = NndHeap::<f32>::new(n_points, n_nbrs);
        let locks = StripeLocks::new();
        {
            let shared = SharedNndHeap::new(&mut heap, &locks);
            let shared = &shared;
            // Every worker pushes pairs that collide heavily across rows.
            (0..n_points as u32).into_par_iter().for_each(|i| {
                for j in 0..n_points as u32 {
                    let d = ((i as f32) - (j as f32)).abs() / n_points as f32;
                    shared.checked_push_pair(i, d, j, true);
                }
            });
        }
        for i in 0..n_points as u32 {
            let mut seen: Vec<u32> = heap
                .row_idx(i)
                .iter()
                .copied()
                .filter(|&j| j != NPOS)
                .collect();
            let before = seen.len();
            seen.sort_unstable();
            seen.dedup();
            assert_eq!(seen.len(), before, "duplicate neighbor in row {i}");
            let top = heap.top_distance(i);
            for j in 0..n_nbrs {
                assert!(heap.distance(i, j) <= top);
            }
        }
    }

    #[test]
    fn owned_row_operations_do_not_need_locks() {
        let mut heap = NndHeap::<f32>::new(4, 2);
        heap.checked_push(0, 1.0, 1, true);
        heap.checked_push(0, 2.0, 2, true);
        let locks = StripeLocks::new();
        let shared = SharedNndHeap::new(&mut heap, &locks);
        shared.mark_retained(0, &[2]);
        drop(shared);
        for j in 0..2 {
            let expected = heap.index(0, j) != 2;
            assert_eq!(heap.flag(0, j), expected);
        }
    }
}

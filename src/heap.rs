//! Bounded neighbor heaps.
//!
//! The central data structure of the crate: a collection of fixed-capacity
//! binary max-heaps, one row per point, stored as flat row-major arrays.
//! Each row tracks the k best (smallest-distance) neighbors seen so far;
//! the row root holds the *worst* kept distance, so a candidate can be
//! accepted or rejected with a single comparison.
//!
//! Two flavors exist:
//!
//! - [`NndHeap`] carries a "new" flag per slot and is what nearest neighbor
//!   descent iterates on. The flag records whether a slot has participated
//!   in a local join yet; it is the bookkeeping that makes the incremental
//!   search converge.
//! - [`NnHeap`] is flagless and generic over the key type, and serves for
//!   finished graphs, candidate sets (keyed by random priorities) and the
//!   compound-keyed heaps used by the hubness operators.
//!
//! Insertion is `checked_push`: strictly-better-than-root, with a linear
//! row scan to reject duplicate indices. Rows are destructively sorted into
//! ascending order by [`NndHeap::deheap_sort`]; sorting is terminal for the
//! heap and idempotent.
//!
//! The heap performs no synchronization of its own. Parallel callers go
//! through the striped wrappers in the sync module.

use num_traits::Float;

use crate::Scalar;

/// Sentinel index marking an empty heap slot or a missing neighbor.
pub const NPOS: u32 = u32::MAX;

/// Key stored in a flagless neighbor heap.
///
/// Ordinary heaps key rows by distance; the hubness operators reuse the
/// same heap with compound keys ([`KoDist`], [`ScaledDist`]). `unfilled`
/// is the sentinel an empty slot holds, and must compare greater than or
/// equal to every real key.
pub trait HeapKey: Copy + PartialOrd {
    fn unfilled() -> Self;
}

impl HeapKey for f32 {
    fn unfilled() -> Self {
        f32::INFINITY
    }
}

impl HeapKey for f64 {
    fn unfilled() -> Self {
        f64::INFINITY
    }
}

/// k-occurrence heap key: orders by occurrence count first, raw distance
/// second, so that less hub-like neighbors sort ahead of popular ones.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct KoDist<T> {
    pub occurrence: u32,
    pub dist: T,
}

impl<T: Float> HeapKey for KoDist<T> {
    fn unfilled() -> Self {
        KoDist {
            occurrence: u32::MAX,
            dist: T::infinity(),
        }
    }
}

/// Locally-scaled heap key: orders by scaled distance first, raw second.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct ScaledDist<T> {
    pub scaled: T,
    pub dist: T,
}

impl<T: Float> HeapKey for ScaledDist<T> {
    fn unfilled() -> Self {
        ScaledDist {
            scaled: T::infinity(),
            dist: T::infinity(),
        }
    }
}

// Row-level primitives shared between the owned heaps and the striped
// parallel wrappers, which materialize disjoint row slices from raw parts.

pub(crate) fn row_checked_push<T: PartialOrd + Copy>(
    idx: &mut [u32],
    dist: &mut [T],
    flags: &mut [bool],
    d: T,
    j: u32,
    flag: bool,
) -> usize {
    if !(d < dist[0]) {
        return 0;
    }
    if idx.contains(&j) {
        return 0;
    }
    idx[0] = j;
    dist[0] = d;
    flags[0] = flag;
    siftdown_flagged(idx, dist, flags, idx.len());
    1
}

pub(crate) fn row_checked_push_key<K: PartialOrd + Copy>(
    idx: &mut [u32],
    key: &mut [K],
    k: K,
    j: u32,
) -> usize {
    if !(k < key[0]) {
        return 0;
    }
    if idx.contains(&j) {
        return 0;
    }
    idx[0] = j;
    key[0] = k;
    siftdown(idx, key, idx.len());
    1
}

/// Restore the max-heap property after the root of a row was replaced.
fn siftdown<K: PartialOrd + Copy>(idx: &mut [u32], key: &mut [K], len: usize) {
    let mut elt = 0;
    loop {
        let left = 2 * elt + 1;
        let right = left + 1;
        let mut swap = elt;
        if left < len && key[left] > key[swap] {
            swap = left;
        }
        if right < len && key[right] > key[swap] {
            swap = right;
        }
        if swap == elt {
            return;
        }
        idx.swap(elt, swap);
        key.swap(elt, swap);
        elt = swap;
    }
}

fn siftdown_flagged<T: PartialOrd + Copy>(
    idx: &mut [u32],
    dist: &mut [T],
    flags: &mut [bool],
    len: usize,
) {
    let mut elt = 0;
    loop {
        let left = 2 * elt + 1;
        let right = left + 1;
        let mut swap = elt;
        if left < len && dist[left] > dist[swap] {
            swap = left;
        }
        if right < len && dist[right] > dist[swap] {
            swap = right;
        }
        if swap == elt {
            return;
        }
        idx.swap(elt, swap);
        dist.swap(elt, swap);
        flags.swap(elt, swap);
        elt = swap;
    }
}

/// Flagged neighbor heap driven by nearest neighbor descent.
///
/// Every slot starts as `(infinity, NPOS, true)`. Rows are mutated only
/// through the push operations until [`deheap_sort`](Self::deheap_sort)
/// turns them into ascending-distance arrays, which is terminal.
#[derive(Debug, Clone)]
pub struct NndHeap<T> {
    pub n_points: usize,
    pub n_nbrs: usize,
    pub idx: Vec<u32>,
    pub dist: Vec<T>,
    pub flags: Vec<bool>,
    sorted: bool,
}

impl<T: Scalar> NndHeap<T> {
    pub fn new(n_points: usize, n_nbrs: usize) -> Self {
        Self {
            n_points,
            n_nbrs,
            idx: vec![NPOS; n_points * n_nbrs],
            dist: vec![T::infinity(); n_points * n_nbrs],
            flags: vec![true; n_points * n_nbrs],
            sorted: false,
        }
    }

    #[inline]
    fn row(&self, i: u32) -> usize {
        i as usize * self.n_nbrs
    }

    #[inline]
    pub fn index(&self, i: u32, j: usize) -> u32 {
        self.idx[self.row(i) + j]
    }

    #[inline]
    pub fn distance(&self, i: u32, j: usize) -> T {
        self.dist[self.row(i) + j]
    }

    #[inline]
    pub fn flag(&self, i: u32, j: usize) -> bool {
        self.flags[self.row(i) + j]
    }

    #[inline]
    pub fn set_flag(&mut self, i: u32, j: usize, flag: bool) {
        let at = self.row(i) + j;
        self.flags[at] = flag;
    }

    /// Distance of the worst neighbor currently kept for point `i`.
    #[inline]
    pub fn top_distance(&self, i: u32) -> T {
        self.dist[self.row(i)]
    }

    /// A row is full once its root holds a finite distance: empty slots are
    /// keyed by infinity and therefore stay at the root while any remain.
    #[inline]
    pub fn is_full(&self, i: u32) -> bool {
        self.top_distance(i) != T::infinity()
    }

    pub fn contains(&self, i: u32, j: u32) -> bool {
        let row = self.row(i);
        self.idx[row..row + self.n_nbrs].contains(&j)
    }

    pub fn row_idx(&self, i: u32) -> &[u32] {
        let row = self.row(i);
        &self.idx[row..row + self.n_nbrs]
    }

    pub fn row_dist(&self, i: u32) -> &[T] {
        let row = self.row(i);
        &self.dist[row..row + self.n_nbrs]
    }

    /// Insert without the top-distance and duplicate checks. The caller must
    /// have established `d < top_distance(i)` and that `j` is absent.
    pub fn push_unchecked(&mut self, i: u32, d: T, j: u32, flag: bool) {
        debug_assert!(!self.sorted, "push into a sorted heap");
        debug_assert!(d < self.top_distance(i));
        debug_assert!(!self.contains(i, j));
        let row = self.row(i);
        let n = self.n_nbrs;
        self.idx[row] = j;
        self.dist[row] = d;
        self.flags[row] = flag;
        siftdown_flagged(
            &mut self.idx[row..row + n],
            &mut self.dist[row..row + n],
            &mut self.flags[row..row + n],
            n,
        );
    }

    /// Insert `j` into row `i` if it is strictly better than the current
    /// worst and not already present. Returns the number of slots updated
    /// (0 or 1). Insertions at exactly the top distance are rejected;
    /// tie-breaking by insertion order is not guaranteed.
    pub fn checked_push(&mut self, i: u32, d: T, j: u32, flag: bool) -> usize {
        debug_assert!(!self.sorted, "push into a sorted heap");
        let row = self.row(i);
        let n = self.n_nbrs;
        row_checked_push(
            &mut self.idx[row..row + n],
            &mut self.dist[row..row + n],
            &mut self.flags[row..row + n],
            d,
            j,
            flag,
        )
    }

    /// Push `(i, d, j)` and its mirror `(j, d, i)`; returns how many of the
    /// two insertions were accepted. When `i == j` this degrades to the
    /// single push so that self-edges supplied by a seeding pass survive.
    /// Only valid when both sides index the same point set.
    pub fn checked_push_pair(&mut self, i: u32, d: T, j: u32, flag: bool) -> usize {
        if i == j {
            return self.checked_push(i, d, j, flag);
        }
        self.checked_push(i, d, j, flag) + self.checked_push(j, d, i, flag)
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Sum of all finite kept distances, used for progress reporting.
    pub fn dist_sum(&self) -> f64 {
        self.dist
            .iter()
            .filter(|d| **d != T::infinity())
            .fold(0.0, |acc, d| acc + d.to_f64().unwrap_or(0.0))
    }

    /// Destructively sort every row into ascending distance order.
    ///
    /// Repeatedly swaps the row root with the last unsorted slot and sifts
    /// down over the shrunken prefix. Afterwards the max-heap property no
    /// longer holds and the heap only serves as a finished graph; calling
    /// again is a no-op.
    pub fn deheap_sort(&mut self) {
        if self.sorted {
            return;
        }
        let n = self.n_nbrs;
        for i in 0..self.n_points {
            let row = i * n;
            let idx = &mut self.idx[row..row + n];
            let dist = &mut self.dist[row..row + n];
            let flags = &mut self.flags[row..row + n];
            for len in (1..n).rev() {
                idx.swap(0, len);
                dist.swap(0, len);
                flags.swap(0, len);
                siftdown_flagged(idx, dist, flags, len);
            }
        }
        self.sorted = true;
    }
}

/// Flagless neighbor heap, generic over the key type.
///
/// Used for finished graphs (`K = f32`/`f64`), candidate sets keyed by
/// random priorities, and the compound-keyed hubness heaps.
#[derive(Debug, Clone)]
pub struct NnHeap<K> {
    pub n_points: usize,
    pub n_nbrs: usize,
    pub idx: Vec<u32>,
    pub key: Vec<K>,
    sorted: bool,
}

impl<K: HeapKey> NnHeap<K> {
    pub fn new(n_points: usize, n_nbrs: usize) -> Self {
        Self {
            n_points,
            n_nbrs,
            idx: vec![NPOS; n_points * n_nbrs],
            key: vec![K::unfilled(); n_points * n_nbrs],
            sorted: false,
        }
    }

    #[inline]
    fn row(&self, i: u32) -> usize {
        i as usize * self.n_nbrs
    }

    #[inline]
    pub fn index(&self, i: u32, j: usize) -> u32 {
        self.idx[self.row(i) + j]
    }

    #[inline]
    pub fn dist(&self, i: u32, j: usize) -> K {
        self.key[self.row(i) + j]
    }

    #[inline]
    pub fn top(&self, i: u32) -> K {
        self.key[self.row(i)]
    }

    #[inline]
    pub fn is_full(&self, i: u32) -> bool {
        !(self.top(i) >= K::unfilled())
    }

    pub fn contains(&self, i: u32, j: u32) -> bool {
        let row = self.row(i);
        self.idx[row..row + self.n_nbrs].contains(&j)
    }

    pub fn row_idx(&self, i: u32) -> &[u32] {
        let row = self.row(i);
        &self.idx[row..row + self.n_nbrs]
    }

    pub fn row_key(&self, i: u32) -> &[K] {
        let row = self.row(i);
        &self.key[row..row + self.n_nbrs]
    }

    /// Insert without the top-key and duplicate checks. The caller must
    /// have established `k < top(i)` and that `j` is absent.
    pub fn push_unchecked(&mut self, i: u32, k: K, j: u32) {
        debug_assert!(!self.sorted, "push into a sorted heap");
        debug_assert!(k < self.top(i));
        debug_assert!(!self.contains(i, j));
        let row = self.row(i);
        let n = self.n_nbrs;
        self.idx[row] = j;
        self.key[row] = k;
        siftdown(
            &mut self.idx[row..row + n],
            &mut self.key[row..row + n],
            n,
        );
    }

    pub fn checked_push(&mut self, i: u32, k: K, j: u32) -> usize {
        debug_assert!(!self.sorted, "push into a sorted heap");
        let row = self.row(i);
        let n = self.n_nbrs;
        row_checked_push_key(
            &mut self.idx[row..row + n],
            &mut self.key[row..row + n],
            k,
            j,
        )
    }

    /// Symmetric push; degrades to a single push when `i == j`.
    pub fn checked_push_pair(&mut self, i: u32, k: K, j: u32) -> usize {
        if i == j {
            return self.checked_push(i, k, j);
        }
        self.checked_push(i, k, j) + self.checked_push(j, k, i)
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn deheap_sort(&mut self) {
        if self.sorted {
            return;
        }
        let n = self.n_nbrs;
        for i in 0..self.n_points {
            let row = i * n;
            let idx = &mut self.idx[row..row + n];
            let key = &mut self.key[row..row + n];
            for len in (1..n).rev() {
                idx.swap(0, len);
                key.swap(0, len);
                siftdown(idx, key, len);
            }
        }
        self.sorted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_row_reports_infinite_top() {
        let heap = NndHeap::<f32>::new(3, 4);
        assert_eq!(heap.top_distance(0), f32::INFINITY);
        assert!(!heap.is_full(0));
        assert_eq!(heap.index(0, 0), NPOS);
    }

    #[test]
    fn checked_push_fills_then_evicts_worst() {
        let mut heap = NndHeap::<f32>::new(1, 3);
        assert_eq!(heap.checked_push(0, 5.0, 10, true), 1);
        assert_eq!(heap.checked_push(0, 3.0, 11, true), 1);
        assert_eq!(heap.checked_push(0, 4.0, 12, true), 1);
        assert!(heap.is_full(0));
        assert_eq!(heap.top_distance(0), 5.0);

        // Worse than the current worst: rejected.
        assert_eq!(heap.checked_push(0, 6.0, 13, true), 0);
        // Equal to the current worst: rejected (strict less-than).
        assert_eq!(heap.checked_push(0, 5.0, 13, true), 0);
        // Better: replaces the worst.
        assert_eq!(heap.checked_push(0, 1.0, 13, true), 1);
        assert_eq!(heap.top_distance(0), 4.0);
        assert!(!heap.contains(0, 10));
        assert!(heap.contains(0, 13));
    }

    #[test]
    fn duplicate_indices_are_rejected() {
        let mut heap = NndHeap::<f32>::new(1, 3);
        assert_eq!(heap.checked_push(0, 2.0, 7, true), 1);
        assert_eq!(heap.checked_push(0, 1.0, 7, true), 0);
        let dupes = heap.row_idx(0).iter().filter(|&&j| j == 7).count();
        assert_eq!(dupes, 1);
    }

    #[test]
    fn pair_push_is_symmetric() {
        let mut heap = NndHeap::<f32>::new(4, 2);
        assert_eq!(heap.checked_push_pair(0, 1.5, 3, true), 2);
        assert!(heap.contains(0, 3));
        assert!(heap.contains(3, 0));
    }

    #[test]
    fn pair_push_with_identity_keeps_single_self_edge() {
        let mut heap = NndHeap::<f32>::new(2, 2);
        assert_eq!(heap.checked_push_pair(1, 0.0, 1, true), 1);
        assert!(heap.contains(1, 1));
        let selfs = heap.row_idx(1).iter().filter(|&&j| j == 1).count();
        assert_eq!(selfs, 1);
    }

    #[test]
    fn deheap_sort_orders_rows_and_is_terminal() {
        let mut heap = NndHeap::<f32>::new(1, 4);
        for (d, j) in [(4.0, 1), (2.0, 2), (3.0, 3), (1.0, 4)] {
            heap.checked_push(0, d, j, true);
        }
        heap.deheap_sort();
        assert_eq!(heap.row_dist(0), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(heap.row_idx(0), &[4, 2, 3, 1]);

        let idx = heap.idx.clone();
        let dist = heap.dist.clone();
        heap.deheap_sort();
        assert_eq!(heap.idx, idx);
        assert_eq!(heap.dist, dist);
    }

    #[test]
    fn underfilled_rows_sort_with_sentinels_at_the_tail() {
        let mut heap = NndHeap::<f32>::new(1, 4);
        heap.checked_push(0, 2.0, 5, true);
        heap.checked_push(0, 1.0, 6, true);
        heap.deheap_sort();
        assert_eq!(&heap.row_idx(0)[..2], &[6, 5]);
        assert_eq!(&heap.row_dist(0)[..2], &[1.0, 2.0]);
        assert_eq!(heap.row_idx(0)[2], NPOS);
        assert_eq!(heap.row_idx(0)[3], NPOS);
    }

    #[test]
    fn flags_travel_with_their_entries() {
        let mut heap = NndHeap::<f32>::new(1, 3);
        heap.checked_push(0, 3.0, 1, true);
        heap.checked_push(0, 1.0, 2, false);
        heap.checked_push(0, 2.0, 3, true);
        heap.deheap_sort();
        let flags: Vec<bool> = (0..3).map(|j| heap.flag(0, j)).collect();
        assert_eq!(heap.row_idx(0), &[2, 3, 1]);
        assert_eq!(flags, vec![false, true, true]);
    }

    #[test]
    fn key_heap_orders_compound_keys() {
        let mut heap = NnHeap::<KoDist<f32>>::new(1, 3);
        heap.checked_push(
            0,
            KoDist {
                occurrence: 5,
                dist: 0.1,
            },
            1,
        );
        heap.checked_push(
            0,
            KoDist {
                occurrence: 1,
                dist: 9.0,
            },
            2,
        );
        heap.checked_push(
            0,
            KoDist {
                occurrence: 5,
                dist: 0.05,
            },
            3,
        );
        heap.deheap_sort();
        // Occurrence dominates; raw distance breaks ties.
        assert_eq!(heap.row_idx(0), &[2, 3, 1]);
    }

    #[test]
    fn key_heap_capacity_and_eviction() {
        let mut heap = NnHeap::<f32>::new(1, 2);
        assert_eq!(heap.checked_push(0, 0.9, 1), 1);
        assert_eq!(heap.checked_push(0, 0.5, 2), 1);
        assert!(heap.is_full(0));
        assert_eq!(heap.checked_push(0, 0.7, 3), 1);
        assert!(!heap.contains(0, 1));
    }
}

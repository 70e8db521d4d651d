//! Seeding: random and brute-force initial graphs.
//!
//! The descent drivers refine whatever initial heap they are given; these
//! constructors supply one. Random seeding samples `k` distinct neighbors
//! per point and is the usual starting point; brute force is exact and
//! serves tiny inputs and tests.

use rand::Rng;

use crate::dist::Distance;
use crate::error::{DescentError, Result};
use crate::graph::NnGraph;
use crate::heap::{HeapKey, NnHeap};
use crate::Scalar;

fn check_k(k: usize, available: usize, what: &str) -> Result<()> {
    if k == 0 {
        return Err(DescentError::InvalidParameter(
            "k: must be at least 1".to_string(),
        ));
    }
    if k > available {
        return Err(DescentError::InvalidParameter(format!(
            "k: {k} exceeds the {available} available {what}"
        )));
    }
    Ok(())
}

/// Sample `k` distinct non-self neighbors per point, uniformly at random.
///
/// With `order_by_distance` unset, rows come back in heap order; the
/// descent drivers do not care, and skipping the sort saves a pass.
pub fn random_graph<T: Scalar + HeapKey, R: Rng>(
    distance: &dyn Distance<T>,
    k: usize,
    order_by_distance: bool,
    rng: &mut R,
) -> Result<NnGraph<T>> {
    if distance.nx() != distance.ny() {
        return Err(DescentError::InvalidParameter(
            "distance: a self form is required".to_string(),
        ));
    }
    let n = distance.nx();
    check_k(k, n.saturating_sub(1), "non-self neighbors")?;

    let mut heap = NnHeap::<T>::new(n, k);
    let mut picked: Vec<u32> = Vec::with_capacity(k);
    for i in 0..n as u32 {
        picked.clear();
        while picked.len() < k {
            let j = rng.random_range(0..n as u32);
            if j == i || picked.contains(&j) {
                continue;
            }
            picked.push(j);
        }
        for &j in &picked {
            heap.checked_push(i, distance.distance(i, j), j);
        }
    }
    Ok(if order_by_distance {
        NnGraph::from_heap(heap)
    } else {
        NnGraph::from_heap_unsorted(heap)
    })
}

/// Sample `k` distinct reference neighbors per query point.
pub fn random_query_graph<T: Scalar + HeapKey, R: Rng>(
    distance: &dyn Distance<T>,
    k: usize,
    order_by_distance: bool,
    rng: &mut R,
) -> Result<NnGraph<T>> {
    let n_queries = distance.nx();
    let n_refs = distance.ny();
    check_k(k, n_refs, "references")?;

    let mut heap = NnHeap::<T>::new(n_queries, k);
    let mut picked: Vec<u32> = Vec::with_capacity(k);
    for q in 0..n_queries as u32 {
        picked.clear();
        while picked.len() < k {
            let j = rng.random_range(0..n_refs as u32);
            if picked.contains(&j) {
                continue;
            }
            picked.push(j);
        }
        for &j in &picked {
            heap.checked_push(q, distance.distance(q, j), j);
        }
    }
    Ok(if order_by_distance {
        NnGraph::from_heap(heap)
    } else {
        NnGraph::from_heap_unsorted(heap)
    })
}

/// Exact k-NN by exhaustive comparison, excluding self.
///
/// Each unordered pair is evaluated once and offered to both endpoints.
pub fn brute_force<T: Scalar + HeapKey>(distance: &dyn Distance<T>, k: usize) -> Result<NnGraph<T>> {
    if distance.nx() != distance.ny() {
        return Err(DescentError::InvalidParameter(
            "distance: a self form is required".to_string(),
        ));
    }
    let n = distance.nx();
    check_k(k, n.saturating_sub(1), "non-self neighbors")?;

    let mut heap = NnHeap::<T>::new(n, k);
    for i in 0..n as u32 {
        for j in (i + 1)..n as u32 {
            // Each pair is visited once, so the guarded fast push applies.
            let d = distance.distance(i, j);
            if d < heap.top(i) {
                heap.push_unchecked(i, d, j);
            }
            if d < heap.top(j) {
                heap.push_unchecked(j, d, i);
            }
        }
    }
    Ok(NnGraph::from_heap(heap))
}

/// Exact query-to-reference k-NN by exhaustive comparison.
pub fn brute_force_query<T: Scalar + HeapKey>(distance: &dyn Distance<T>, k: usize) -> Result<NnGraph<T>> {
    let n_queries = distance.nx();
    let n_refs = distance.ny();
    check_k(k, n_refs, "references")?;

    let mut heap = NnHeap::<T>::new(n_queries, k);
    for q in 0..n_queries as u32 {
        for r in 0..n_refs as u32 {
            let d = distance.distance(q, r);
            if d < heap.top(q) {
                heap.push_unchecked(q, d, r);
            }
        }
    }
    Ok(NnGraph::from_heap(heap))
}

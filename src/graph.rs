//! Dense and sparse k-nearest-neighbor graph types.
//!
//! A finished graph is a pair of row-major `n_points x n_nbrs` matrices
//! (neighbor indices and distances) with rows in ascending distance order
//! and [`NPOS`]-padded tails for under-filled rows. Degree-varying graphs
//! produced by pruning use the CSR form [`SparseNnGraph`].
//!
//! Conversion to and from the heap types lives here as well: graphs seed
//! heaps (symmetrically for self-graphs, forward-only for query graphs),
//! and a deheap-sorted heap is emitted back as a graph.

use crate::dist::Distance;
use crate::error::{DescentError, Result};
use crate::heap::{NnHeap, NndHeap, NPOS};
use crate::Scalar;

/// Dense k-NN graph: row-major index and distance matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct NnGraph<T> {
    pub n_points: usize,
    pub n_nbrs: usize,
    pub idx: Vec<u32>,
    pub dist: Vec<T>,
}

impl<T: Scalar> NnGraph<T> {
    /// An empty graph with every slot set to the sentinel.
    pub fn new(n_points: usize, n_nbrs: usize) -> Self {
        Self {
            n_points,
            n_nbrs,
            idx: vec![NPOS; n_points * n_nbrs],
            dist: vec![T::infinity(); n_points * n_nbrs],
        }
    }

    pub fn from_parts(idx: Vec<u32>, dist: Vec<T>, n_points: usize) -> Result<Self> {
        if n_points == 0 || idx.len() != dist.len() || idx.len() % n_points != 0 {
            return Err(DescentError::InvalidShape(format!(
                "graph arrays of {} indices and {} distances do not factor into {} rows",
                idx.len(),
                dist.len(),
                n_points
            )));
        }
        let n_nbrs = idx.len() / n_points;
        Ok(Self {
            n_points,
            n_nbrs,
            idx,
            dist,
        })
    }

    pub fn row_idx(&self, i: u32) -> &[u32] {
        let row = i as usize * self.n_nbrs;
        &self.idx[row..row + self.n_nbrs]
    }

    pub fn row_dist(&self, i: u32) -> &[T] {
        let row = i as usize * self.n_nbrs;
        &self.dist[row..row + self.n_nbrs]
    }

    /// Emit a descent heap as a sorted graph. Sorting is applied if the
    /// heap has not already been deheap-sorted.
    pub fn from_nnd_heap(mut heap: NndHeap<T>) -> Self {
        heap.deheap_sort();
        Self {
            n_points: heap.n_points,
            n_nbrs: heap.n_nbrs,
            idx: heap.idx,
            dist: heap.dist,
        }
    }

    /// Emit a flagless heap as a sorted graph.
    pub fn from_heap(mut heap: NnHeap<T>) -> Self
    where
        T: crate::heap::HeapKey,
    {
        heap.deheap_sort();
        Self {
            n_points: heap.n_points,
            n_nbrs: heap.n_nbrs,
            idx: heap.idx,
            dist: heap.key,
        }
    }

    /// Emit a heap in its current (heap) order, skipping the sort. Only
    /// useful for seeding pipelines where row order is irrelevant.
    pub fn from_heap_unsorted(heap: NnHeap<T>) -> Self
    where
        T: crate::heap::HeapKey,
    {
        Self {
            n_points: heap.n_points,
            n_nbrs: heap.n_nbrs,
            idx: heap.idx,
            dist: heap.key,
        }
    }
}

/// Sparse (CSR) k-NN graph for degree-varying results of pruning.
///
/// `col_idx[row_ptr[i]..row_ptr[i + 1]]` holds the distinct neighbors of
/// point `i`, with `dist` weakly increasing within each row.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseNnGraph<T> {
    pub row_ptr: Vec<usize>,
    pub col_idx: Vec<u32>,
    pub dist: Vec<T>,
}

impl<T: Scalar> SparseNnGraph<T> {
    pub fn n_points(&self) -> usize {
        self.row_ptr.len().saturating_sub(1)
    }

    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }

    pub fn row_idx(&self, i: u32) -> &[u32] {
        &self.col_idx[self.row_ptr[i as usize]..self.row_ptr[i as usize + 1]]
    }

    pub fn row_dist(&self, i: u32) -> &[T] {
        &self.dist[self.row_ptr[i as usize]..self.row_ptr[i as usize + 1]]
    }

    /// Drop sentinel entries from a dense graph, keeping row order.
    pub fn from_dense(graph: &NnGraph<T>) -> Self {
        let mut row_ptr = Vec::with_capacity(graph.n_points + 1);
        let mut col_idx = Vec::new();
        let mut dist = Vec::new();
        row_ptr.push(0);
        for i in 0..graph.n_points as u32 {
            for (&j, &d) in graph.row_idx(i).iter().zip(graph.row_dist(i)) {
                if j != NPOS {
                    col_idx.push(j);
                    dist.push(d);
                }
            }
            row_ptr.push(col_idx.len());
        }
        Self {
            row_ptr,
            col_idx,
            dist,
        }
    }
}

/// How graph entries are pushed when seeding a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMode {
    /// Push each edge and its mirror; for self-graphs where both endpoints
    /// index the same point set.
    Symmetric,
    /// Push forward edges only; for query-to-reference graphs.
    Forward,
}

/// Seed a descent heap from a graph; every entry starts flagged new.
pub fn heap_from_graph<T: Scalar>(graph: &NnGraph<T>, n_nbrs: usize, mode: PushMode) -> NndHeap<T> {
    let mut heap = NndHeap::new(graph.n_points, n_nbrs);
    for i in 0..graph.n_points as u32 {
        for (&j, &d) in graph.row_idx(i).iter().zip(graph.row_dist(i)) {
            if j == NPOS {
                continue;
            }
            match mode {
                PushMode::Symmetric => heap.checked_push_pair(i, d, j, true),
                PushMode::Forward => heap.checked_push(i, d, j, true),
            };
        }
    }
    heap
}

/// Seed a flagless heap from a graph.
pub fn nn_heap_from_graph<T>(graph: &NnGraph<T>, n_nbrs: usize, mode: PushMode) -> NnHeap<T>
where
    T: Scalar + crate::heap::HeapKey,
{
    let mut heap = NnHeap::new(graph.n_points, n_nbrs);
    for i in 0..graph.n_points as u32 {
        for (&j, &d) in graph.row_idx(i).iter().zip(graph.row_dist(i)) {
            if j == NPOS {
                continue;
            }
            match mode {
                PushMode::Symmetric => heap.checked_push_pair(i, d, j),
                PushMode::Forward => heap.checked_push(i, d, j),
            };
        }
    }
    heap
}

/// Re-sort an arbitrary graph into ascending row order via a heap
/// round-trip.
pub fn sort_graph<T>(graph: &mut NnGraph<T>)
where
    T: Scalar + crate::heap::HeapKey,
{
    let sorted = NnGraph::from_heap(nn_heap_from_graph(graph, graph.n_nbrs, PushMode::Forward));
    graph.idx = sorted.idx;
    graph.dist = sorted.dist;
}

/// Compute distances for a caller-supplied index matrix.
///
/// `idx` is row-major with `n_nbrs` columns; row `i` lists neighbor
/// candidates for point `i` of the distance's left-hand set. Sentinel
/// entries keep an infinite distance. The result is not sorted; apply
/// [`sort_graph`] if row order matters.
pub fn graph_from_indices<T: Scalar>(
    distance: &dyn Distance<T>,
    idx: &[u32],
    n_nbrs: usize,
) -> Result<NnGraph<T>> {
    if n_nbrs == 0 || idx.len() % n_nbrs != 0 {
        return Err(DescentError::InvalidShape(format!(
            "index matrix of {} entries does not factor into {} columns",
            idx.len(),
            n_nbrs
        )));
    }
    let n_points = idx.len() / n_nbrs;
    if n_points != distance.nx() {
        return Err(DescentError::InvalidParameter(format!(
            "idx: has {} rows but the distance indexes {} points",
            n_points,
            distance.nx()
        )));
    }
    let mut dist = Vec::with_capacity(idx.len());
    for (at, &j) in idx.iter().enumerate() {
        let i = (at / n_nbrs) as u32;
        if j == NPOS {
            dist.push(T::infinity());
        } else {
            dist.push(distance.distance(i, j));
        }
    }
    Ok(NnGraph {
        n_points,
        n_nbrs,
        idx: idx.to_vec(),
        dist,
    })
}

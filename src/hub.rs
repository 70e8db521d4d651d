//! Graph-augmentation operators.
//!
//! Everything that turns a finished k-NN graph into a better search graph
//! lives here: reverse-neighbor accounting, k-occurrence ("hubness")
//! ranking, degree adjustment, mutualization, occlusion-based long-edge
//! pruning, and graph merging. All operators preserve the
//! ordered-by-distance row invariant on their outputs.
//!
//! Hubness background: in high dimensions some points appear in many
//! other points' neighbor lists while others appear in none, which skews
//! greedy search. The degree-adjusted and k-occurrence-adjusted graphs
//! rebalance in-degree by preferring reverse neighbors and unpopular
//! forward neighbors, after Iwasaki & Miyazaki (2018); occlusion pruning
//! drops edges made redundant by a closer kept neighbor.

use rand::Rng;
use smallvec::SmallVec;

use crate::dist::Distance;
use crate::error::{DescentError, Result};
use crate::graph::{NnGraph, SparseNnGraph};
use crate::heap::{HeapKey, KoDist, NnHeap, ScaledDist, NPOS};
use crate::Scalar;

/// Stable argsort of a slice of keys.
fn order_by<T: PartialOrd>(vals: &[T]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..vals.len()).collect();
    order.sort_by(|&a, &b| vals[a].partial_cmp(&vals[b]).unwrap_or(std::cmp::Ordering::Equal));
    order
}

/// In-degree of every point in a forward-neighbor matrix.
///
/// With `include_self` set, self-loops count like any other edge;
/// otherwise entries where a point lists itself are skipped. Sentinel
/// entries never count.
pub fn reverse_nbr_counts(idx: &[u32], n_points: usize, include_self: bool) -> Vec<usize> {
    let n_nbrs = idx.len() / n_points;
    let mut counts = vec![0usize; n_points];
    for (i, row) in idx.chunks(n_nbrs).enumerate() {
        for &nbr in row {
            if nbr == NPOS || (!include_self && nbr as usize == i) {
                continue;
            }
            counts[nbr as usize] += 1;
        }
    }
    counts
}

/// Two-population form: the heads (rows) and tails (entries) of the edge
/// matrix index disjoint sets, e.g. queries over references.
pub fn reverse_nbr_counts_two_pop(idx: &[u32], n_head: usize, n_tail: usize) -> Vec<usize> {
    let n_nbrs = idx.len() / n_head;
    let mut counts = vec![0usize; n_tail];
    for row in idx.chunks(n_nbrs) {
        for &nbr in row {
            if nbr != NPOS {
                counts[nbr as usize] += 1;
            }
        }
    }
    counts
}

/// The k-occurrence graph: same topology as the input, with each
/// neighbor's payload replaced by `(its in-degree, original distance)` so
/// rows order by how hub-like a neighbor is.
pub fn kograph<T>(graph: &NnGraph<T>) -> NnHeap<KoDist<T>>
where
    T: Scalar + HeapKey,
{
    let counts = reverse_nbr_counts(&graph.idx, graph.n_points, true);
    let mut kog = NnHeap::new(graph.n_points, graph.n_nbrs);
    for i in 0..graph.n_points as u32 {
        for (&nbr, &d) in graph.row_idx(i).iter().zip(graph.row_dist(i)) {
            if nbr == NPOS {
                continue;
            }
            kog.checked_push(
                i,
                KoDist {
                    occurrence: counts[nbr as usize] as u32,
                    dist: d,
                },
                nbr,
            );
        }
    }
    kog
}

/// Heap of reverse neighbors: up to `n_rev` reverse edges per point,
/// built from each point's `n_fwd` closest forward neighbors.
pub fn reverse_heap<T>(graph: &NnGraph<T>, n_rev: usize, n_fwd: usize) -> NnHeap<T>
where
    T: Scalar + HeapKey,
{
    let mut rev = NnHeap::new(graph.n_points, n_rev);
    let n_fwd = n_fwd.min(graph.n_nbrs);
    for i in 0..graph.n_points as u32 {
        for j in 0..n_fwd {
            let nbr = graph.row_idx(i)[j];
            if nbr == NPOS {
                continue;
            }
            rev.checked_push(nbr, graph.row_dist(i)[j], i);
        }
    }
    rev
}

/// Degree-adjusted graph: fill each row first from its reverse neighbors
/// (bounded by `n_rev` per reverse heap row), then top up with forward
/// neighbors. Produces a more balanced in-degree distribution. Pass
/// `(graph.n_nbrs, graph.n_nbrs)` for the conventional sizing.
pub fn deg_adj_graph<T>(graph: &NnGraph<T>, n_rev: usize, n_adj: usize) -> NnGraph<T>
where
    T: Scalar + HeapKey,
{
    let rev = reverse_heap(graph, n_rev, n_adj);
    let mut adj = NnHeap::new(graph.n_points, n_adj);
    for i in 0..graph.n_points as u32 {
        for j in 0..rev.n_nbrs {
            if adj.is_full(i) {
                break;
            }
            let nbr = rev.index(i, j);
            if nbr == NPOS {
                continue;
            }
            adj.checked_push(i, rev.dist(i, j), nbr);
        }
        for j in 0..graph.n_nbrs {
            if adj.is_full(i) {
                break;
            }
            let nbr = graph.row_idx(i)[j];
            if nbr == NPOS {
                continue;
            }
            adj.checked_push(i, graph.row_dist(i)[j], nbr);
        }
    }
    NnGraph::from_heap(adj)
}

/// Like [`deg_adj_graph`], but forward fill-in follows increasing
/// k-occurrence: unpopular neighbors are preferred over hubs.
pub fn ko_adj_graph<T>(graph: &NnGraph<T>, n_rev: usize, n_adj: usize) -> NnGraph<T>
where
    T: Scalar + HeapKey,
{
    let rev = reverse_heap(graph, n_rev, n_adj);
    let mut kog = kograph(graph);
    kog.deheap_sort();
    let mut adj = NnHeap::new(graph.n_points, n_adj);
    for i in 0..graph.n_points as u32 {
        for j in 0..rev.n_nbrs {
            if adj.is_full(i) {
                break;
            }
            let nbr = rev.index(i, j);
            if nbr == NPOS {
                continue;
            }
            adj.checked_push(i, rev.dist(i, j), nbr);
        }
        for j in 0..kog.n_nbrs {
            if adj.is_full(i) {
                break;
            }
            let nbr = kog.index(i, j);
            if nbr == NPOS {
                continue;
            }
            adj.checked_push(i, kog.dist(i, j).dist, nbr);
        }
    }
    NnGraph::from_heap(adj)
}

/// Symmetric union: every edge and its mirror, kept up to `n_nbrs` per
/// row by distance.
pub fn mutualize_heap<T>(graph: &NnGraph<T>, n_nbrs: usize) -> NnHeap<T>
where
    T: Scalar + HeapKey,
{
    let mut mutual = NnHeap::new(graph.n_points, n_nbrs);
    for i in 0..graph.n_points as u32 {
        for (&nbr, &d) in graph.row_idx(i).iter().zip(graph.row_dist(i)) {
            if nbr == NPOS {
                continue;
            }
            mutual.checked_push_pair(i, d, nbr);
        }
    }
    mutual
}

/// Keep all forward neighbors, then pad with reverse neighbors up to
/// capacity. `n_nbrs` should exceed the input row width for the padding
/// to have room.
pub fn partial_mutualize_heap<T>(graph: &NnGraph<T>, n_nbrs: usize) -> NnHeap<T>
where
    T: Scalar + HeapKey,
{
    let rev = reverse_heap(graph, n_nbrs, graph.n_nbrs);
    let mut mutual = NnHeap::new(graph.n_points, n_nbrs);
    for i in 0..graph.n_points as u32 {
        for (&nbr, &d) in graph.row_idx(i).iter().zip(graph.row_dist(i)) {
            if nbr == NPOS {
                continue;
            }
            mutual.checked_push(i, d, nbr);
        }
        for j in 0..rev.n_nbrs {
            if mutual.is_full(i) {
                break;
            }
            let nbr = rev.index(i, j);
            if nbr == NPOS {
                continue;
            }
            mutual.checked_push(i, rev.dist(i, j), nbr);
        }
    }
    mutual
}

/// Collapse duplicate neighbors to their smaller distance, then order the
/// row ascending by distance.
fn merge_row<T: Scalar>(row: &mut Vec<(u32, T)>) {
    row.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then(a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    });
    row.dedup_by_key(|e| e.0);
    row.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
}

/// Union of two dense graphs over the same point set, deduplicated by
/// neighbor index with the smaller distance winning; each merged row keeps
/// its closest entries, ascending. Symmetric mode also contributes every
/// edge's mirror.
pub fn merge_graphs<T: Scalar>(
    g1: &NnGraph<T>,
    g2: &NnGraph<T>,
    symmetric: bool,
) -> Result<NnGraph<T>> {
    if g1.n_points != g2.n_points {
        return Err(DescentError::InvalidParameter(format!(
            "merge: graphs disagree on the point count ({} vs {})",
            g1.n_points, g2.n_points
        )));
    }
    let n_points = g1.n_points;
    let n_nbrs = g1.n_nbrs.max(g2.n_nbrs);
    let mut rows: Vec<Vec<(u32, T)>> = vec![Vec::new(); n_points];
    for graph in [g1, g2] {
        for i in 0..n_points as u32 {
            for (&nbr, &d) in graph.row_idx(i).iter().zip(graph.row_dist(i)) {
                if nbr == NPOS {
                    continue;
                }
                rows[i as usize].push((nbr, d));
                if symmetric {
                    rows[nbr as usize].push((i, d));
                }
            }
        }
    }
    let mut out = NnGraph::new(n_points, n_nbrs);
    for (i, row) in rows.iter_mut().enumerate() {
        merge_row(row);
        row.truncate(n_nbrs);
        let at = i * n_nbrs;
        for (s, &(nbr, d)) in row.iter().enumerate() {
            out.idx[at + s] = nbr;
            out.dist[at + s] = d;
        }
    }
    Ok(out)
}

// Occlusion pruning. For point i with already-kept neighbor p and
// candidate q at distance d(i, q): if d(p, q) < d(i, q), p occludes q and
// q is redundant for greedy search.

fn remove_long_edges_impl<T: Scalar>(
    graph: &NnGraph<T>,
    distance: &dyn Distance<T>,
    mut prune: impl FnMut() -> bool,
) -> NnGraph<T> {
    let n_nbrs = graph.n_nbrs;
    let mut out = NnGraph::new(graph.n_points, n_nbrs);
    for i in 0..graph.n_points {
        let row = i * n_nbrs;
        if graph.idx[row] == NPOS {
            continue;
        }
        // Rows are ascending, so slot 0 is the closest; it is always kept.
        out.idx[row] = graph.idx[row];
        out.dist[row] = graph.dist[row];
        let mut kept: SmallVec<[u32; 32]> = SmallVec::new();
        kept.push(graph.idx[row]);

        for j in 1..n_nbrs {
            let nbr = graph.idx[row + j];
            if nbr == NPOS {
                break;
            }
            let nbr_dist = graph.dist[row + j];
            let mut add = true;
            for &kept_nbr in &kept {
                if distance.distance(nbr, kept_nbr) < nbr_dist && prune() {
                    add = false;
                    break;
                }
            }
            if add {
                out.idx[row + kept.len()] = nbr;
                out.dist[row + kept.len()] = nbr_dist;
                kept.push(nbr);
            }
        }
    }
    out
}

/// Occlusion pruning over a dense graph; an occluded edge is dropped
/// with probability `prune_probability`.
pub fn remove_long_edges<T: Scalar, R: Rng>(
    graph: &NnGraph<T>,
    distance: &dyn Distance<T>,
    rng: &mut R,
    prune_probability: f64,
) -> NnGraph<T> {
    remove_long_edges_impl(graph, distance, || rng.random::<f64>() < prune_probability)
}

/// Deterministic occlusion pruning: every occluded edge is dropped. The
/// result is idempotent under re-pruning.
pub fn remove_long_edges_deterministic<T: Scalar>(
    graph: &NnGraph<T>,
    distance: &dyn Distance<T>,
) -> NnGraph<T> {
    remove_long_edges_impl(graph, distance, || true)
}

fn remove_long_edges_sparse_impl<T: Scalar>(
    graph: &SparseNnGraph<T>,
    distance: &dyn Distance<T>,
    mut prune: impl FnMut() -> bool,
) -> SparseNnGraph<T> {
    let n_points = graph.n_points();
    let mut row_ptr = vec![0usize; n_points + 1];
    let mut col_idx = Vec::new();
    let mut dist = Vec::new();
    for i in 0..n_points {
        row_ptr[i + 1] = row_ptr[i];
        let idx_row = graph.row_idx(i as u32);
        let dist_row = graph.row_dist(i as u32);
        if idx_row.is_empty() {
            continue;
        }
        let ordered = order_by(dist_row);

        col_idx.push(idx_row[ordered[0]]);
        dist.push(dist_row[ordered[0]]);
        row_ptr[i + 1] += 1;

        for &at in &ordered[1..] {
            let nbr = idx_row[at];
            let nbr_dist = dist_row[at];
            let mut add = true;
            for k in row_ptr[i]..row_ptr[i + 1] {
                if distance.distance(nbr, col_idx[k]) < nbr_dist && prune() {
                    add = false;
                    break;
                }
            }
            if add {
                col_idx.push(nbr);
                dist.push(nbr_dist);
                row_ptr[i + 1] += 1;
            }
        }
    }
    SparseNnGraph {
        row_ptr,
        col_idx,
        dist,
    }
}

/// Occlusion pruning over a CSR graph.
pub fn remove_long_edges_sparse<T: Scalar, R: Rng>(
    graph: &SparseNnGraph<T>,
    distance: &dyn Distance<T>,
    rng: &mut R,
    prune_probability: f64,
) -> SparseNnGraph<T> {
    remove_long_edges_sparse_impl(graph, distance, || rng.random::<f64>() < prune_probability)
}

/// Deterministic occlusion pruning over a CSR graph.
pub fn remove_long_edges_sparse_deterministic<T: Scalar>(
    graph: &SparseNnGraph<T>,
    distance: &dyn Distance<T>,
) -> SparseNnGraph<T> {
    remove_long_edges_sparse_impl(graph, distance, || true)
}

/// Cap every row of a CSR graph at its `max_degree` closest entries.
pub fn degree_prune<T: Scalar>(graph: &SparseNnGraph<T>, max_degree: usize) -> SparseNnGraph<T> {
    let n_points = graph.n_points();
    let mut row_ptr = vec![0usize; n_points + 1];
    let mut col_idx = Vec::new();
    let mut dist = Vec::new();
    for i in 0..n_points {
        let idx_row = graph.row_idx(i as u32);
        let dist_row = graph.row_dist(i as u32);
        let ordered = order_by(dist_row);
        let keep = ordered.len().min(max_degree);
        for &at in &ordered[..keep] {
            col_idx.push(idx_row[at]);
            dist.push(dist_row[at]);
        }
        row_ptr[i + 1] = row_ptr[i] + keep;
    }
    SparseNnGraph {
        row_ptr,
        col_idx,
        dist,
    }
}

/// Row-wise union of two CSR graphs over the same point set. Duplicate
/// neighbors resolve to the smaller distance and each merged row is
/// re-sorted ascending, preserving the weakly increasing row invariant.
pub fn merge_sparse_graphs<T: Scalar>(
    g1: &SparseNnGraph<T>,
    g2: &SparseNnGraph<T>,
) -> Result<SparseNnGraph<T>> {
    if g1.n_points() != g2.n_points() {
        return Err(DescentError::InvalidParameter(format!(
            "merge: graphs disagree on the point count ({} vs {})",
            g1.n_points(),
            g2.n_points()
        )));
    }
    let n_points = g1.n_points();
    let mut row_ptr = vec![0usize; n_points + 1];
    let mut col_idx = Vec::new();
    let mut dist = Vec::new();
    let mut row: Vec<(u32, T)> = Vec::new();
    for i in 0..n_points as u32 {
        row.clear();
        for graph in [g1, g2] {
            row.extend(
                graph
                    .row_idx(i)
                    .iter()
                    .copied()
                    .zip(graph.row_dist(i).iter().copied()),
            );
        }
        merge_row(&mut row);
        for &(nbr, d) in &row {
            col_idx.push(nbr);
            dist.push(d);
        }
        row_ptr[i as usize + 1] = row_ptr[i as usize] + row.len();
    }
    Ok(SparseNnGraph {
        row_ptr,
        col_idx,
        dist,
    })
}

// Local scaling: re-rank neighbors by distances normalized against each
// endpoint's neighborhood scale, which compensates for density variation.

/// Per-point scale: the mean distance over the `[k_begin, k_end)` band of
/// each (sorted) row, floored at `min_scale`.
pub fn local_scales<T: Scalar>(
    dist: &[T],
    n_nbrs: usize,
    k_begin: usize,
    k_end: usize,
    min_scale: T,
) -> Vec<T> {
    let band = T::from_usize(k_end - k_begin).unwrap_or_else(T::one);
    dist.chunks(n_nbrs)
        .map(|row| {
            let sum = row[k_begin..k_end]
                .iter()
                .fold(T::zero(), |acc, &d| acc + d);
            (sum / band).max(min_scale)
        })
        .collect()
}

/// Scaled distance `d^2 / (scale_i * scale_j)` for every edge.
pub fn local_scaled_distances<T: Scalar>(
    idx: &[u32],
    dist: &[T],
    n_nbrs: usize,
    scales: &[T],
) -> Vec<T> {
    idx.iter()
        .zip(dist)
        .enumerate()
        .map(|(at, (&nbr, &d))| {
            if nbr == NPOS {
                T::infinity()
            } else {
                let i = at / n_nbrs;
                (d * d) / (scales[i] * scales[nbr as usize])
            }
        })
        .collect()
}

/// Select `n_scaled` neighbors per point by locally-scaled distance, then
/// emit them with their raw distances, rows re-sorted ascending.
pub fn local_scaled_graph<T>(
    graph: &NnGraph<T>,
    n_scaled: usize,
    k_begin: usize,
    k_end: usize,
) -> Result<NnGraph<T>>
where
    T: Scalar + HeapKey,
{
    if k_begin >= k_end || k_end > graph.n_nbrs {
        return Err(DescentError::InvalidParameter(format!(
            "scaling band: [{k_begin}, {k_end}) does not fit {} neighbors",
            graph.n_nbrs
        )));
    }
    let min_scale = T::from_f64(1e-10).unwrap_or_else(T::epsilon);
    let scales = local_scales(&graph.dist, graph.n_nbrs, k_begin, k_end, min_scale);
    let scaled = local_scaled_distances(&graph.idx, &graph.dist, graph.n_nbrs, &scales);

    let mut pair_heap = NnHeap::<ScaledDist<T>>::new(graph.n_points, n_scaled);
    for i in 0..graph.n_points as u32 {
        let row = i as usize * graph.n_nbrs;
        for j in 0..graph.n_nbrs {
            let nbr = graph.idx[row + j];
            if nbr == NPOS {
                continue;
            }
            pair_heap.checked_push(
                i,
                ScaledDist {
                    scaled: scaled[row + j],
                    dist: graph.dist[row + j],
                },
                nbr,
            );
        }
    }

    let mut out = NnHeap::<T>::new(graph.n_points, n_scaled);
    for i in 0..graph.n_points as u32 {
        for j in 0..n_scaled {
            let nbr = pair_heap.index(i, j);
            if nbr == NPOS {
                continue;
            }
            out.checked_push(i, pair_heap.dist(i, j).dist, nbr);
        }
    }
    Ok(NnGraph::from_heap(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::{dense_self, Metric};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    /// Explicit distance matrix, for tests that pin exact geometry.
    struct MatrixDistance {
        n: usize,
        d: Vec<f32>,
    }

    impl Distance<f32> for MatrixDistance {
        fn distance(&self, i: u32, j: u32) -> f32 {
            self.d[i as usize * self.n + j as usize]
        }
        fn nx(&self) -> usize {
            self.n
        }
        fn ny(&self) -> usize {
            self.n
        }
    }

    fn toy_graph() -> NnGraph<f32> {
        // 4 points; point 3 is a hub (everyone lists it).
        NnGraph::from_parts(
            vec![3, 1, 3, 0, 3, 0, 0, 1],
            vec![0.5, 1.0, 0.4, 1.0, 0.3, 2.0, 0.5, 1.5],
            4,
        )
        .unwrap()
    }

    #[test]
    fn reverse_counts_conserve_edges() {
        let graph = toy_graph();
        let counts = reverse_nbr_counts(&graph.idx, 4, true);
        assert_eq!(counts.iter().sum::<usize>(), 8);
        assert_eq!(counts[3], 3);

        // Two-population form over a wider tail set.
        let counts = reverse_nbr_counts_two_pop(&graph.idx, 4, 10);
        assert_eq!(counts.len(), 10);
        assert_eq!(counts.iter().sum::<usize>(), 8);
    }

    #[test]
    fn reverse_counts_can_skip_self_loops() {
        let idx = vec![0, 1, 1, 0];
        let with_self = reverse_nbr_counts(&idx, 2, true);
        let without = reverse_nbr_counts(&idx, 2, false);
        assert_eq!(with_self, vec![2, 2]);
        assert_eq!(without, vec![1, 1]);
    }

    #[test]
    fn kograph_orders_by_hubness() {
        let graph = toy_graph();
        let mut kog = kograph(&graph);
        kog.deheap_sort();
        // Point 0 lists {3, 1}; 1 has fewer reverse neighbors than hub 3.
        assert_eq!(kog.index(0, 0), 1);
        assert_eq!(kog.index(0, 1), 3);
        assert_eq!(kog.dist(0, 1).occurrence, 3);
    }

    #[test]
    fn reverse_heap_mirrors_edges() {
        let graph = toy_graph();
        let rev = reverse_heap(&graph, 4, graph.n_nbrs);
        // Point 3 is listed by 0, 1, 2.
        let mut sources: Vec<u32> = rev
            .row_idx(3)
            .iter()
            .copied()
            .filter(|&j| j != NPOS)
            .collect();
        sources.sort_unstable();
        assert_eq!(sources, vec![0, 1, 2]);
    }

    #[test]
    fn deg_adj_prefers_reverse_neighbors() {
        let graph = toy_graph();
        let adj = deg_adj_graph(&graph, graph.n_nbrs, graph.n_nbrs);
        assert_eq!(adj.n_nbrs, graph.n_nbrs);
        // Point 3 lists no one it points to, but gains its reverse edges.
        let row: Vec<u32> = adj.row_idx(3).iter().copied().collect();
        assert!(row.iter().all(|&j| j != NPOS));
    }

    #[test]
    fn mutualized_heap_contains_every_edge_and_mirror() {
        let graph = toy_graph();
        let mutual = mutualize_heap(&graph, 6);
        for i in 0..4u32 {
            for (&nbr, _) in graph.row_idx(i).iter().zip(graph.row_dist(i)) {
                assert!(mutual.contains(i, nbr), "edge {i} -> {nbr}");
                assert!(mutual.contains(nbr, i), "mirror {nbr} -> {i}");
            }
        }
    }

    #[test]
    fn partial_mutualize_keeps_forward_neighbors() {
        let graph = toy_graph();
        let padded = partial_mutualize_heap(&graph, 4);
        for i in 0..4u32 {
            for &nbr in graph.row_idx(i) {
                assert!(padded.contains(i, nbr));
            }
        }
    }

    #[test]
    fn occlusion_pruning_keeps_only_the_closest_when_occluded() {
        // Point 0 lists {1@1.0, 2@2.0, 3@3.0}; 1 occludes both 2 and 3.
        let n = 4;
        let mut d = vec![9.0_f32; n * n];
        let mut set = |a: usize, b: usize, v: f32| {
            d[a * n + b] = v;
            d[b * n + a] = v;
        };
        set(0, 1, 1.0);
        set(0, 2, 2.0);
        set(0, 3, 3.0);
        set(1, 2, 0.5);
        set(1, 3, 0.5);
        let distance = MatrixDistance { n, d };

        let mut graph = NnGraph::<f32>::new(4, 3);
        graph.idx[0..3].copy_from_slice(&[1, 2, 3]);
        graph.dist[0..3].copy_from_slice(&[1.0, 2.0, 3.0]);

        let pruned = remove_long_edges_deterministic(&graph, &distance);
        assert_eq!(pruned.row_idx(0)[0], 1);
        assert_eq!(pruned.row_idx(0)[1], NPOS);
        assert_eq!(pruned.row_idx(0)[2], NPOS);

        // Idempotent: pruning the pruned graph changes nothing.
        let again = remove_long_edges_deterministic(&pruned, &distance);
        assert_eq!(again, pruned);

        // Zero probability never prunes.
        let mut rng = SmallRng::seed_from_u64(0);
        let kept = remove_long_edges(&graph, &distance, &mut rng, 0.0);
        assert_eq!(kept.row_idx(0), &[1, 2, 3]);
    }

    #[test]
    fn sparse_occlusion_matches_dense() {
        let data: Vec<f32> = vec![0.0, 1.0, 1.9, 8.0];
        let distance = dense_self(Metric::Euclidean, data, 1).unwrap();
        let dense = NnGraph::from_parts(
            vec![1, 2, 3, 2, 0, 3, 1, 0, 3, 2, 1, 0],
            vec![
                1.0, 1.9, 8.0, //
                0.9, 1.0, 7.0, //
                0.9, 1.9, 6.1, //
                6.1, 7.0, 8.0,
            ],
            4,
        )
        .unwrap();
        let pruned_dense = remove_long_edges_deterministic(&dense, distance.as_ref());
        let pruned_sparse = remove_long_edges_sparse_deterministic(
            &SparseNnGraph::from_dense(&dense),
            distance.as_ref(),
        );
        assert_eq!(
            SparseNnGraph::from_dense(&pruned_dense),
            pruned_sparse
        );
    }

    #[test]
    fn merging_a_sparse_graph_with_itself_is_identity_sized() {
        let graph = SparseNnGraph {
            row_ptr: vec![0, 2, 3, 5],
            col_idx: vec![1, 2, 0, 0, 1],
            dist: vec![1.0_f32, 2.0, 1.0, 2.0, 3.0],
        };
        let merged = merge_sparse_graphs(&graph, &graph).unwrap();
        assert_eq!(merged.nnz(), graph.nnz());
        assert_eq!(merged, graph);
    }

    #[test]
    fn sparse_merge_unions_rows() {
        let g1 = SparseNnGraph {
            row_ptr: vec![0, 1],
            col_idx: vec![1],
            dist: vec![1.0_f32],
        };
        let g2 = SparseNnGraph {
            row_ptr: vec![0, 2],
            col_idx: vec![2, 1],
            dist: vec![0.2_f32, 0.5],
        };
        let merged = merge_sparse_graphs(&g1, &g2).unwrap();
        // Duplicate edge 0->1 keeps the smaller distance, and the closer
        // neighbor contributed by g2 moves to the front of the row.
        assert_eq!(merged.row_idx(0), &[2, 1]);
        assert_eq!(merged.row_dist(0), &[0.2, 0.5]);
    }

    #[test]
    fn degree_prune_caps_rows_by_distance() {
        let graph = SparseNnGraph {
            row_ptr: vec![0, 3],
            col_idx: vec![5, 6, 7],
            dist: vec![3.0_f32, 1.0, 2.0],
        };
        let pruned = degree_prune(&graph, 2);
        assert_eq!(pruned.row_idx(0), &[6, 7]);
        assert_eq!(pruned.row_dist(0), &[1.0, 2.0]);
    }

    #[test]
    fn dense_merge_keeps_the_better_duplicate() {
        let g1 = NnGraph::from_parts(vec![1, 2], vec![1.0_f32, 2.0], 1).unwrap();
        let g2 = NnGraph::from_parts(vec![1, 3], vec![0.5_f32, 3.0], 1).unwrap();
        let merged = merge_graphs(&g1, &g2, false).unwrap();
        assert_eq!(merged.row_idx(0), &[1, 2]);
        assert_eq!(merged.row_dist(0), &[0.5, 2.0]);
    }

    #[test]
    fn local_scaling_rescues_dense_region_neighbors() {
        let graph = NnGraph::from_parts(
            vec![1, 2, 0, 2, 0, 1],
            vec![1.0_f32, 4.0, 1.0, 2.0, 4.0, 2.0],
            3,
        )
        .unwrap();
        let scales = local_scales(&graph.dist, 2, 0, 2, 1e-10_f32);
        assert_eq!(scales, vec![2.5, 1.5, 3.0]);
        let scaled = local_scaled_distances(&graph.idx, &graph.dist, 2, &scales);
        // Edge 0 -> 1: 1.0^2 / (2.5 * 1.5)
        assert!((scaled[0] - 1.0 / 3.75).abs() < 1e-6);

        let rescaled = local_scaled_graph(&graph, 1, 0, 2).unwrap();
        assert_eq!(rescaled.n_nbrs, 1);
        assert_eq!(rescaled.row_idx(0)[0], 1);
    }
}

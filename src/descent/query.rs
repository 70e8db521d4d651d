//! Query refinement against a fixed reference graph.
//!
//! Given a finished reference k-NN graph and an initial query-to-reference
//! heap, each iteration samples the still-new entries of a query's row and
//! walks their reference-graph neighborhoods, evaluating unvisited
//! references and pushing improvements into the query's row only. The
//! reference graph is never modified, so query rows are fully independent:
//! the parallel form needs no locks, just an atomic update counter.

use std::sync::atomic::{AtomicUsize, Ordering};

use fixedbitset::FixedBitSet;
use rand::Rng;

use crate::descent::{stream_rng, NndOutput, NndParams, Termination};
use crate::dist::Distance;
use crate::error::{DescentError, Result};
use crate::executor::{Executor, RayonExecutor, SerialExecutor};
use crate::graph::{heap_from_graph, NnGraph, PushMode};
use crate::heap::{NndHeap, NPOS};
use crate::progress::Progress;
use crate::sync::{SharedNndHeap, StripeLocks};
use crate::Scalar;

/// Refine a query-to-reference graph by searching the reference graph's
/// neighborhoods.
///
/// `distance` must be a query form with `nx` query points and `ny`
/// reference points; `ref_graph` indexes the reference set and `init`
/// supplies the starting query-to-reference neighbors and `k`.
pub fn nn_descent_query<T: Scalar>(
    distance: &dyn Distance<T>,
    ref_graph: &NnGraph<T>,
    init: &NnGraph<T>,
    params: &NndParams,
) -> Result<NndOutput<T>> {
    if init.n_points != distance.nx() {
        return Err(DescentError::InvalidParameter(format!(
            "init: has {} rows but the distance indexes {} queries",
            init.n_points,
            distance.nx()
        )));
    }
    if ref_graph.n_points != distance.ny() {
        return Err(DescentError::InvalidParameter(format!(
            "reference graph: has {} rows but the distance indexes {} references",
            ref_graph.n_points,
            distance.ny()
        )));
    }
    params.validate(distance.ny(), init.n_nbrs)?;

    let mut heap = heap_from_graph(init, init.n_nbrs, PushMode::Forward);
    let mut progress = params.make_progress();
    let termination = nnd_query_build(
        &mut heap,
        distance,
        ref_graph,
        params,
        progress.as_mut(),
    )?;
    Ok(NndOutput {
        graph: NnGraph::from_nnd_heap(heap),
        termination,
    })
}

/// Query refinement loop over an already-seeded heap. Serial when
/// `n_threads` is 0; the heap is left unsorted for further refinement.
pub fn nnd_query_build<T: Scalar>(
    heap: &mut NndHeap<T>,
    distance: &dyn Distance<T>,
    ref_graph: &NnGraph<T>,
    params: &NndParams,
    progress: &mut dyn Progress,
) -> Result<Termination> {
    let executor: Box<dyn Executor> = if params.n_threads > 0 {
        Box::new(RayonExecutor::new(params.n_threads)?)
    } else {
        Box::new(SerialExecutor)
    };
    let n_queries = heap.n_points;
    let n_nbrs = heap.n_nbrs;
    let max_candidates = params.max_candidates.unwrap_or(n_nbrs);
    let tol = params.delta * n_nbrs as f64 * n_queries as f64;
    let n_refs = distance.ny();
    let locks = StripeLocks::new();

    for iter in 0..params.n_iters {
        let c_iter = AtomicUsize::new(0);
        let mut interrupted = false;
        {
            // Row-owned access throughout: each task touches only its own
            // query rows, so no stripe is ever contended.
            let shared = SharedNndHeap::new(heap, &locks);
            let mut begin = 0;
            while begin < n_queries {
                let end = (begin + params.block_size).min(n_queries);
                executor.parallel_for(begin..end, params.grain_size, &|range| {
                    let mut rng = stream_rng(params.seed, iter as u64, range.start as u64);
                    let mut seen = FixedBitSet::with_capacity(n_refs);
                    let mut sample: Vec<(f32, u32, usize)> = Vec::with_capacity(n_nbrs);
                    let mut c = 0;
                    for q in range.clone() {
                        let q = q as u32;
                        sample.clear();
                        for slot in 0..n_nbrs {
                            let nbr = shared.index_owned(q, slot);
                            if nbr == NPOS || !shared.flag_owned(q, slot) {
                                continue;
                            }
                            sample.push((rng.random(), nbr, slot));
                        }
                        if sample.len() > max_candidates {
                            sample.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
                            sample.truncate(max_candidates);
                        }

                        seen.clear();
                        for &(_, r, slot) in sample.iter() {
                            // Sampled entries participate now; flip to old.
                            shared.set_flag_owned(q, slot, false);
                            seen.insert(r as usize);
                        }
                        for &(_, r, _) in sample.iter() {
                            for &frontier in ref_graph.row_idx(r) {
                                if frontier == NPOS {
                                    continue;
                                }
                                if !seen.put(frontier as usize) {
                                    let d = distance.distance(q, frontier);
                                    c += shared.push_owned(q, d, frontier, true);
                                }
                            }
                        }
                    }
                    c_iter.fetch_add(c, Ordering::Relaxed);
                });
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::{dense_query, dense_self, Metric};
    use crate::init::{brute_force, brute_force_query, random_query_graph};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn reference_line(n: usize) -> Vec<f32> {
        (0..n).map(|i| i as f32).collect()
    }

    #[test]
    fn query_refinement_reaches_exact_neighbors() {
        let n_refs = 40;
        let k = 4;
        let reference = reference_line(n_refs);
        let queries: Vec<f32> = vec![0.2, 7.6, 19.9, 33.3, 39.0];

        let self_distance = dense_self(Metric::Euclidean, reference.clone(), 1).unwrap();
        let ref_graph = brute_force(self_distance.as_ref(), k).unwrap();

        let query_distance =
            dense_query(Metric::Euclidean, queries.clone(), reference.clone(), 1).unwrap();
        let mut rng = SmallRng::seed_from_u64(5);
        let init = random_query_graph(query_distance.as_ref(), k, false, &mut rng).unwrap();

        let params = NndParams {
            n_iters: 30,
            ..NndParams::default()
        };
        let out = nn_descent_query(query_distance.as_ref(), &ref_graph, &init, &params).unwrap();
        let exact = brute_force_query(query_distance.as_ref(), k).unwrap();
        for q in 0..queries.len() as u32 {
            for (g, w) in out.graph.row_dist(q).iter().zip(exact.row_dist(q)) {
                assert!((g - w).abs() < 1e-5, "query {q}");
            }
        }
    }

    #[test]
    fn parallel_query_matches_serial_exactness() {
        let n_refs = 40;
        let k = 3;
        let reference = reference_line(n_refs);
        let queries: Vec<f32> = (0..10).map(|i| i as f32 * 3.7 + 0.4).collect();

        let self_distance = dense_self(Metric::Euclidean, reference.clone(), 1).unwrap();
        let ref_graph = brute_force(self_distance.as_ref(), k).unwrap();
        let query_distance =
            dense_query(Metric::Euclidean, queries.clone(), reference, 1).unwrap();
        let mut rng = SmallRng::seed_from_u64(11);
        let init = random_query_graph(query_distance.as_ref(), k, false, &mut rng).unwrap();

        let params = NndParams {
            n_threads: 3,
            n_iters: 30,
            ..NndParams::default()
        };
        let out = nn_descent_query(query_distance.as_ref(), &ref_graph, &init, &params).unwrap();
        let exact = brute_force_query(query_distance.as_ref(), k).unwrap();
        for q in 0..queries.len() as u32 {
            for (g, w) in out.graph.row_dist(q).iter().zip(exact.row_dist(q)) {
                assert!((g - w).abs() < 1e-5, "query {q}");
            }
        }
    }

    #[test]
    fn reference_rows_are_never_modified() {
        let reference = reference_line(20);
        let queries = vec![4.5_f32, 12.2];
        let self_distance = dense_self(Metric::Euclidean, reference.clone(), 1).unwrap();
        let ref_graph = brute_force(self_distance.as_ref(), 3).unwrap();
        let before = ref_graph.clone();

        let query_distance = dense_query(Metric::Euclidean, queries, reference, 1).unwrap();
        let mut rng = SmallRng::seed_from_u64(2);
        let init = random_query_graph(query_distance.as_ref(), 3, false, &mut rng).unwrap();
        let _ =
            nn_descent_query(query_distance.as_ref(), &ref_graph, &init, &NndParams::default())
                .unwrap();
        assert_eq!(ref_graph, before);
    }
}

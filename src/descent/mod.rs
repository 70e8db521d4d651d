//! Nearest neighbor descent.
//!
//! Converges a coarse k-NN graph toward the true one by repeated local
//! joins: "a neighbor of a neighbor is likely also a neighbor" (Dong et
//! al., 2011). Each iteration samples general-neighbor candidates, joins
//! them pairwise through a graph updater, and counts accepted updates;
//! the loop stops when that count drops to `delta * k * n_points`, when
//! the iteration cap is hit, or when the progress collaborator fires an
//! interrupt. In every case the heap is deheap-sorted and returned with
//! its [`Termination`] status.
//!
//! # Quick start
//!
//! ```
//! use akin::descent::{nn_descent, NndParams};
//! use akin::dist::{dense_self, Metric};
//! use akin::init::random_graph;
//! use rand::rngs::SmallRng;
//! use rand::SeedableRng;
//!
//! // Four points on a line.
//! let data = vec![0.0_f32, 1.0, 2.0, 10.0];
//! let distance = dense_self(Metric::Euclidean, data, 1).unwrap();
//!
//! let mut rng = SmallRng::seed_from_u64(42);
//! let init = random_graph(distance.as_ref(), 2, false, &mut rng).unwrap();
//!
//! let params = NndParams {
//!     max_candidates: Some(4),
//!     ..NndParams::default()
//! };
//! let out = nn_descent(distance.as_ref(), &init, &params).unwrap();
//! assert_eq!(out.graph.row_idx(0)[0], 1);
//! ```
//!
//! The serial driver additionally supports `rho` pair sampling; the
//! parallel driver (`n_threads > 0`) schedules joins in blocks and applies
//! updates under a striped mutex bank.
//!
//! # References
//!
//! - Dong, Moses & Li (2011): "Efficient k-nearest neighbor graph
//!   construction for generic similarity measures"

pub(crate) mod parallel;
pub mod query;

pub use query::nn_descent_query;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::candidates::{build_candidates, flag_retained_new};
use crate::dist::Distance;
use crate::error::{DescentError, Result};
use crate::graph::{heap_from_graph, NnGraph, PushMode};
use crate::heap::NndHeap;
use crate::progress::{HeapSumProgress, LogProgress, Progress};
use crate::update::{local_join_pairs, BatchUpdate, GraphUpdate, StreamingUpdate};
use crate::Scalar;

/// How a descent run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Update count fell to the convergence threshold.
    Converged,
    /// Iteration cap reached without converging.
    MaxIterations,
    /// Cooperative interrupt; the graph holds whatever had been refined.
    Interrupted,
}

/// Reporting style when `verbose` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    /// One line per finished iteration.
    Bar,
    /// Heap distance sum per iteration.
    HeapSum,
}

/// Configuration for a descent run. `k` itself is taken from the initial
/// graph's row width.
#[derive(Debug, Clone)]
pub struct NndParams {
    /// Candidate sample cap per point and iteration; defaults to `k`.
    pub max_candidates: Option<usize>,
    /// Hard iteration cap.
    pub n_iters: usize,
    /// Relative convergence threshold.
    pub delta: f64,
    /// Pair sampling rate in `(0, 1]`; pairs are joined with this
    /// probability. Serial driver only.
    pub rho: f64,
    /// Select the streaming (low-memory) updater instead of the batched
    /// deduplicating one.
    pub low_memory: bool,
    /// Worker count; 0 runs serially.
    pub n_threads: usize,
    /// Points per scheduling block in the parallel driver.
    pub block_size: usize,
    /// Minimum chunk length handed to a worker.
    pub grain_size: usize,
    /// Root seed; per-range streams derive from it deterministically.
    pub seed: u64,
    /// Emit progress logs. No semantic effect.
    pub verbose: bool,
    /// What to log when verbose.
    pub progress: ProgressKind,
}

impl Default for NndParams {
    fn default() -> Self {
        Self {
            max_candidates: None,
            n_iters: 20,
            delta: 0.001,
            rho: 1.0,
            low_memory: false,
            n_threads: 0,
            block_size: 16384,
            grain_size: 1,
            seed: 42,
            verbose: false,
            progress: ProgressKind::Bar,
        }
    }
}

impl NndParams {
    pub(crate) fn validate(&self, n_points: usize, n_nbrs: usize) -> Result<()> {
        if n_nbrs == 0 {
            return Err(DescentError::InvalidParameter(
                "k: must be at least 1".to_string(),
            ));
        }
        if n_nbrs > n_points {
            return Err(DescentError::InvalidParameter(format!(
                "k: {n_nbrs} exceeds the number of points {n_points}"
            )));
        }
        if self.max_candidates == Some(0) {
            return Err(DescentError::InvalidParameter(
                "max_candidates: must be at least 1".to_string(),
            ));
        }
        if !(self.delta >= 0.0) {
            return Err(DescentError::InvalidParameter(
                "delta: must be non-negative".to_string(),
            ));
        }
        if !(self.rho > 0.0 && self.rho <= 1.0) {
            return Err(DescentError::InvalidParameter(
                "rho: must be in (0, 1]".to_string(),
            ));
        }
        if self.block_size == 0 {
            return Err(DescentError::InvalidParameter(
                "block_size: must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn make_progress(&self) -> Box<dyn Progress> {
        match self.progress {
            ProgressKind::Bar => Box::new(LogProgress::new(self.verbose)),
            ProgressKind::HeapSum => Box::new(HeapSumProgress::new(self.verbose)),
        }
    }
}

/// A refined graph and how the run ended.
#[derive(Debug, Clone)]
pub struct NndOutput<T> {
    pub graph: NnGraph<T>,
    pub termination: Termination,
}

/// Deterministic per-range random stream, split from the root seed. Keyed
/// by the range start rather than a worker id, so results do not depend on
/// the thread count.
pub(crate) fn stream_rng(seed: u64, iter: u64, start: u64) -> SmallRng {
    let mix = seed
        ^ iter.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ start.wrapping_mul(0xD1B5_4A32_D192_ED03);
    SmallRng::seed_from_u64(mix)
}

/// Refine a k-NN graph over a set of points.
///
/// `distance` must be a self form (`nx == ny`); `init` supplies both the
/// starting neighbors and `k`. Returns the deheap-sorted graph and the
/// termination status.
pub fn nn_descent<T: Scalar>(
    distance: &dyn Distance<T>,
    init: &NnGraph<T>,
    params: &NndParams,
) -> Result<NndOutput<T>> {
    if distance.nx() != distance.ny() {
        return Err(DescentError::InvalidParameter(
            "distance: a self form is required to build a graph".to_string(),
        ));
    }
    if init.n_points != distance.nx() {
        return Err(DescentError::InvalidParameter(format!(
            "init: has {} rows but the distance indexes {} points",
            init.n_points,
            distance.nx()
        )));
    }
    params.validate(init.n_points, init.n_nbrs)?;

    let mut heap = heap_from_graph(init, init.n_nbrs, PushMode::Symmetric);
    let mut progress = params.make_progress();
    let termination = if params.n_threads > 0 {
        parallel::nnd_build_parallel(&mut heap, distance, params, progress.as_mut())?
    } else {
        let mut rng = SmallRng::seed_from_u64(params.seed);
        nnd_build(&mut heap, distance, params, &mut rng, progress.as_mut())
    };
    Ok(NndOutput {
        graph: NnGraph::from_nnd_heap(heap),
        termination,
    })
}

/// Serial descent loop over an already-seeded heap.
///
/// Exposed for callers that manage their own heap, RNG or progress
/// implementation; [`nn_descent`] is the packaged form. The heap is left
/// unsorted so a caller can keep refining; sort with
/// [`NndHeap::deheap_sort`] before emitting.
pub fn nnd_build<T: Scalar, R: Rng>(
    heap: &mut NndHeap<T>,
    distance: &dyn Distance<T>,
    params: &NndParams,
    rng: &mut R,
    progress: &mut dyn Progress,
) -> Termination {
    let n_points = heap.n_points;
    let n_nbrs = heap.n_nbrs;
    let max_candidates = params.max_candidates.unwrap_or(n_nbrs);
    let tol = params.delta * n_nbrs as f64 * n_points as f64;
    let sample_all = params.rho >= 1.0;

    let mut streaming;
    let mut batched;
    let updater: &mut dyn GraphUpdate<T> = if params.low_memory {
        streaming = StreamingUpdate::new(distance);
        &mut streaming
    } else {
        batched = BatchUpdate::new(distance);
        &mut batched
    };

    for iter in 0..params.n_iters {
        let (new_cands, old_cands) = build_candidates(heap, max_candidates, rng);
        flag_retained_new(heap, &new_cands);

        let mut c = 0usize;
        for i in 0..n_points as u32 {
            local_join_pairs(new_cands.row_idx(i), old_cands.row_idx(i), |p, q| {
                if sample_all || rng.random::<f64>() < params.rho {
                    c += updater.generate(heap, p, q);
                }
            });
            if progress.check_interrupt() {
                return Termination::Interrupted;
            }
        }
        c += updater.apply(heap);

        if progress.wants_heap_report() {
            progress.heap_report(heap.dist_sum());
        }
        progress.iter_finished(iter, params.n_iters);
        if (c as f64) <= tol {
            progress.converged(c, tol);
            return Termination::Converged;
        }
    }
    Termination::MaxIterations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::{dense_self, Metric};
    use crate::graph::NnGraph;
    use crate::heap::NPOS;
    use crate::init::brute_force;
    use crate::progress::InterruptFlag;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    /// Two clusters far apart; the refined graph must keep neighbors
    /// inside each cluster.
    fn cluster_data() -> Vec<f32> {
        let mut data = Vec::new();
        for i in 0..8 {
            data.push(i as f32 * 0.01);
            data.push(0.0);
        }
        for i in 0..8 {
            data.push(100.0 + i as f32 * 0.01);
            data.push(0.0);
        }
        data
    }

    fn scrambled_init(n_points: usize, n_nbrs: usize) -> NnGraph<f32> {
        // Deliberately poor seeding: a ring, ignoring geometry.
        let mut idx = Vec::new();
        for i in 0..n_points {
            for j in 1..=n_nbrs {
                idx.push(((i + j) % n_points) as u32);
            }
        }
        NnGraph::from_parts(idx, vec![f32::INFINITY; n_points * n_nbrs], n_points).unwrap()
    }

    #[test]
    fn descent_recovers_cluster_structure() {
        let data = cluster_data();
        let distance = dense_self(Metric::Euclidean, data, 2).unwrap();
        let init = {
            // Seed distances must be real for the seeded heap to mean
            // anything; compute them for the scrambled indices.
            let scrambled = scrambled_init(16, 3);
            crate::graph::graph_from_indices(distance.as_ref(), &scrambled.idx, 3).unwrap()
        };
        let out = nn_descent(distance.as_ref(), &init, &NndParams::default()).unwrap();
        for i in 0..16u32 {
            for &j in out.graph.row_idx(i) {
                assert_ne!(j, NPOS);
                assert_eq!(j < 8, i < 8, "point {i} crossed clusters to {j}");
            }
        }
    }

    #[test]
    fn descent_matches_brute_force_on_tiny_set() {
        let data = vec![0.0_f32, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 3.0, 3.0];
        let distance = dense_self(Metric::Euclidean, data, 2).unwrap();
        let exact = brute_force(distance.as_ref(), 3).unwrap();

        let scrambled = scrambled_init(5, 3);
        let init =
            crate::graph::graph_from_indices(distance.as_ref(), &scrambled.idx, 3).unwrap();
        let params = NndParams {
            max_candidates: Some(5),
            ..NndParams::default()
        };
        let out = nn_descent(distance.as_ref(), &init, &params).unwrap();
        for i in 0..5u32 {
            let mut got: Vec<u32> = out.graph.row_idx(i).to_vec();
            let mut want: Vec<u32> = exact.row_idx(i).to_vec();
            got.sort_unstable();
            want.sort_unstable();
            assert_eq!(got, want, "row {i}");
        }
    }

    #[test]
    fn kth_distance_never_increases_across_iterations() {
        let data = cluster_data();
        let distance = dense_self(Metric::Euclidean, data, 2).unwrap();
        let scrambled = scrambled_init(16, 3);
        let init =
            crate::graph::graph_from_indices(distance.as_ref(), &scrambled.idx, 3).unwrap();

        let mut heap = heap_from_graph(&init, 3, PushMode::Symmetric);
        let mut rng = SmallRng::seed_from_u64(3);
        let params = NndParams {
            n_iters: 1,
            delta: 0.0,
            ..NndParams::default()
        };
        let mut progress = crate::progress::NullProgress;
        let mut previous: Vec<f32> = (0..16u32).map(|i| heap.top_distance(i)).collect();
        for _ in 0..5 {
            nnd_build(&mut heap, distance.as_ref(), &params, &mut rng, &mut progress);
            let current: Vec<f32> = (0..16u32).map(|i| heap.top_distance(i)).collect();
            for (prev, cur) in previous.iter().zip(&current) {
                assert!(cur <= prev);
            }
            previous = current;
        }
    }

    #[test]
    fn zero_delta_single_iteration_completes() {
        let data = cluster_data();
        let distance = dense_self(Metric::Euclidean, data, 2).unwrap();
        let scrambled = scrambled_init(16, 3);
        let init =
            crate::graph::graph_from_indices(distance.as_ref(), &scrambled.idx, 3).unwrap();
        let params = NndParams {
            delta: 0.0,
            n_iters: 1,
            ..NndParams::default()
        };
        let out = nn_descent(distance.as_ref(), &init, &params).unwrap();
        assert_ne!(out.termination, Termination::Interrupted);
    }

    #[test]
    fn interrupt_returns_partial_graph() {
        let data = cluster_data();
        let distance = dense_self(Metric::Euclidean, data, 2).unwrap();
        let scrambled = scrambled_init(16, 3);
        let init =
            crate::graph::graph_from_indices(distance.as_ref(), &scrambled.idx, 3).unwrap();

        let stop = Arc::new(AtomicBool::new(true));
        let mut heap = heap_from_graph(&init, 3, PushMode::Symmetric);
        let mut rng = SmallRng::seed_from_u64(3);
        let mut progress = InterruptFlag::new(stop);
        let termination = nnd_build(
            &mut heap,
            distance.as_ref(),
            &NndParams::default(),
            &mut rng,
            &mut progress,
        );
        assert_eq!(termination, Termination::Interrupted);
        let graph = NnGraph::from_nnd_heap(heap);
        assert_eq!(graph.n_points, 16);
    }

    #[test]
    fn validation_rejects_bad_parameters() {
        let params = NndParams::default();
        assert!(params.validate(10, 0).is_err());
        assert!(params.validate(3, 4).is_err());
        let bad = NndParams {
            rho: 0.0,
            ..NndParams::default()
        };
        assert!(bad.validate(10, 3).is_err());
        let bad = NndParams {
            max_candidates: Some(0),
            ..NndParams::default()
        };
        assert!(bad.validate(10, 3).is_err());
    }

    #[test]
    fn rho_sampling_still_converges_to_clusters() {
        let data = cluster_data();
        let distance = dense_self(Metric::Euclidean, data, 2).unwrap();
        let scrambled = scrambled_init(16, 3);
        let init =
            crate::graph::graph_from_indices(distance.as_ref(), &scrambled.idx, 3).unwrap();
        let params = NndParams {
            rho: 0.7,
            n_iters: 40,
            ..NndParams::default()
        };
        let out = nn_descent(distance.as_ref(), &init, &params).unwrap();
        for i in 0..16u32 {
            for &j in out.graph.row_idx(i) {
                assert_eq!(j < 8, i < 8);
            }
        }
    }

    #[test]
    fn low_memory_and_batched_agree_on_final_sets() {
        let data = cluster_data();
        let distance = dense_self(Metric::Euclidean, data, 2).unwrap();
        let scrambled = scrambled_init(16, 3);
        let init =
            crate::graph::graph_from_indices(distance.as_ref(), &scrambled.idx, 3).unwrap();

        let batched = nn_descent(distance.as_ref(), &init, &NndParams::default()).unwrap();
        let params = NndParams {
            low_memory: true,
            ..NndParams::default()
        };
        let streamed = nn_descent(distance.as_ref(), &init, &params).unwrap();
        // Both settle on the cluster-local neighborhoods.
        for i in 0..16u32 {
            let mut a: Vec<u32> = batched.graph.row_idx(i).to_vec();
            let mut b: Vec<u32> = streamed.graph.row_idx(i).to_vec();
            a.sort_unstable();
            b.sort_unstable();
            assert_eq!(a, b, "row {i}");
        }
    }
}

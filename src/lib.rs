//! akin: approximate k-nearest-neighbor graph construction.
//!
//! Builds, for every point of a dataset, an ordered list of its k
//! (approximately) nearest neighbors under a chosen metric, using
//! **Nearest Neighbor Descent** (Dong et al., 2011): start from a coarse
//! graph, repeatedly join each point's sampled neighbors-of-neighbors,
//! and keep whatever improves the graph until improvements dry up. A
//! separate query set can then be searched against the finished graph.
//!
//! # Pipeline
//!
//! 1. **Seed** ([`init`]): random k-NN (or brute force for tiny data)
//!    produces a starting graph.
//! 2. **Refine** ([`descent`]): [`descent::nn_descent`] runs the descent,
//!    serial or parallel, until convergence, the iteration cap, or an
//!    interrupt.
//! 3. **Post-process** ([`hub`]): reverse-neighbor counts, k-occurrence
//!    ranking, degree adjustment, mutualization, occlusion pruning and
//!    graph merging turn the k-NN graph into a better search graph.
//! 4. **Query** ([`descent::nn_descent_query`]): refine query-to-reference
//!    neighbors against the fixed graph.
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
//! // 20 points in the plane, row-major.
//! let data: Vec<f32> = (0..40).map(|v| (v as f32 * 0.37).sin()).collect();
//! let distance = dense_self(Metric::Euclidean, data, 2).unwrap();
//!
//! let mut rng = SmallRng::seed_from_u64(42);
//! let init = random_graph(distance.as_ref(), 4, false, &mut rng).unwrap();
//! let out = nn_descent(distance.as_ref(), &init, &NndParams::default()).unwrap();
//!
//! assert_eq!(out.graph.n_nbrs, 4);
//! ```
//!
//! # Scope
//!
//! Exact search, space-partitioning trees and on-disk indices are out of
//! scope; the crate is the graph-construction core. Accuracy is
//! empirical: the convergence gate bounds work, not recall.
//!
//! # References
//!
//! - Dong, Moses & Li (2011): "Efficient k-nearest neighbor graph
//!   construction for generic similarity measures"
//! - Iwasaki & Miyazaki (2018): "Optimization of indexing based on
//!   k-nearest neighbor graph for proximity search in high-dimensional
//!   data"

pub mod candidates;
pub mod descent;
pub mod dist;
pub mod error;
pub mod executor;
pub mod graph;
pub mod heap;
pub mod hub;
pub mod init;
pub mod progress;
pub mod update;

pub(crate) mod sync;

use num_traits::{Float, FromPrimitive};

/// Floating scalar used for distances: `f32` by default, `f64` supported.
pub trait Scalar: Float + FromPrimitive + Send + Sync + 'static {}

impl<T: Float + FromPrimitive + Send + Sync + 'static> Scalar for T {}

pub use descent::{nn_descent, nn_descent_query, NndOutput, NndParams, ProgressKind, Termination};
pub use dist::{Distance, Metric};
pub use error::{DescentError, Result};
pub use graph::{NnGraph, SparseNnGraph};
pub use heap::{NnHeap, NndHeap, NPOS};

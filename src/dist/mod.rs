//! Distance metrics over dense, binary and sparse inputs.
//!
//! A metric is named by [`Metric`] (parseable from its catalog string) and
//! materialized as a boxed [`Distance`] functor over the input data. The
//! functor owns its (possibly preprocessed) copy of the data, so the
//! drivers only ever see an index-pair oracle:
//!
//! ```
//! use akin::dist::{dense_self, Metric};
//!
//! let data = vec![0.0_f32, 0.0, 3.0, 4.0];
//! let d = dense_self(Metric::Euclidean, data, 2).unwrap();
//! assert_eq!(d.distance(0, 1), 5.0);
//! ```
//!
//! Dispatch happens once per distance call through the box; the
//! vector-length inner loops dominate, so this costs nothing measurable
//! against monomorphized kernels.

pub mod binary;
pub mod dense;
pub mod sparse;

use std::str::FromStr;

use crate::error::{DescentError, Result};
use crate::Scalar;

use binary::{BinaryQuery, BinarySelf, BitTable};
use dense::{mean_center, DenseKernel, DenseQuery, DenseSelf};
use sparse::{CsrData, SparseKernel, SparseQuery, SparseSelf};

/// Distance oracle between indexed points.
///
/// `i` indexes the left-hand (query) set of `nx` points, `j` the
/// right-hand (reference) set of `ny` points; self forms use the same set
/// on both sides. Implementations must be cheap to call and thread-safe:
/// the drivers evaluate from many workers concurrently.
pub trait Distance<T>: Sync {
    fn distance(&self, i: u32, j: u32) -> T;
    fn nx(&self) -> usize;
    fn ny(&self) -> usize;
}

/// The metric catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Squared Euclidean.
    L2Sqr,
    Euclidean,
    Manhattan,
    /// Component-wise inequality count.
    Hamming,
    /// Bit-packed Hamming over binary data (dense input only).
    BHamming,
    Cosine,
    /// `log2((|x||y|) / <x,y>)` with a max-value sentinel.
    AlternativeCosine,
    /// Cosine on mean-centered input.
    Correlation,
    /// `max(1 - <x,y>, 0)`.
    InnerProduct,
}

impl FromStr for Metric {
    type Err = DescentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "l2sqr" => Ok(Metric::L2Sqr),
            "euclidean" => Ok(Metric::Euclidean),
            "manhattan" => Ok(Metric::Manhattan),
            "hamming" => Ok(Metric::Hamming),
            "bhamming" => Ok(Metric::BHamming),
            "cosine" => Ok(Metric::Cosine),
            "alternative_cosine" => Ok(Metric::AlternativeCosine),
            "correlation" => Ok(Metric::Correlation),
            "inner_product" => Ok(Metric::InnerProduct),
            _ => Err(DescentError::UnknownMetric(s.to_string())),
        }
    }
}

/// Dense kernel + preprocessing for a metric. Correlation reduces to the
/// cosine kernel on mean-centered rows; centering is applied once here
/// instead of on every call.
fn dense_plan(metric: Metric) -> Option<(DenseKernel, bool)> {
    match metric {
        Metric::L2Sqr => Some((DenseKernel::L2Sqr, false)),
        Metric::Euclidean => Some((DenseKernel::Euclidean, false)),
        Metric::Manhattan => Some((DenseKernel::Manhattan, false)),
        Metric::Hamming => Some((DenseKernel::Hamming, false)),
        Metric::Cosine => Some((DenseKernel::Cosine, false)),
        Metric::AlternativeCosine => Some((DenseKernel::AlternativeCosine, false)),
        Metric::Correlation => Some((DenseKernel::Cosine, true)),
        Metric::InnerProduct => Some((DenseKernel::InnerProduct, false)),
        Metric::BHamming => None,
    }
}

fn sparse_kernel(metric: Metric) -> Result<SparseKernel> {
    match metric {
        Metric::L2Sqr => Ok(SparseKernel::L2Sqr),
        Metric::Euclidean => Ok(SparseKernel::Euclidean),
        Metric::Manhattan => Ok(SparseKernel::Manhattan),
        Metric::Hamming => Ok(SparseKernel::Hamming),
        Metric::Cosine => Ok(SparseKernel::Cosine),
        Metric::AlternativeCosine => Ok(SparseKernel::AlternativeCosine),
        Metric::Correlation => Ok(SparseKernel::Correlation),
        Metric::InnerProduct => Ok(SparseKernel::InnerProduct),
        Metric::BHamming => Err(DescentError::InvalidParameter(
            "metric: bhamming requires dense binary input".to_string(),
        )),
    }
}

fn check_dense<T>(data: &[T], ndim: usize, name: &str) -> Result<()> {
    if ndim == 0 || data.len() % ndim != 0 {
        return Err(DescentError::InvalidShape(format!(
            "{name}: {} entries do not factor into {} columns",
            data.len(),
            ndim
        )));
    }
    Ok(())
}

/// Self-distance over one dense row-major matrix.
pub fn dense_self<T: Scalar>(
    metric: Metric,
    mut data: Vec<T>,
    ndim: usize,
) -> Result<Box<dyn Distance<T>>> {
    check_dense(&data, ndim, "data")?;
    match dense_plan(metric) {
        Some((kernel, center)) => {
            if center {
                mean_center(&mut data, ndim);
            }
            Ok(Box::new(DenseSelf::new(data, ndim, kernel)))
        }
        None => Ok(Box::new(BinarySelf::new(BitTable::from_dense(
            &data, ndim,
        )?))),
    }
}

/// Query-to-reference distance over two dense matrices.
pub fn dense_query<T: Scalar>(
    metric: Metric,
    mut query: Vec<T>,
    mut reference: Vec<T>,
    ndim: usize,
) -> Result<Box<dyn Distance<T>>> {
    check_dense(&query, ndim, "query")?;
    check_dense(&reference, ndim, "reference")?;
    match dense_plan(metric) {
        Some((kernel, center)) => {
            if center {
                mean_center(&mut query, ndim);
                mean_center(&mut reference, ndim);
            }
            Ok(Box::new(DenseQuery::new(query, reference, ndim, kernel)))
        }
        None => Ok(Box::new(BinaryQuery::new(
            BitTable::from_dense(&query, ndim)?,
            BitTable::from_dense(&reference, ndim)?,
        ))),
    }
}

/// Self-distance over one CSR matrix.
pub fn sparse_self<T: Scalar>(metric: Metric, data: CsrData<T>) -> Result<Box<dyn Distance<T>>> {
    Ok(Box::new(SparseSelf::new(data, sparse_kernel(metric)?)))
}

/// Query-to-reference distance over two CSR matrices sharing `ndim`.
pub fn sparse_query<T: Scalar>(
    metric: Metric,
    query: CsrData<T>,
    reference: CsrData<T>,
) -> Result<Box<dyn Distance<T>>> {
    if query.ndim() != reference.ndim() {
        return Err(DescentError::DimensionMismatch {
            x_dim: query.ndim(),
            y_dim: reference.ndim(),
        });
    }
    Ok(Box::new(SparseQuery::new(
        query,
        reference,
        sparse_kernel(metric)?,
    )))
}

//! Sparse (CSR) vectors and their distance kernels.
//!
//! Every kernel is a merge join over two sorted index lists: matching
//! indices combine both values, unmatched indices contribute one side
//! against an implicit zero. The correlation kernel additionally accounts
//! for the implicit zeros' shift against the per-vector mean, which is
//! where most of its algebra comes from.

use crate::dist::Distance;
use crate::error::{DescentError, Result};
use crate::Scalar;

/// Compressed sparse row input: per point, a sorted index list and a value
/// list, plus the ambient dimensionality.
#[derive(Debug, Clone)]
pub struct CsrData<T> {
    row_ptr: Vec<usize>,
    ind: Vec<u32>,
    data: Vec<T>,
    ndim: usize,
}

impl<T: Scalar> CsrData<T> {
    pub fn new(row_ptr: Vec<usize>, ind: Vec<u32>, data: Vec<T>, ndim: usize) -> Result<Self> {
        if row_ptr.is_empty() || row_ptr[0] != 0 {
            return Err(DescentError::InvalidShape(
                "row_ptr must start at 0".to_string(),
            ));
        }
        if *row_ptr.last().unwrap() != ind.len() || ind.len() != data.len() {
            return Err(DescentError::InvalidShape(format!(
                "row_ptr ends at {} but there are {} indices and {} values",
                row_ptr.last().unwrap(),
                ind.len(),
                data.len()
            )));
        }
        if row_ptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(DescentError::InvalidShape(
                "row_ptr must be non-decreasing".to_string(),
            ));
        }
        for w in row_ptr.windows(2) {
            let row = &ind[w[0]..w[1]];
            if row.windows(2).any(|p| p[0] >= p[1]) {
                return Err(DescentError::InvalidShape(
                    "row indices must be strictly increasing".to_string(),
                ));
            }
            if row.last().is_some_and(|&j| j as usize >= ndim) {
                return Err(DescentError::InvalidShape(format!(
                    "row index out of range for ndim {ndim}"
                )));
            }
        }
        Ok(Self {
            row_ptr,
            ind,
            data,
            ndim,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.row_ptr.len() - 1
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    #[inline]
    pub fn row(&self, i: u32) -> (&[u32], &[T]) {
        let begin = self.row_ptr[i as usize];
        let end = self.row_ptr[i as usize + 1];
        (&self.ind[begin..end], &self.data[begin..end])
    }
}

/// Squared Euclidean distance between sparse vectors.
#[must_use]
pub fn sparse_l2sqr<T: Scalar>(xi: &[u32], xd: &[T], yi: &[u32], yd: &[T]) -> T {
    let mut sum = T::zero();
    let mut i1 = 0;
    let mut i2 = 0;
    while i1 < xi.len() && i2 < yi.len() {
        if xi[i1] == yi[i2] {
            let v = xd[i1] - yd[i2];
            sum = sum + v * v;
            i1 += 1;
            i2 += 1;
        } else if xi[i1] < yi[i2] {
            sum = sum + xd[i1] * xd[i1];
            i1 += 1;
        } else {
            sum = sum + yd[i2] * yd[i2];
            i2 += 1;
        }
    }
    while i1 < xi.len() {
        sum = sum + xd[i1] * xd[i1];
        i1 += 1;
    }
    while i2 < yi.len() {
        sum = sum + yd[i2] * yd[i2];
        i2 += 1;
    }
    sum
}

#[must_use]
pub fn sparse_euclidean<T: Scalar>(xi: &[u32], xd: &[T], yi: &[u32], yd: &[T]) -> T {
    sparse_l2sqr(xi, xd, yi, yd).sqrt()
}

#[must_use]
pub fn sparse_manhattan<T: Scalar>(xi: &[u32], xd: &[T], yi: &[u32], yd: &[T]) -> T {
    let mut sum = T::zero();
    let mut i1 = 0;
    let mut i2 = 0;
    while i1 < xi.len() && i2 < yi.len() {
        if xi[i1] == yi[i2] {
            sum = sum + (xd[i1] - yd[i2]).abs();
            i1 += 1;
            i2 += 1;
        } else if xi[i1] < yi[i2] {
            sum = sum + xd[i1].abs();
            i1 += 1;
        } else {
            sum = sum + yd[i2].abs();
            i2 += 1;
        }
    }
    while i1 < xi.len() {
        sum = sum + xd[i1].abs();
        i1 += 1;
    }
    while i2 < yi.len() {
        sum = sum + yd[i2].abs();
        i2 += 1;
    }
    sum
}

/// Count of components that differ; an index present on one side only
/// always differs (the other side is implicitly zero).
#[must_use]
pub fn sparse_hamming<T: Scalar>(xi: &[u32], xd: &[T], yi: &[u32], yd: &[T]) -> T {
    let mut unequal = 0usize;
    let mut i1 = 0;
    let mut i2 = 0;
    while i1 < xi.len() && i2 < yi.len() {
        if xi[i1] == yi[i2] {
            if xd[i1] != yd[i2] {
                unequal += 1;
            }
            i1 += 1;
            i2 += 1;
        } else if xi[i1] < yi[i2] {
            unequal += 1;
            i1 += 1;
        } else {
            unequal += 1;
            i2 += 1;
        }
    }
    unequal += xi.len() - i1;
    unequal += yi.len() - i2;
    T::from_usize(unequal).unwrap_or_else(T::zero)
}

/// Dot product over the common index set.
#[inline]
fn sparse_dot<T: Scalar>(xi: &[u32], xd: &[T], yi: &[u32], yd: &[T]) -> T {
    let mut dot = T::zero();
    let mut i1 = 0;
    let mut i2 = 0;
    while i1 < xi.len() && i2 < yi.len() {
        if xi[i1] == yi[i2] {
            dot = dot + xd[i1] * yd[i2];
            i1 += 1;
            i2 += 1;
        } else if xi[i1] < yi[i2] {
            i1 += 1;
        } else {
            i2 += 1;
        }
    }
    dot
}

#[inline]
fn norm2<T: Scalar>(d: &[T]) -> T {
    d.iter().fold(T::zero(), |acc, &v| acc + v * v)
}

#[must_use]
pub fn sparse_cosine<T: Scalar>(xi: &[u32], xd: &[T], yi: &[u32], yd: &[T]) -> T {
    let dot = sparse_dot(xi, xd, yi, yd);
    let n1 = norm2(xd).sqrt();
    let n2 = norm2(yd).sqrt();
    let zero = T::zero();
    if n1 == zero && n2 == zero {
        zero
    } else if n1 == zero || n2 == zero {
        T::one()
    } else {
        T::one() - dot / (n1 * n2)
    }
}

#[must_use]
pub fn sparse_alternative_cosine<T: Scalar>(xi: &[u32], xd: &[T], yi: &[u32], yd: &[T]) -> T {
    let dot = sparse_dot(xi, xd, yi, yd);
    let n1 = norm2(xd).sqrt();
    let n2 = norm2(yd).sqrt();
    let zero = T::zero();
    if n1 == zero && n2 == zero {
        zero
    } else if n1 == zero || n2 == zero || dot <= zero {
        T::max_value()
    } else {
        ((n1 * n2) / dot).log2()
    }
}

#[must_use]
pub fn sparse_inner_product<T: Scalar>(xi: &[u32], xd: &[T], yi: &[u32], yd: &[T]) -> T {
    (T::one() - sparse_dot(xi, xd, yi, yd)).max(T::zero())
}

/// Correlation distance: cosine on mean-centered vectors, where centering
/// turns every implicit zero into `-mu`. One merge pass covers the three
/// index classes (common, x-only, y-only); indices absent from both sides
/// contribute `mu_x * mu_y` each.
#[must_use]
pub fn sparse_correlation<T: Scalar>(
    xi: &[u32],
    xd: &[T],
    yi: &[u32],
    yd: &[T],
    ndim: usize,
) -> T {
    let zero = T::zero();
    let one = T::one();
    if xi.is_empty() && yi.is_empty() {
        return if ndim == 0 { zero } else { one };
    }
    let n = T::from_usize(ndim).unwrap_or_else(T::one);
    let mu_x = xd.iter().fold(zero, |acc, &v| acc + v) / n;
    let mu_y = yd.iter().fold(zero, |acc, &v| acc + v) / n;

    let shifted2_sum =
        |d: &[T], mu: T| d.iter().fold(zero, |acc, &v| acc + (v - mu) * (v - mu));
    let norm1 = (shifted2_sum(xd, mu_x)
        + T::from_usize(ndim - xd.len()).unwrap_or_else(T::zero) * mu_x * mu_x)
        .sqrt();
    let norm2 = (shifted2_sum(yd, mu_y)
        + T::from_usize(ndim - yd.len()).unwrap_or_else(T::zero) * mu_y * mu_y)
        .sqrt();

    let mut dot = zero;
    let mut n_union = 0usize;
    let mut i1 = 0;
    let mut i2 = 0;
    while i1 < xi.len() && i2 < yi.len() {
        if xi[i1] == yi[i2] {
            dot = dot + (xd[i1] - mu_x) * (yd[i2] - mu_y);
            i1 += 1;
            i2 += 1;
        } else if xi[i1] < yi[i2] {
            dot = dot - (xd[i1] - mu_x) * mu_y;
            i1 += 1;
        } else {
            dot = dot - (yd[i2] - mu_y) * mu_x;
            i2 += 1;
        }
        n_union += 1;
    }
    while i1 < xi.len() {
        dot = dot - (xd[i1] - mu_x) * mu_y;
        i1 += 1;
        n_union += 1;
    }
    while i2 < yi.len() {
        dot = dot - (yd[i2] - mu_y) * mu_x;
        i2 += 1;
        n_union += 1;
    }
    dot = dot + mu_x * mu_y * T::from_usize(ndim - n_union).unwrap_or_else(T::zero);

    if norm1 == zero && norm2 == zero {
        zero
    } else if dot == zero {
        one
    } else {
        one - dot / (norm1 * norm2)
    }
}

/// Tagged sparse kernel; resolved once at distance construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SparseKernel {
    L2Sqr,
    Euclidean,
    Manhattan,
    Hamming,
    Cosine,
    AlternativeCosine,
    Correlation,
    InnerProduct,
}

impl SparseKernel {
    #[inline]
    pub(crate) fn eval<T: Scalar>(
        self,
        xi: &[u32],
        xd: &[T],
        yi: &[u32],
        yd: &[T],
        ndim: usize,
    ) -> T {
        match self {
            SparseKernel::L2Sqr => sparse_l2sqr(xi, xd, yi, yd),
            SparseKernel::Euclidean => sparse_euclidean(xi, xd, yi, yd),
            SparseKernel::Manhattan => sparse_manhattan(xi, xd, yi, yd),
            SparseKernel::Hamming => sparse_hamming(xi, xd, yi, yd),
            SparseKernel::Cosine => sparse_cosine(xi, xd, yi, yd),
            SparseKernel::AlternativeCosine => sparse_alternative_cosine(xi, xd, yi, yd),
            SparseKernel::Correlation => sparse_correlation(xi, xd, yi, yd, ndim),
            SparseKernel::InnerProduct => sparse_inner_product(xi, xd, yi, yd),
        }
    }
}

pub(crate) struct SparseSelf<T> {
    data: CsrData<T>,
    kernel: SparseKernel,
}

impl<T: Scalar> SparseSelf<T> {
    pub(crate) fn new(data: CsrData<T>, kernel: SparseKernel) -> Self {
        Self { data, kernel }
    }
}

impl<T: Scalar> Distance<T> for SparseSelf<T> {
    #[inline]
    fn distance(&self, i: u32, j: u32) -> T {
        let (xi, xd) = self.data.row(i);
        let (yi, yd) = self.data.row(j);
        self.kernel.eval(xi, xd, yi, yd, self.data.ndim)
    }

    fn nx(&self) -> usize {
        self.data.n_rows()
    }

    fn ny(&self) -> usize {
        self.data.n_rows()
    }
}

pub(crate) struct SparseQuery<T> {
    x: CsrData<T>,
    y: CsrData<T>,
    kernel: SparseKernel,
}

impl<T: Scalar> SparseQuery<T> {
    pub(crate) fn new(x: CsrData<T>, y: CsrData<T>, kernel: SparseKernel) -> Self {
        Self { x, y, kernel }
    }
}

impl<T: Scalar> Distance<T> for SparseQuery<T> {
    #[inline]
    fn distance(&self, i: u32, j: u32) -> T {
        let (xi, xd) = self.x.row(i);
        let (yi, yd) = self.y.row(j);
        self.kernel.eval(xi, xd, yi, yd, self.x.ndim)
    }

    fn nx(&self) -> usize {
        self.x.n_rows()
    }

    fn ny(&self) -> usize {
        self.y.n_rows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::dense;

    /// Densify one sparse row for cross-checking against the dense kernels.
    fn densify(ind: &[u32], data: &[f64], ndim: usize) -> Vec<f64> {
        let mut out = vec![0.0; ndim];
        for (&j, &v) in ind.iter().zip(data) {
            out[j as usize] = v;
        }
        out
    }

    fn fixture() -> (Vec<(Vec<u32>, Vec<f64>)>, usize) {
        (
            vec![
                (vec![0, 2, 5], vec![1.0, -2.0, 0.5]),
                (vec![1, 2], vec![3.0, 4.0]),
                (vec![], vec![]),
                (vec![0, 1, 2, 3, 4, 5], vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]),
            ],
            6,
        )
    }

    #[test]
    fn sparse_kernels_match_dense_counterparts() {
        let (rows, ndim) = fixture();
        for (xi, xd) in &rows {
            for (yi, yd) in &rows {
                let dx = densify(xi, xd, ndim);
                let dy = densify(yi, yd, ndim);
                let close = |a: f64, b: f64| (a - b).abs() < 1e-10;
                assert!(close(sparse_l2sqr(xi, xd, yi, yd), dense::l2sqr(&dx, &dy)));
                assert!(close(
                    sparse_euclidean(xi, xd, yi, yd),
                    dense::euclidean(&dx, &dy)
                ));
                assert!(close(
                    sparse_manhattan(xi, xd, yi, yd),
                    dense::manhattan(&dx, &dy)
                ));
                assert!(close(
                    sparse_cosine(xi, xd, yi, yd),
                    dense::cosine(&dx, &dy)
                ));
                assert!(close(
                    sparse_inner_product(xi, xd, yi, yd),
                    dense::inner_product(&dx, &dy)
                ));
                // The empty-empty case is pinned to 1 for sparse input,
                // diverging from the dense all-zero convention.
                if !(xi.is_empty() && yi.is_empty()) {
                    assert!(close(
                        sparse_correlation(xi, xd, yi, yd, ndim),
                        dense::correlation(&dx, &dy)
                    ));
                }
            }
        }
    }

    #[test]
    fn sparse_hamming_counts_one_sided_entries() {
        let d: f64 = sparse_hamming(&[0, 3], &[1.0, 2.0], &[3, 4], &[2.0, 5.0]);
        // index 0 (x only), index 4 (y only); index 3 matches with equal
        // values.
        assert_eq!(d, 2.0);
    }

    #[test]
    fn csr_validation() {
        assert!(CsrData::new(vec![0, 2], vec![0, 1], vec![1.0_f32, 2.0], 4).is_ok());
        // row_ptr/nnz disagreement
        assert!(CsrData::new(vec![0, 3], vec![0, 1], vec![1.0_f32, 2.0], 4).is_err());
        // unsorted row
        assert!(CsrData::new(vec![0, 2], vec![1, 0], vec![1.0_f32, 2.0], 4).is_err());
        // index out of range
        assert!(CsrData::new(vec![0, 1], vec![9], vec![1.0_f32], 4).is_err());
    }

    #[test]
    fn self_distance_over_csr() {
        let csr = CsrData::new(
            vec![0, 1, 2],
            vec![0, 1],
            vec![3.0_f32, 4.0],
            2,
        )
        .unwrap();
        let d = SparseSelf::new(csr, SparseKernel::Euclidean);
        let dist: f32 = d.distance(0, 1);
        assert_eq!(dist, 5.0);
    }
}

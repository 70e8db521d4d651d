//! Dense distance kernels and input preprocessing.
//!
//! Kernels are plain portable loops over `&[T]` slices; the inner loops
//! over vector length dominate, so per-call dispatch through the tagged
//! [`DenseKernel`] costs nothing measurable.
//!
//! Angular conventions: `cosine` returns 0 when both norms are zero and 1
//! when exactly one is; `alternative_cosine` returns the type's maximum
//! value when the dot product is non-positive or exactly one norm is zero.

use crate::dist::Distance;
use crate::Scalar;

/// Squared Euclidean distance.
#[inline]
#[must_use]
pub fn l2sqr<T: Scalar>(x: &[T], y: &[T]) -> T {
    x.iter()
        .zip(y)
        .fold(T::zero(), |acc, (&a, &b)| acc + (a - b) * (a - b))
}

/// Euclidean distance.
#[inline]
#[must_use]
pub fn euclidean<T: Scalar>(x: &[T], y: &[T]) -> T {
    l2sqr(x, y).sqrt()
}

/// Manhattan (L1) distance.
#[inline]
#[must_use]
pub fn manhattan<T: Scalar>(x: &[T], y: &[T]) -> T {
    x.iter()
        .zip(y)
        .fold(T::zero(), |acc, (&a, &b)| acc + (a - b).abs())
}

/// Count of unequal components.
#[inline]
#[must_use]
pub fn hamming<T: Scalar>(x: &[T], y: &[T]) -> T {
    let n = x.iter().zip(y).filter(|(a, b)| a != b).count();
    T::from_usize(n).unwrap_or_else(T::zero)
}

/// Shared zero-norm handling for the angular distances. Takes squared
/// norms and the raw dot product.
#[inline]
fn angular<T: Scalar>(norm2x: T, norm2y: T, dot: T) -> T {
    let zero = T::zero();
    if norm2x == zero && norm2y == zero {
        return zero;
    }
    if norm2x == zero || norm2y == zero {
        return T::one();
    }
    T::one() - dot / (norm2x * norm2y).sqrt()
}

/// Cosine distance `1 - <x,y> / (|x||y|)`.
#[inline]
#[must_use]
pub fn cosine<T: Scalar>(x: &[T], y: &[T]) -> T {
    let mut dot = T::zero();
    let mut norm2x = T::zero();
    let mut norm2y = T::zero();
    for (&a, &b) in x.iter().zip(y) {
        dot = dot + a * b;
        norm2x = norm2x + a * a;
        norm2y = norm2y + b * b;
    }
    angular(norm2x, norm2y, dot)
}

/// Log-scaled angular distance `log2((|x||y|) / <x,y>)`; the type's
/// maximum stands in where the ratio is undefined or non-positive.
#[inline]
#[must_use]
pub fn alternative_cosine<T: Scalar>(x: &[T], y: &[T]) -> T {
    let mut dot = T::zero();
    let mut norm2x = T::zero();
    let mut norm2y = T::zero();
    for (&a, &b) in x.iter().zip(y) {
        dot = dot + a * b;
        norm2x = norm2x + a * a;
        norm2y = norm2y + b * b;
    }
    let zero = T::zero();
    if norm2x == zero && norm2y == zero {
        return zero;
    }
    if norm2x == zero || norm2y == zero || dot <= zero {
        return T::max_value();
    }
    ((norm2x * norm2y).sqrt() / dot).log2()
}

/// Cosine distance on mean-centered inputs.
#[must_use]
pub fn correlation<T: Scalar>(x: &[T], y: &[T]) -> T {
    let n = T::from_usize(x.len()).unwrap_or_else(T::one);
    let mut mux = T::zero();
    let mut muy = T::zero();
    for (&a, &b) in x.iter().zip(y) {
        mux = mux + a;
        muy = muy + b;
    }
    mux = mux / n;
    muy = muy / n;

    let mut dot = T::zero();
    let mut norm2x = T::zero();
    let mut norm2y = T::zero();
    for (&a, &b) in x.iter().zip(y) {
        let a = a - mux;
        let b = b - muy;
        dot = dot + a * b;
        norm2x = norm2x + a * a;
        norm2y = norm2y + b * b;
    }
    angular(norm2x, norm2y, dot)
}

/// Negative inner product clamped at zero: `max(1 - <x,y>, 0)`.
#[inline]
#[must_use]
pub fn inner_product<T: Scalar>(x: &[T], y: &[T]) -> T {
    let dot = x.iter().zip(y).fold(T::zero(), |acc, (&a, &b)| acc + a * b);
    (T::one() - dot).max(T::zero())
}

// Preprocessing passes, applied once over a flat row-major matrix before a
// distance functor is constructed.

const MIN_NORM: f64 = 1e-30;

/// Scale every row to unit length (rows of zero norm are left near zero).
pub fn normalize<T: Scalar>(data: &mut [T], ndim: usize) {
    let min_norm = T::from_f64(MIN_NORM).unwrap_or_else(T::epsilon);
    for row in data.chunks_mut(ndim) {
        let norm2 = row.iter().fold(T::zero(), |acc, &v| acc + v * v);
        let norm = norm2.sqrt() + min_norm;
        for v in row {
            *v = *v / norm;
        }
    }
}

/// Subtract each row's mean from its components.
pub fn mean_center<T: Scalar>(data: &mut [T], ndim: usize) {
    let n = T::from_usize(ndim).unwrap_or_else(T::one);
    for row in data.chunks_mut(ndim) {
        let mu = row.iter().fold(T::zero(), |acc, &v| acc + v) / n;
        for v in row {
            *v = *v - mu;
        }
    }
}

/// Mean-center, then normalize.
pub fn normalize_center<T: Scalar>(data: &mut [T], ndim: usize) {
    mean_center(data, ndim);
    normalize(data, ndim);
}

/// Tagged dense kernel; resolved once at distance construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DenseKernel {
    L2Sqr,
    Euclidean,
    Manhattan,
    Hamming,
    Cosine,
    AlternativeCosine,
    InnerProduct,
}

impl DenseKernel {
    #[inline]
    pub(crate) fn eval<T: Scalar>(self, x: &[T], y: &[T]) -> T {
        match self {
            DenseKernel::L2Sqr => l2sqr(x, y),
            DenseKernel::Euclidean => euclidean(x, y),
            DenseKernel::Manhattan => manhattan(x, y),
            DenseKernel::Hamming => hamming(x, y),
            DenseKernel::Cosine => cosine(x, y),
            DenseKernel::AlternativeCosine => alternative_cosine(x, y),
            DenseKernel::InnerProduct => inner_product(x, y),
        }
    }
}

/// Self-distance over one dense matrix; owns the (possibly preprocessed)
/// data copy.
pub(crate) struct DenseSelf<T> {
    data: Vec<T>,
    ndim: usize,
    n: usize,
    kernel: DenseKernel,
}

impl<T: Scalar> DenseSelf<T> {
    pub(crate) fn new(data: Vec<T>, ndim: usize, kernel: DenseKernel) -> Self {
        let n = data.len() / ndim;
        Self {
            data,
            ndim,
            n,
            kernel,
        }
    }

    #[inline]
    fn row(&self, i: u32) -> &[T] {
        let at = i as usize * self.ndim;
        &self.data[at..at + self.ndim]
    }
}

impl<T: Scalar> Distance<T> for DenseSelf<T> {
    #[inline]
    fn distance(&self, i: u32, j: u32) -> T {
        self.kernel.eval(self.row(i), self.row(j))
    }

    fn nx(&self) -> usize {
        self.n
    }

    fn ny(&self) -> usize {
        self.n
    }
}

/// Query-to-reference distance over two dense matrices sharing `ndim`.
pub(crate) struct DenseQuery<T> {
    x: Vec<T>,
    y: Vec<T>,
    ndim: usize,
    nx: usize,
    ny: usize,
    kernel: DenseKernel,
}

impl<T: Scalar> DenseQuery<T> {
    pub(crate) fn new(x: Vec<T>, y: Vec<T>, ndim: usize, kernel: DenseKernel) -> Self {
        let nx = x.len() / ndim;
        let ny = y.len() / ndim;
        Self {
            x,
            y,
            ndim,
            nx,
            ny,
            kernel,
        }
    }
}

impl<T: Scalar> Distance<T> for DenseQuery<T> {
    #[inline]
    fn distance(&self, i: u32, j: u32) -> T {
        let xi = i as usize * self.ndim;
        let yj = j as usize * self.ndim;
        self.kernel.eval(
            &self.x[xi..xi + self.ndim],
            &self.y[yj..yj + self.ndim],
        )
    }

    fn nx(&self) -> usize {
        self.nx
    }

    fn ny(&self) -> usize {
        self.ny
    }
}

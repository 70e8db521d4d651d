//! Bit-packed Hamming distance.
//!
//! Binary vectors are packed into 64-bit blocks so a distance is a handful
//! of XOR + popcount instructions instead of a per-component loop. `ndim`
//! bits round up to whole blocks; tail bits beyond `ndim` are zero by
//! construction, so they never contribute to a count.

use crate::dist::Distance;
use crate::error::{DescentError, Result};
use crate::Scalar;

const BLOCK_BITS: usize = u64::BITS as usize;

/// Row-major table of bit-packed binary vectors.
#[derive(Debug, Clone)]
pub struct BitTable {
    blocks: Vec<u64>,
    words_per_row: usize,
    n_rows: usize,
}

impl BitTable {
    /// Pack a flat row-major matrix, treating nonzero components as set
    /// bits.
    pub fn from_dense<T: Scalar>(data: &[T], ndim: usize) -> Result<Self> {
        if ndim == 0 || data.len() % ndim != 0 {
            return Err(DescentError::InvalidShape(format!(
                "binary matrix of {} entries does not factor into {} columns",
                data.len(),
                ndim
            )));
        }
        let n_rows = data.len() / ndim;
        let words_per_row = ndim.div_ceil(BLOCK_BITS);
        let mut blocks = vec![0u64; n_rows * words_per_row];
        for (row, chunk) in data.chunks(ndim).enumerate() {
            let base = row * words_per_row;
            for (d, &v) in chunk.iter().enumerate() {
                if v != T::zero() {
                    blocks[base + d / BLOCK_BITS] |= 1u64 << (d % BLOCK_BITS);
                }
            }
        }
        Ok(Self {
            blocks,
            words_per_row,
            n_rows,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[inline]
    fn row(&self, i: u32) -> &[u64] {
        let at = i as usize * self.words_per_row;
        &self.blocks[at..at + self.words_per_row]
    }
}

/// Popcount of the XOR of two packed rows.
#[inline]
#[must_use]
pub fn bit_hamming(x: &[u64], y: &[u64]) -> u32 {
    x.iter().zip(y).map(|(&a, &b)| (a ^ b).count_ones()).sum()
}

pub(crate) struct BinarySelf {
    bits: BitTable,
}

impl BinarySelf {
    pub(crate) fn new(bits: BitTable) -> Self {
        Self { bits }
    }
}

impl<T: Scalar> Distance<T> for BinarySelf {
    #[inline]
    fn distance(&self, i: u32, j: u32) -> T {
        T::from_u32(bit_hamming(self.bits.row(i), self.bits.row(j))).unwrap_or_else(T::zero)
    }

    fn nx(&self) -> usize {
        self.bits.n_rows()
    }

    fn ny(&self) -> usize {
        self.bits.n_rows()
    }
}

pub(crate) struct BinaryQuery {
    x: BitTable,
    y: BitTable,
}

impl BinaryQuery {
    pub(crate) fn new(x: BitTable, y: BitTable) -> Self {
        Self { x, y }
    }
}

impl<T: Scalar> Distance<T> for BinaryQuery {
    #[inline]
    fn distance(&self, i: u32, j: u32) -> T {
        T::from_u32(bit_hamming(self.x.row(i), self.y.row(j))).unwrap_or_else(T::zero)
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
    use crate::dist::dense::hamming;

    #[test]
    fn packed_hamming_matches_elementwise() {
        let data = vec![
            0.0_f32, 0.0, 0.0, 0.0, //
            1.0, 1.0, 1.0, 1.0, //
            0.0, 0.0, 0.0, 1.0, //
            1.0, 1.0, 1.0, 0.0,
        ];
        let bits = BitTable::from_dense(&data, 4).unwrap();
        let d = BinarySelf::new(bits);
        for i in 0..4u32 {
            for j in 0..4u32 {
                let xi = i as usize * 4;
                let yj = j as usize * 4;
                let dense: f32 = hamming(&data[xi..xi + 4], &data[yj..yj + 4]);
                let packed: f32 = d.distance(i, j);
                assert_eq!(packed, dense, "mismatch at ({i}, {j})");
            }
        }
    }

    #[test]
    fn wide_rows_span_multiple_blocks() {
        let ndim = 130;
        let mut a = vec![0.0_f32; ndim];
        let mut b = vec![0.0_f32; ndim];
        a[0] = 1.0;
        a[64] = 1.0;
        a[129] = 1.0;
        b[129] = 1.0;
        let mut data = a.clone();
        data.extend_from_slice(&b);
        let bits = BitTable::from_dense(&data, ndim).unwrap();
        let d = BinarySelf::new(bits);
        let dist: f32 = d.distance(0, 1);
        assert_eq!(dist, 2.0);
    }

    #[test]
    fn rejects_ragged_matrix() {
        let bad = BitTable::from_dense(&[1.0_f32, 0.0, 1.0], 2);
        assert!(matches!(bad, Err(DescentError::InvalidShape(_))));
    }
}

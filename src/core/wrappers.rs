//! Vector kernels and trait wrappers for plain `Vec<T>` storage.
//!
//! This module provides the inner product and norm used by the Krylov kernels, and the
//! small set of vector operations the block preconditioners chain together during
//! `apply` and `setup`: axpy, scaling, reciprocal and absolute value.
//!
//! # Features
//! - Inner product and norm for vectors, with optional Rayon parallelism.
//! - In-place BLAS-1 style updates on slices.

use crate::core::traits::InnerProduct;
use num_traits::Float;

/// Implements inner product and norm for vectors, with optional Rayon parallelism.
///
/// If the `rayon` feature is enabled, uses parallel iterators for performance.
impl<T: Float + From<f64> + Send + Sync> InnerProduct<Vec<T>> for () {
    type Scalar = T;
    /// Computes the dot product of two vectors: `x^T y`.
    fn dot(&self, x: &Vec<T>, y: &Vec<T>) -> T {
        assert_eq!(x.len(), y.len(), "Vectors must have the same length");
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            x.as_slice()
                .par_iter()
                .zip(y.as_slice().par_iter())
                .map(|(xi, yi)| *xi * *yi)
                .reduce(|| T::zero(), |acc, v| acc + v)
        }
        #[cfg(not(feature = "rayon"))]
        {
            x.iter()
                .zip(y.iter())
                .map(|(xi, yi)| *xi * *yi)
                .fold(T::zero(), |acc, v| acc + v)
        }
    }
    /// Computes the Euclidean norm of a vector: `||x||_2`.
    fn norm(&self, x: &Vec<T>) -> T {
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            x.as_slice()
                .par_iter()
                .map(|xi| *xi * *xi)
                .reduce(|| T::zero(), |acc, v| acc + v)
                .sqrt()
        }
        #[cfg(not(feature = "rayon"))]
        {
            x.iter()
                .map(|xi| *xi * *xi)
                .fold(T::zero(), |acc, v| acc + v)
                .sqrt()
        }
    }
}

/// y ← y + alpha · x
pub fn axpy<T: Float>(alpha: T, x: &[T], y: &mut [T]) {
    assert_eq!(x.len(), y.len(), "axpy: length mismatch");
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi = *yi + alpha * xi;
    }
}

/// x ← alpha · x
pub fn scale<T: Float>(alpha: T, x: &mut [T]) {
    x.iter_mut().for_each(|xi| *xi = alpha * *xi);
}

/// x ← 1 / x, entrywise. Zero entries become infinite.
pub fn reciprocal<T: Float>(x: &mut [T]) {
    x.iter_mut().for_each(|xi| *xi = T::one() / *xi);
}

/// x ← |x|, entrywise.
pub fn abs<T: Float>(x: &mut [T]) {
    x.iter_mut().for_each(|xi| *xi = xi.abs());
}

/// True if every entry is finite.
pub fn all_finite<T: Float>(x: &[T]) -> bool {
    x.iter().all(|xi| xi.is_finite())
}

//! Matrix module: sparse storage and the block partition of its unknowns.

pub mod partition;
pub mod sparse;

pub use partition::{FieldPartition, IndexSet};
pub use sparse::CsrMatrix;

/// A read‐only sparse matrix supporting y = A * x.
pub trait SparseMatrix<T> {
    /// Number of rows.
    fn nrows(&self) -> usize;
    /// Number of columns.
    fn ncols(&self) -> usize;
    /// Compute y = A * x.  `x.len() == ncols()`, `y.len() == nrows()`.
    fn spmv(&self, x: &[T], y: &mut [T]);
}

//! Core linear-algebra traits for kryst-block.

/// Matrix–vector product: y ← A x.
pub trait MatVec<V> {
    /// Compute y = A · x.
    fn matvec(&self, x: &V, y: &mut V);
}

/// Inner products & norms.
pub trait InnerProduct<V> {
    /// Associated scalar type.
    type Scalar: Copy + PartialOrd + From<f64>;
    /// Compute dot(x, y).
    fn dot(&self, x: &V, y: &V) -> Self::Scalar;
    /// Compute ‖x‖₂.
    fn norm(&self, x: &V) -> Self::Scalar;
}

/// Extraction of the submatrix selected by a row and a column index list.
pub trait SubmatrixExtract: Sized {
    type Error;
    /// Rows `rows[i]` and columns `cols[j]` of `self`, in the given order.
    fn submatrix(&self, rows: &[usize], cols: &[usize]) -> Result<Self, Self::Error>;
}

//! Compressed-sparse-row matrix on top of Faer.
//!
//! `CsrMatrix` wraps `faer::sparse::SparseRowMat<usize, f64>` and adds the narrow set of
//! operations the block preconditioners need: submatrix extraction by row/column index
//! lists, sparse-sparse product, pattern-union axpy, row scaling, diagonal and row-sum
//! extraction. Structural entries are never dropped, so a product chain evaluated on
//! operators with a stable pattern yields results with a stable pattern too.

use super::SparseMatrix;
use crate::core::traits::{MatVec, SubmatrixExtract};
use crate::error::KError;
use faer::Mat;
use faer::sparse::{SparseColMat, SparseRowMat, SymbolicSparseColMat, SymbolicSparseRowMat};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

#[derive(Clone, Debug)]
pub struct CsrMatrix {
    inner: SparseRowMat<usize, f64>,
}

impl CsrMatrix {
    /// Build a CSR from raw row‐ptr, col‐idx, and values.
    ///
    /// Column indices must be sorted and unique within each row.
    pub fn from_csr(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<f64>,
    ) -> Self {
        // second argument `None` means “no separate row_nnz”
        let symbolic = SymbolicSparseRowMat::new_checked(nrows, ncols, row_ptr, None, col_idx);
        let inner = SparseRowMat::new(symbolic, values);
        Self { inner }
    }

    /// Build from per-row `(col, value)` lists. Entries are sorted and duplicates summed.
    pub fn from_rows(
        nrows: usize,
        ncols: usize,
        mut rows: Vec<Vec<(usize, f64)>>,
    ) -> Result<Self, KError> {
        if rows.len() != nrows {
            return Err(KError::DimensionMismatch {
                expected: nrows,
                found: rows.len(),
            });
        }
        let mut row_ptr = Vec::with_capacity(nrows + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);
        for row in rows.iter_mut() {
            row.sort_unstable_by_key(|&(j, _)| j);
            let mut last: Option<usize> = None;
            for &(j, v) in row.iter() {
                if j >= ncols {
                    return Err(KError::SparseCreation(format!(
                        "column {} out of bounds for {} columns",
                        j, ncols
                    )));
                }
                if last == Some(j) {
                    if let Some(acc) = values.last_mut() {
                        *acc += v;
                    }
                } else {
                    col_idx.push(j);
                    values.push(v);
                    last = Some(j);
                }
            }
            row_ptr.push(col_idx.len());
        }
        Ok(Self::from_csr(nrows, ncols, row_ptr, col_idx, values))
    }

    /// Build from `(row, col, value)` triplets; duplicates are summed.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> Result<Self, KError> {
        let mut rows = vec![Vec::new(); nrows];
        for &(i, j, v) in triplets {
            if i >= nrows {
                return Err(KError::SparseCreation(format!(
                    "row {} out of bounds for {} rows",
                    i, nrows
                )));
            }
            rows[i].push((j, v));
        }
        Self::from_rows(nrows, ncols, rows)
    }

    /// Sparse copy of a dense function, keeping only nonzero entries.
    pub fn from_fn(nrows: usize, ncols: usize, f: impl Fn(usize, usize) -> f64) -> Self {
        let mut row_ptr = vec![0; nrows + 1];
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        for i in 0..nrows {
            for j in 0..ncols {
                let v = f(i, j);
                if v != 0.0 {
                    col_idx.push(j);
                    values.push(v);
                }
            }
            row_ptr[i + 1] = col_idx.len();
        }
        Self::from_csr(nrows, ncols, row_ptr, col_idx, values)
    }

    /// Diagonal matrix with the given entries (zeros are stored structurally).
    pub fn from_diagonal(d: &[f64]) -> Self {
        let n = d.len();
        Self::from_csr(n, n, (0..=n).collect(), (0..n).collect(), d.to_vec())
    }

    pub fn identity(n: usize) -> Self {
        Self::from_diagonal(&vec![1.0; n])
    }

    /// Matrix with no stored entries.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self::from_csr(nrows, ncols, vec![0; nrows + 1], Vec::new(), Vec::new())
    }

    pub fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    /// Column indices and values stored in row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        (
            self.inner.symbolic().col_idx_of_row_raw(i),
            self.inner.val_of_row(i),
        )
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        (0..self.nrows()).map(|i| self.row(i).0.len()).sum()
    }

    /// Entry (i, j), zero when not stored.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (cols, vals) = self.row(i);
        match cols.binary_search(&j) {
            Ok(k) => vals[k],
            Err(_) => 0.0,
        }
    }

    /// Main diagonal (length `min(nrows, ncols)`).
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.nrows().min(self.ncols()))
            .map(|i| self.get(i, i))
            .collect()
    }

    /// Signed row sums.
    pub fn row_sums(&self) -> Vec<f64> {
        (0..self.nrows())
            .map(|i| self.row(i).1.iter().sum())
            .collect()
    }

    /// y ← y + alpha · A x
    pub fn spmv_add(&self, alpha: f64, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.ncols(), "spmv_add: input vector x has incorrect length");
        assert_eq!(y.len(), self.nrows(), "spmv_add: output vector y has incorrect length");
        #[cfg(feature = "rayon")]
        {
            y.par_iter_mut().enumerate().for_each(|(i, yi)| {
                *yi += alpha * self.row_dot(i, x);
            });
        }
        #[cfg(not(feature = "rayon"))]
        {
            for (i, yi) in y.iter_mut().enumerate() {
                *yi += alpha * self.row_dot(i, x);
            }
        }
    }

    fn row_dot(&self, i: usize, x: &[f64]) -> f64 {
        let (cols, vals) = self.row(i);
        cols.iter().zip(vals).map(|(&j, &v)| v * x[j]).sum()
    }

    /// diag(d) · A, same pattern as `self`.
    pub fn scale_rows(&self, d: &[f64]) -> Self {
        assert_eq!(d.len(), self.nrows(), "scale_rows: scaling vector has incorrect length");
        let mut row_ptr = Vec::with_capacity(self.nrows() + 1);
        let mut col_idx = Vec::with_capacity(self.nnz());
        let mut values = Vec::with_capacity(self.nnz());
        row_ptr.push(0);
        for (i, &di) in d.iter().enumerate() {
            let (cols, vals) = self.row(i);
            col_idx.extend_from_slice(cols);
            values.extend(vals.iter().map(|&v| di * v));
            row_ptr.push(col_idx.len());
        }
        Self::from_csr(self.nrows(), self.ncols(), row_ptr, col_idx, values)
    }

    /// alpha · A, same pattern as `self`.
    pub fn scaled(&self, alpha: f64) -> Self {
        self.scale_rows(&vec![alpha; self.nrows()])
    }

    /// A · B (row-by-row accumulation). Structural zeros are kept.
    pub fn matmul(&self, rhs: &CsrMatrix) -> Result<Self, KError> {
        if self.ncols() != rhs.nrows() {
            return Err(KError::DimensionMismatch {
                expected: self.ncols(),
                found: rhs.nrows(),
            });
        }
        let n = rhs.ncols();
        let mut marker = vec![usize::MAX; n];
        let mut acc = vec![0.0; n];
        let mut row_ptr = Vec::with_capacity(self.nrows() + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);
        for i in 0..self.nrows() {
            let start = col_idx.len();
            let (a_cols, a_vals) = self.row(i);
            for (&k, &a_ik) in a_cols.iter().zip(a_vals) {
                let (b_cols, b_vals) = rhs.row(k);
                for (&j, &b_kj) in b_cols.iter().zip(b_vals) {
                    if marker[j] != i {
                        marker[j] = i;
                        acc[j] = 0.0;
                        col_idx.push(j);
                    }
                    acc[j] += a_ik * b_kj;
                }
            }
            col_idx[start..].sort_unstable();
            values.extend(col_idx[start..].iter().map(|&j| acc[j]));
            row_ptr.push(col_idx.len());
        }
        Ok(Self::from_csr(self.nrows(), n, row_ptr, col_idx, values))
    }

    /// A + alpha · B over the union of both patterns.
    pub fn add(&self, alpha: f64, rhs: &CsrMatrix) -> Result<Self, KError> {
        if self.nrows() != rhs.nrows() || self.ncols() != rhs.ncols() {
            return Err(KError::DimensionMismatch {
                expected: self.nrows() * self.ncols(),
                found: rhs.nrows() * rhs.ncols(),
            });
        }
        let mut row_ptr = Vec::with_capacity(self.nrows() + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);
        for i in 0..self.nrows() {
            let (ac, av) = self.row(i);
            let (bc, bv) = rhs.row(i);
            let (mut p, mut q) = (0, 0);
            while p < ac.len() || q < bc.len() {
                let take_a = q == bc.len() || (p < ac.len() && ac[p] <= bc[q]);
                let take_b = p == ac.len() || (q < bc.len() && bc[q] <= ac[p]);
                match (take_a, take_b) {
                    (true, true) => {
                        col_idx.push(ac[p]);
                        values.push(av[p] + alpha * bv[q]);
                        p += 1;
                        q += 1;
                    }
                    (true, false) => {
                        col_idx.push(ac[p]);
                        values.push(av[p]);
                        p += 1;
                    }
                    _ => {
                        col_idx.push(bc[q]);
                        values.push(alpha * bv[q]);
                        q += 1;
                    }
                }
            }
            row_ptr.push(col_idx.len());
        }
        Ok(Self::from_csr(self.nrows(), self.ncols(), row_ptr, col_idx, values))
    }

    /// Aᵀ
    pub fn transpose(&self) -> Self {
        let mut rows = vec![Vec::new(); self.ncols()];
        for i in 0..self.nrows() {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                rows[j].push((i, v));
            }
        }
        // rows are filled in increasing `i`, hence already sorted
        let mut row_ptr = Vec::with_capacity(self.ncols() + 1);
        let mut col_idx = Vec::with_capacity(self.nnz());
        let mut values = Vec::with_capacity(self.nnz());
        row_ptr.push(0);
        for row in rows {
            for (i, v) in row {
                col_idx.push(i);
                values.push(v);
            }
            row_ptr.push(col_idx.len());
        }
        Self::from_csr(self.ncols(), self.nrows(), row_ptr, col_idx, values)
    }

    /// Dense copy.
    pub fn to_dense(&self) -> Mat<f64> {
        let mut dense = Mat::<f64>::zeros(self.nrows(), self.ncols());
        for i in 0..self.nrows() {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                dense[(i, j)] = v;
            }
        }
        dense
    }

    /// Compressed-column copy, the layout Faer's sparse factorizations take.
    pub fn to_csc(&self) -> SparseColMat<usize, f64> {
        let (nrows, ncols) = (self.nrows(), self.ncols());
        let mut col_ptr = vec![0usize; ncols + 1];
        for i in 0..nrows {
            for &j in self.row(i).0 {
                col_ptr[j + 1] += 1;
            }
        }
        for j in 0..ncols {
            col_ptr[j + 1] += col_ptr[j];
        }
        let nnz = col_ptr[ncols];
        let mut next = col_ptr[..ncols].to_vec();
        let mut row_idx = vec![0usize; nnz];
        let mut values = vec![0.0; nnz];
        // rows are visited in increasing order, so each column comes out sorted
        for i in 0..nrows {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                row_idx[next[j]] = i;
                values[next[j]] = v;
                next[j] += 1;
            }
        }
        let symbolic = SymbolicSparseColMat::new_checked(nrows, ncols, col_ptr, None, row_idx);
        SparseColMat::new(symbolic, values)
    }

    /// True if both matrices have identical shape and stored pattern.
    pub fn same_pattern(&self, other: &CsrMatrix) -> bool {
        self.nrows() == other.nrows()
            && self.ncols() == other.ncols()
            && (0..self.nrows()).all(|i| self.row(i).0 == other.row(i).0)
    }

    pub fn is_finite(&self) -> bool {
        (0..self.nrows()).all(|i| self.row(i).1.iter().all(|v| v.is_finite()))
    }
}

impl SparseMatrix<f64> for CsrMatrix {
    fn nrows(&self) -> usize {
        self.inner.nrows()
    }
    fn ncols(&self) -> usize {
        self.inner.ncols()
    }
    fn spmv(&self, x: &[f64], y: &mut [f64]) {
        y.iter_mut().for_each(|yi| *yi = 0.0);
        self.spmv_add(1.0, x, y);
    }
}

impl MatVec<Vec<f64>> for CsrMatrix {
    fn matvec(&self, x: &Vec<f64>, y: &mut Vec<f64>) {
        SparseMatrix::spmv(self, x, y);
    }
}

impl SubmatrixExtract for CsrMatrix {
    type Error = KError;

    fn submatrix(&self, rows: &[usize], cols: &[usize]) -> Result<Self, KError> {
        let mut local_col = vec![usize::MAX; self.ncols()];
        for (jj, &j) in cols.iter().enumerate() {
            if j >= self.ncols() {
                return Err(KError::DimensionMismatch {
                    expected: self.ncols(),
                    found: j + 1,
                });
            }
            local_col[j] = jj;
        }
        let mut out_rows = Vec::with_capacity(rows.len());
        for &i in rows {
            if i >= self.nrows() {
                return Err(KError::DimensionMismatch {
                    expected: self.nrows(),
                    found: i + 1,
                });
            }
            let (rc, rv) = self.row(i);
            out_rows.push(
                rc.iter()
                    .zip(rv)
                    .filter(|&(&j, _)| local_col[j] != usize::MAX)
                    .map(|(&j, &v)| (local_col[j], v))
                    .collect(),
            );
        }
        Self::from_rows(rows.len(), cols.len(), out_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CsrMatrix {
        // [[1,2,0],[0,3,4],[5,0,6]]
        CsrMatrix::from_csr(
            3,
            3,
            vec![0, 2, 4, 6],
            vec![0, 1, 1, 2, 0, 2],
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        )
    }

    #[test]
    fn identity_spmv() {
        let m = CsrMatrix::identity(3);
        let x = vec![2.0, 3.0, 5.0];
        let mut y = vec![0.0; 3];
        m.spmv(&x, &mut y);
        assert_eq!(y, x);
    }

    #[test]
    fn simple_pattern() {
        // 2×3 matrix [[1,2,0],[0,3,4]]
        let m = CsrMatrix::from_csr(2, 3, vec![0, 2, 4], vec![0, 1, 1, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let x = vec![1.0, 1.0, 1.0];
        let mut y = vec![0.0; 2];
        m.spmv(&x, &mut y);
        assert_eq!(y, vec![3.0, 7.0]);
    }

    #[test]
    fn diagonal_and_row_sums() {
        let m = sample();
        assert_eq!(m.diagonal(), vec![1.0, 3.0, 6.0]);
        assert_eq!(m.row_sums(), vec![3.0, 7.0, 11.0]);
        assert_eq!(m.nnz(), 6);
    }

    #[test]
    fn submatrix_follows_index_order() {
        let m = sample();
        let sub = m.submatrix(&[2, 0], &[2, 0]).unwrap();
        // rows/cols (2,0): [[6,5],[0,1]]
        assert_eq!(sub.get(0, 0), 6.0);
        assert_eq!(sub.get(0, 1), 5.0);
        assert_eq!(sub.get(1, 0), 0.0);
        assert_eq!(sub.get(1, 1), 1.0);
        let rect = m.submatrix(&[0, 1], &[2]).unwrap();
        assert_eq!((rect.nrows(), rect.ncols()), (2, 1));
        assert_eq!(rect.get(1, 0), 4.0);
    }

    #[test]
    fn matmul_and_add_match_dense() {
        let a = sample();
        let b = a.transpose();
        let ab = a.matmul(&b).unwrap();
        let dense = &a.to_dense() * &b.to_dense();
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(ab.get(i, j), dense[(i, j)]);
            }
        }
        let c = a.add(-2.0, &CsrMatrix::identity(3)).unwrap();
        assert_eq!(c.get(0, 0), -1.0);
        assert_eq!(c.get(1, 0), 0.0);
        assert_eq!(c.get(2, 2), 4.0);
    }

    #[test]
    fn csc_copy_keeps_entries() {
        let a = sample();
        let csc = a.to_csc();
        assert_eq!((csc.nrows(), csc.ncols()), (3, 3));
        let dense = a.to_dense();
        for j in 0..3 {
            let rows = csc.symbolic().row_idx_of_col_raw(j);
            for (&i, &v) in rows.iter().zip(csc.val_of_col(j)) {
                assert_eq!(v, dense[(i, j)]);
            }
            assert!(rows.windows(2).all(|w| w[0] < w[1]));
        }
        let stored: usize = (0..3).map(|j| csc.val_of_col(j).len()).sum();
        assert_eq!(stored, a.nnz());
    }

    #[test]
    fn scale_rows_keeps_pattern() {
        let a = sample();
        let s = a.scale_rows(&[1.0, 0.0, 2.0]);
        assert!(s.same_pattern(&a));
        assert_eq!(s.get(1, 1), 0.0);
        assert_eq!(s.get(2, 0), 10.0);
    }

    #[test]
    fn duplicate_triplets_are_summed() {
        let m = CsrMatrix::from_triplets(2, 2, &[(0, 1, 1.0), (0, 1, 2.5), (1, 0, -1.0)]).unwrap();
        assert_eq!(m.get(0, 1), 3.5);
        assert_eq!(m.nnz(), 2);
        assert!(CsrMatrix::from_triplets(2, 2, &[(0, 2, 1.0)]).is_err());
    }
}

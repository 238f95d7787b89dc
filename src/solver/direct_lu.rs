//! Direct solver for sparse blocks: sparse LU with partial pivoting via Faer.
//!
//! The symbolic analysis (fill-reducing ordering, elimination structure) is kept across
//! `factor` calls and reused while the sparsity pattern stays the same, so re-binding a field
//! block after a setup on an operator with a fixed pattern only redoes the numeric phase.
//!
//! # References
//! - Faer documentation: https://github.com/sarah-ek/faer-rs
//! - Davis, T. A. (2006). Direct Methods for Sparse Linear Systems. SIAM.

use crate::error::KError;
use crate::matrix::CsrMatrix;
use crate::preconditioner::Preconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::SolveStats;
use faer::Mat;
use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers::{Lu, SymbolicLu};

/// Row pointers and column indices of the last factored matrix.
#[derive(Debug, PartialEq)]
struct Pattern {
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
}

impl Pattern {
    fn of(a: &CsrMatrix) -> Self {
        let mut row_ptr = Vec::with_capacity(a.nrows() + 1);
        let mut col_idx = Vec::with_capacity(a.nnz());
        row_ptr.push(0);
        for i in 0..a.nrows() {
            col_idx.extend_from_slice(a.row(i).0);
            row_ptr.push(col_idx.len());
        }
        Self { row_ptr, col_idx }
    }
}

/// Sparse LU solver from Faer.
///
/// Stores the symbolic and numeric factorizations for reuse.
#[derive(Default)]
pub struct LuSolver {
    symbolic: Option<(Pattern, SymbolicLu<usize>)>,
    /// Cached numeric factorization (if computed)
    factor: Option<Lu<usize, f64>>,
    symbolic_builds: usize,
}

impl LuSolver {
    /// Create a new LU solver (no factorization yet).
    pub fn new() -> Self {
        Self::default()
    }

    /// Factor `a`, replacing any previous factorization.
    ///
    /// The symbolic analysis is recomputed only when the pattern of `a` differs from the
    /// previously factored matrix.
    pub fn factor(&mut self, a: &CsrMatrix) -> Result<(), KError> {
        if a.nrows() != a.ncols() {
            return Err(KError::FactorError(format!(
                "LU requires a square matrix, got {}x{}",
                a.nrows(),
                a.ncols()
            )));
        }
        self.factor = None;
        let csc = a.to_csc();
        let pattern = Pattern::of(a);
        let symbolic = match &self.symbolic {
            Some((p, sym)) if *p == pattern => sym.clone(),
            _ => {
                let sym = SymbolicLu::try_new(csc.symbolic())
                    .map_err(|e| KError::FactorError(format!("symbolic LU failed: {:?}", e)))?;
                self.symbolic_builds += 1;
                self.symbolic = Some((pattern, sym.clone()));
                sym
            }
        };
        let lu = Lu::try_new_with_symbolic(symbolic, csc.as_ref())
            .map_err(|e| KError::FactorError(format!("numeric LU failed: {:?}", e)))?;
        self.factor = Some(lu);
        Ok(())
    }

    /// Number of symbolic analyses run so far.
    pub fn symbolic_builds(&self) -> usize {
        self.symbolic_builds
    }

    /// Solve using the cached LU factorization.
    ///
    /// # Arguments
    /// * `b` - Right-hand side vector
    /// * `x` - Output vector (solution)
    pub fn solve_cached(&self, b: &[f64], x: &mut [f64]) -> Result<(), KError> {
        let factor = self.factor.as_ref().ok_or(KError::NotSetUp)?;
        let n = b.len();
        if x.len() != n {
            return Err(KError::DimensionMismatch {
                expected: n,
                found: x.len(),
            });
        }
        let rhs = Mat::from_fn(n, 1, |i, _| b[i]);
        let sol = factor.solve(&rhs);
        for (i, xi) in x.iter_mut().enumerate() {
            *xi = sol[(i, 0)];
        }
        Ok(())
    }
}

impl LinearSolver<CsrMatrix, Vec<f64>> for LuSolver {
    type Error = KError;
    type Scalar = f64;

    /// Factor `a` and solve; always converged in 1 iteration.
    fn solve(
        &mut self,
        a: &CsrMatrix,
        pc: Option<&dyn Preconditioner<CsrMatrix, Vec<f64>>>,
        b: &Vec<f64>,
        x: &mut Vec<f64>,
    ) -> Result<SolveStats<f64>, KError> {
        let _ = pc; // Direct solvers do not use preconditioner
        self.factor(a)?;
        self.solve_cached(b, x)?;
        Ok(SolveStats {
            iterations: 1,
            final_residual: 0.0,
            converged: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lu_solver_solves_sparse_system() {
        // 3x3 system: [[2,1,1],[1,3,2],[1,0,0]] x = [4,5,6]
        // True solution: [6,15,-23]
        let a = CsrMatrix::from_fn(3, 3, |i, j| match (i, j) {
            (0, 0) => 2.0,
            (0, 1) => 1.0,
            (0, 2) => 1.0,
            (1, 0) => 1.0,
            (1, 1) => 3.0,
            (1, 2) => 2.0,
            (2, 0) => 1.0,
            _ => 0.0,
        });
        let b = vec![4.0, 5.0, 6.0];
        let mut x = vec![0.0; 3];
        let mut solver = LuSolver::new();
        let stats = solver.solve(&a, None, &b, &mut x).unwrap();
        let expected = [6.0, 15.0, -23.0];
        for (xi, ei) in x.iter().zip(expected.iter()) {
            assert!((xi - ei).abs() < 1e-10, "xi = {}, expected = {}", xi, ei);
        }
        assert!(stats.converged);
    }

    #[test]
    fn solve_before_factor_is_an_error() {
        let solver = LuSolver::new();
        let mut x = vec![0.0; 2];
        assert_eq!(solver.solve_cached(&[1.0, 2.0], &mut x), Err(KError::NotSetUp));
    }

    fn tridiagonal(n: usize, diag: f64) -> CsrMatrix {
        let mut triplets = Vec::with_capacity(3 * n);
        for i in 0..n {
            triplets.push((i, i, diag));
            if i + 1 < n {
                triplets.push((i, i + 1, -1.0));
                triplets.push((i + 1, i, -1.0));
            }
        }
        CsrMatrix::from_triplets(n, n, &triplets).unwrap()
    }

    #[test]
    fn large_tridiagonal_block_is_factored_sparsely() {
        let n = 50_000;
        let a = tridiagonal(n, 2.5);
        let mut solver = LuSolver::new();
        solver.factor(&a).unwrap();
        let b: Vec<f64> = (0..n).map(|i| ((i % 7) as f64) - 3.0).collect();
        let mut x = vec![0.0; n];
        solver.solve_cached(&b, &mut x).unwrap();
        let mut r = b.clone();
        a.spmv_add(-1.0, &x, &mut r);
        let rnorm = r.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!(rnorm < 1e-10, "residual {}", rnorm);
    }

    #[test]
    fn refactoring_same_pattern_reuses_symbolic_analysis() {
        let mut solver = LuSolver::new();
        solver.factor(&tridiagonal(40, 3.0)).unwrap();
        solver.factor(&tridiagonal(40, 4.0)).unwrap();
        assert_eq!(solver.symbolic_builds(), 1);

        let mut x = vec![0.0; 40];
        solver.solve_cached(&vec![2.0; 40], &mut x).unwrap();
        // interior rows of (4I - L) x = 2 with x ≈ 1 away from the ends
        assert!((x[20] - 1.0).abs() < 1e-10);

        solver.factor(&CsrMatrix::identity(40)).unwrap();
        assert_eq!(solver.symbolic_builds(), 2);
    }

    #[test]
    fn rectangular_block_is_rejected() {
        let mut solver = LuSolver::new();
        let a = CsrMatrix::zeros(2, 3);
        assert!(matches!(solver.factor(&a), Err(KError::FactorError(_))));
    }
}

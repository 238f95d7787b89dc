//! Flexible GMRES (FGMRES) solver (Saad §9.4)
//!
//! This module implements the Flexible Generalized Minimal Residual (FGMRES) algorithm for solving
//! large, sparse, and possibly nonsymmetric linear systems Ax = b. FGMRES extends GMRES by allowing
//! the preconditioner to change at each iteration, which is what makes it the outer method of
//! choice around block preconditioners whose field solves are themselves iterative.
//!
//! # Features
//! - Supports both classical and modified Gram-Schmidt orthogonalization.
//! - Allows for restart and custom monitoring.
//! - Tracks residual history and supports happy breakdown detection.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM. §9.4
//! - https://en.wikipedia.org/wiki/Generalized_minimal_residual_method

use crate::core::traits::{InnerProduct, MatVec};
use crate::error::KError;
use crate::preconditioner::{FlexiblePreconditioner, Preconditioner};
use crate::solver::gmres::{apply_givens_and_update_g, back_substitution, orthogonalize};
use crate::utils::convergence::{Convergence, SolveStats};
use num_traits::Float;

/// Orthogonalization method for Arnoldi process in FGMRES.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Orthog {
    Classical,
    Modified,
}

/// Flexible GMRES solver struct.
///
/// # Type Parameters
/// * `T` - Scalar type (e.g., f32, f64)
pub struct FgmresSolver<T> {
    /// Convergence criteria (tolerances and max iterations)
    pub conv: Convergence<T>,
    /// Restart parameter (number of Arnoldi vectors before restart)
    pub restart: usize,
    /// Orthogonalization method (classical or modified Gram-Schmidt)
    pub orthog: Orthog,
    /// Happy breakdown tolerance, relative to the current residual estimate
    pub haptol: T,
    /// Optional callback to monitor residuals during solve
    pub monitor: Option<Box<dyn FnMut(usize, T)>>,
    /// History of residual norms for each iteration
    pub residual_history: Vec<T>,
}

impl<T: Float + From<f64>> FgmresSolver<T> {
    /// Create a new FGMRES solver with given relative tolerance, max iterations, and restart.
    pub fn new(rtol: T, max_iters: usize, restart: usize) -> Self {
        Self {
            conv: Convergence::new(rtol, max_iters),
            restart: restart.max(1),
            orthog: Orthog::Modified,
            haptol: <T as From<f64>>::from(1e-12),
            monitor: None,
            residual_history: Vec::new(),
        }
    }
    /// Set the absolute residual floor.
    pub fn with_atol(mut self, atol: T) -> Self {
        self.conv = self.conv.with_atol(atol);
        self
    }
    /// Set the orthogonalization method.
    pub fn with_orthog(mut self, orthog: Orthog) -> Self {
        self.orthog = orthog;
        self
    }
    /// Set the happy breakdown tolerance.
    pub fn with_haptol(mut self, haptol: T) -> Self {
        self.haptol = haptol;
        self
    }
    /// Set a callback to monitor residuals during the solve.
    pub fn with_monitor<F>(mut self, f: F) -> Self
    where
        F: FnMut(usize, T) + 'static,
    {
        self.monitor = Some(Box::new(f));
        self
    }
    /// Clear the residual history.
    pub fn clear_history(&mut self) {
        self.residual_history.clear();
    }

    /// Flexible GMRES solve (Saad §9.4)
    ///
    /// # Arguments
    /// * `a` - Matrix implementing `MatVec`
    /// * `pc` - Optional flexible preconditioner (can change per iteration)
    /// * `b` - Right-hand side vector
    /// * `x` - On input: initial guess; on output: solution vector
    ///
    /// The monitored residual is the true residual `‖b - Ax‖`.
    pub fn solve_flex<M, V>(
        &mut self,
        a: &M,
        mut pc: Option<&mut dyn FlexiblePreconditioner<M, V>>,
        b: &V,
        x: &mut V,
    ) -> Result<SolveStats<T>, KError>
    where
        M: MatVec<V>,
        (): InnerProduct<V, Scalar = T>,
        V: From<Vec<T>> + AsRef<[T]> + AsMut<[T]> + Clone,
    {
        let n = b.as_ref().len();
        if x.as_ref().len() != n {
            return Err(KError::DimensionMismatch {
                expected: n,
                found: x.as_ref().len(),
            });
        }
        let ip = ();
        let restart = self.restart;
        let epsilon: T = <T as From<f64>>::from(1e-14);

        let residual = |x: &V| -> V {
            let mut r = b.clone();
            let mut tmp = V::from(vec![T::zero(); n]);
            a.matvec(x, &mut tmp);
            for (ri, ai) in r.as_mut().iter_mut().zip(tmp.as_ref()) {
                *ri = *ri - *ai;
            }
            r
        };

        let mut r = residual(x);
        let mut beta = ip.norm(&r);
        let res0 = beta;
        let mut total_iters = 0;
        let (stop, mut stats) = self.conv.check(beta, res0, total_iters);
        if stop {
            return Ok(stats);
        }

        while total_iters < self.conv.max_iters {
            let mut v_basis: Vec<V> = Vec::with_capacity(restart + 1);
            let mut z_basis: Vec<V> = Vec::with_capacity(restart);
            v_basis.push(V::from(r.as_ref().iter().map(|&ri| ri / beta).collect::<Vec<_>>()));
            let mut h = vec![vec![T::zero(); restart]; restart + 1];
            let mut s = vec![T::zero(); restart + 1];
            s[0] = beta;
            let mut cs = vec![T::zero(); restart];
            let mut sn = vec![T::zero(); restart];
            let mut arnoldi_steps = 0;

            for j in 0..restart {
                // z_j = M_j⁻¹ v_j
                let mut zj = v_basis[j].clone();
                if let Some(pc) = pc.as_mut() {
                    pc.apply(&v_basis[j], &mut zj)?;
                }
                let mut w = V::from(vec![T::zero(); n]);
                a.matvec(&zj, &mut w);
                z_basis.push(zj);

                let hnorm = match self.orthog {
                    Orthog::Classical => {
                        let coeffs: Vec<T> = v_basis.iter().map(|vi| ip.dot(&w, vi)).collect();
                        for (i, (ci, vi)) in coeffs.iter().zip(&v_basis).enumerate() {
                            h[i][j] = *ci;
                            for (wk, vik) in w.as_mut().iter_mut().zip(vi.as_ref()) {
                                *wk = *wk - *ci * *vik;
                            }
                        }
                        ip.norm(&w)
                    }
                    Orthog::Modified => orthogonalize(&v_basis, &mut w, &mut h, j),
                };
                h[j + 1][j] = hnorm;
                let happy_breakdown = hnorm.abs() < self.haptol * s[j].abs();
                if !happy_breakdown {
                    v_basis.push(V::from(w.as_ref().iter().map(|&wi| wi / hnorm).collect::<Vec<_>>()));
                }
                apply_givens_and_update_g(&mut h, &mut s, &mut cs, &mut sn, j, epsilon);
                total_iters += 1;
                arnoldi_steps = j + 1;
                let res_norm = s[j + 1].abs();
                if let Some(monitor) = self.monitor.as_mut() {
                    monitor(total_iters, res_norm);
                }
                self.residual_history.push(res_norm);
                let (stop, _) = self.conv.check(res_norm, res0, total_iters);
                if stop || happy_breakdown {
                    break;
                }
            }

            let mut y = vec![T::zero(); arnoldi_steps];
            back_substitution(&h, &s, &mut y, arnoldi_steps, epsilon);
            Self::build_solution(x, &y, &z_basis);

            r = residual(x);
            beta = ip.norm(&r);
            let (stop, s_stats) = self.conv.check(beta, res0, total_iters);
            stats = s_stats;
            if stop || beta < epsilon {
                break;
            }
        }
        Ok(stats)
    }

    /// Build the solution x = x0 + sum y[i] * z_basis[i] from Arnoldi/QR results
    fn build_solution<V: AsRef<[T]> + AsMut<[T]>>(x: &mut V, y: &[T], z_basis: &[V]) {
        for (yi, zi) in y.iter().zip(z_basis) {
            for (xk, zk) in x.as_mut().iter_mut().zip(zi.as_ref()) {
                *xk = *xk + *yi * *zk;
            }
        }
    }
}

/// Presents a fixed preconditioner through the flexible interface.
pub struct FixedPc<'a, M, V> {
    inner: &'a dyn Preconditioner<M, V>,
}

impl<'a, M, V> FixedPc<'a, M, V> {
    pub fn new(inner: &'a dyn Preconditioner<M, V>) -> Self {
        Self { inner }
    }
}

impl<M, V> FlexiblePreconditioner<M, V> for FixedPc<'_, M, V> {
    fn apply(&mut self, r: &V, z: &mut V) -> Result<(), KError> {
        self.inner.apply(r, z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::CsrMatrix;
    use crate::solver::{GmresSolver, LinearSolver};

    struct Jacobi {
        inv_diag: Vec<f64>,
    }

    impl Preconditioner<CsrMatrix, Vec<f64>> for Jacobi {
        fn apply(&self, r: &Vec<f64>, z: &mut Vec<f64>) -> Result<(), KError> {
            for ((zi, ri), di) in z.iter_mut().zip(r).zip(&self.inv_diag) {
                *zi = ri * di;
            }
            Ok(())
        }
    }

    /// Preconditioner whose strength changes between applications.
    struct Alternating {
        inv_diag: Vec<f64>,
        calls: usize,
    }

    impl FlexiblePreconditioner<CsrMatrix, Vec<f64>> for Alternating {
        fn apply(&mut self, r: &Vec<f64>, z: &mut Vec<f64>) -> Result<(), KError> {
            let w = if self.calls % 2 == 0 { 1.0 } else { 0.5 };
            self.calls += 1;
            for ((zi, ri), di) in z.iter_mut().zip(r).zip(&self.inv_diag) {
                *zi = w * ri * di;
            }
            Ok(())
        }
    }

    fn test_matrix(n: usize) -> CsrMatrix {
        CsrMatrix::from_fn(n, n, |i, j| {
            if i == j {
                2.0 + i as f64 * 0.1
            } else if j + 1 == i || i + 1 == j {
                -1.0
            } else {
                0.0
            }
        })
    }

    #[test]
    fn fgmres_equiv_to_gmres_on_fixed_pc() {
        let n = 25;
        let a = test_matrix(n);
        let b: Vec<f64> = (0..n).map(|i| 1.0 + i as f64).collect();
        let jacobi = Jacobi {
            inv_diag: a.diagonal().iter().map(|d| 1.0 / d).collect(),
        };
        let pc: &dyn Preconditioner<CsrMatrix, Vec<f64>> = &jacobi;

        let mut x_g = vec![0.0; n];
        GmresSolver::new(30, 1e-12, 100).solve(&a, Some(pc), &b, &mut x_g).unwrap();

        let mut x_f = vec![0.0; n];
        let mut fixed = FixedPc::new(pc);
        let flex: &mut dyn FlexiblePreconditioner<CsrMatrix, Vec<f64>> = &mut fixed;
        let stats = FgmresSolver::new(1e-12, 100, 30)
            .solve_flex(&a, Some(flex), &b, &mut x_f)
            .unwrap();
        assert!(stats.converged);
        for (g, f) in x_g.iter().zip(&x_f) {
            assert!((g - f).abs() < 1e-8, "gmres {} vs fgmres {}", g, f);
        }
    }

    #[test]
    fn fgmres_handles_varying_preconditioner() {
        let n = 40;
        let a = test_matrix(n);
        let b = vec![1.0; n];
        let mut pc = Alternating {
            inv_diag: a.diagonal().iter().map(|d| 1.0 / d).collect(),
            calls: 0,
        };
        let mut x = vec![0.0; n];
        let mut solver = FgmresSolver::new(1e-10, 200, 20).with_orthog(Orthog::Classical);
        let flex: &mut dyn FlexiblePreconditioner<CsrMatrix, Vec<f64>> = &mut pc;
        let stats = solver.solve_flex(&a, Some(flex), &b, &mut x).unwrap();
        assert!(stats.converged);
        let mut r = b.clone();
        a.spmv_add(-1.0, &x, &mut r);
        let rnorm = r.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!(rnorm < 1e-8 * (n as f64).sqrt());
        assert_eq!(solver.residual_history.len(), stats.iterations);
    }
}

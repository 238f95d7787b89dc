//! Generalized Minimal Residual (GMRES) solver with fixed restart (Saad §6.4)
//!
//! This module implements the restarted GMRES algorithm for solving large, sparse, and possibly nonsymmetric
//! linear systems Ax = b. GMRES minimizes the residual over a Krylov subspace and supports both left and right
//! preconditioning. The implementation includes happy breakdown detection, double orthogonalization, and
//! robust back-substitution for the least-squares problem.
//!
//! # Features
//! - Supports left, right, or no preconditioning
//! - Double (iterative) Gram-Schmidt orthogonalization for numerical stability
//! - Happy breakdown detection for early termination
//! - Givens rotations for least-squares update
//! - Robust back-substitution with zero-pivot protection
//!
//! With right preconditioning the monitored residual is the true residual `‖b - Ax‖`;
//! with left preconditioning it is `‖M⁻¹(b - Ax)‖`.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM. §6.4
//! - https://en.wikipedia.org/wiki/Generalized_minimal_residual_method

use crate::core::traits::{InnerProduct, MatVec};
use crate::core::wrappers::axpy;
use crate::error::KError;
use crate::preconditioner::Preconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::{Convergence, SolveStats};
use num_traits::Float;

/// Preconditioning mode for GMRES (none, left, or right)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Preconditioning {
    None,
    Left,
    Right,
}

/// GMRES solver struct with restart and preconditioning options.
///
/// # Type Parameters
/// * `T` - Scalar type (e.g., f32, f64)
pub struct GmresSolver<T> {
    /// Number of Arnoldi vectors before restart
    pub restart: usize,
    /// Convergence criteria (tolerances and max iterations)
    pub conv: Convergence<T>,
    /// Preconditioning mode
    pub preconditioning: Preconditioning,
}

impl<T: Copy + Float> GmresSolver<T> {
    /// Create a new GMRES solver with restart, relative tolerance, and max iterations.
    pub fn new(restart: usize, rtol: T, max_iters: usize) -> Self {
        Self {
            restart: restart.max(1),
            conv: Convergence::new(rtol, max_iters),
            preconditioning: Preconditioning::Right,
        }
    }

    /// Set the absolute residual floor.
    pub fn with_atol(mut self, atol: T) -> Self {
        self.conv = self.conv.with_atol(atol);
        self
    }

    /// Set the preconditioning mode (left, right, or none).
    pub fn with_preconditioning(mut self, mode: Preconditioning) -> Self {
        self.preconditioning = mode;
        self
    }
}

/// Orthogonalize `w` against `basis[0..=j]` twice (MGS + refinement), filling column `j` of `h`.
/// Returns the norm of the orthogonalized vector.
pub(crate) fn orthogonalize<V, T>(basis: &[V], w: &mut V, h: &mut [Vec<T>], j: usize) -> T
where
    (): InnerProduct<V, Scalar = T>,
    V: AsMut<[T]> + AsRef<[T]>,
    T: Float,
{
    let ip = ();
    for (i, vi) in basis.iter().enumerate().take(j + 1) {
        h[i][j] = ip.dot(w, vi);
        for (wk, vik) in w.as_mut().iter_mut().zip(vi.as_ref()) {
            *wk = *wk - h[i][j] * *vik;
        }
    }
    // Iterative refinement (second orthogonalization)
    for (i, vi) in basis.iter().enumerate().take(j + 1) {
        let tmp = ip.dot(w, vi);
        h[i][j] = h[i][j] + tmp;
        for (wk, vik) in w.as_mut().iter_mut().zip(vi.as_ref()) {
            *wk = *wk - tmp * *vik;
        }
    }
    ip.norm(w)
}

/// Apply Givens rotations to Hessenberg matrix and update g vector.
pub(crate) fn apply_givens_and_update_g<T: Float>(
    h: &mut [Vec<T>],
    g: &mut [T],
    cs: &mut [T],
    sn: &mut [T],
    j: usize,
    epsilon: T,
) {
    for i in 0..j {
        let temp = cs[i] * h[i][j] + sn[i] * h[i + 1][j];
        h[i + 1][j] = -sn[i] * h[i][j] + cs[i] * h[i + 1][j];
        h[i][j] = temp;
    }
    let h_kk = h[j][j];
    let h_k1k = h[j + 1][j];
    let r = (h_kk * h_kk + h_k1k * h_k1k).sqrt();
    if r.abs() < epsilon {
        cs[j] = T::one();
        sn[j] = T::zero();
    } else {
        cs[j] = h_kk / r;
        sn[j] = h_k1k / r;
    }
    h[j][j] = cs[j] * h_kk + sn[j] * h_k1k;
    h[j + 1][j] = T::zero();
    let temp = cs[j] * g[j] + sn[j] * g[j + 1];
    g[j + 1] = -sn[j] * g[j] + cs[j] * g[j + 1];
    g[j] = temp;
}

/// Solve upper-triangular system Hy = g for y, with zero-pivot protection.
pub(crate) fn back_substitution<T: Float>(h: &[Vec<T>], g: &[T], y: &mut [T], m: usize, epsilon: T) {
    for i in (0..m).rev() {
        y[i] = g[i];
        for j in (i + 1)..m {
            y[i] = y[i] - h[i][j] * y[j];
        }
        if h[i][i].abs() > epsilon {
            y[i] = y[i] / h[i][i];
        } else {
            y[i] = T::zero();
        }
    }
}

impl<M, V, T> LinearSolver<M, V> for GmresSolver<T>
where
    M: MatVec<V>,
    (): InnerProduct<V, Scalar = T>,
    V: AsMut<[T]> + AsRef<[T]> + From<Vec<T>> + Clone,
    T: Float + From<f64>,
{
    type Error = KError;
    type Scalar = T;

    /// Solve the linear system Ax = b using restarted GMRES.
    ///
    /// # Arguments
    /// * `a` - Matrix implementing `MatVec`
    /// * `pc` - Optional preconditioner (left or right)
    /// * `b` - Right-hand side vector
    /// * `x` - On input: initial guess; on output: solution vector
    fn solve(
        &mut self,
        a: &M,
        pc: Option<&dyn Preconditioner<M, V>>,
        b: &V,
        x: &mut V,
    ) -> Result<SolveStats<T>, KError> {
        let n = b.as_ref().len();
        if x.as_ref().len() != n {
            return Err(KError::DimensionMismatch {
                expected: n,
                found: x.as_ref().len(),
            });
        }
        let ip = ();
        let epsilon: T = <T as From<f64>>::from(1e-14);
        let mode = match pc {
            Some(_) => self.preconditioning,
            None => Preconditioning::None,
        };
        let m = self.restart;

        // r = b - A x, optionally preconditioned from the left
        let residual = |x: &V| -> Result<V, KError> {
            let mut ax = V::from(vec![T::zero(); n]);
            a.matvec(x, &mut ax);
            let r = V::from(
                ax.as_ref()
                    .iter()
                    .zip(b.as_ref())
                    .map(|(&axi, &bi)| bi - axi)
                    .collect::<Vec<_>>(),
            );
            match (mode, pc) {
                (Preconditioning::Left, Some(pc)) => {
                    let mut z = V::from(vec![T::zero(); n]);
                    pc.apply(&r, &mut z)?;
                    Ok(z)
                }
                _ => Ok(r),
            }
        };

        let mut r = residual(x)?;
        let mut beta = ip.norm(&r);
        let res0 = beta;
        let mut iteration = 0;
        let (stop, mut stats) = self.conv.check(beta, res0, iteration);
        if stop {
            return Ok(stats);
        }

        while iteration < self.conv.max_iters {
            let mut v_basis: Vec<V> = Vec::with_capacity(m + 1);
            v_basis.push(V::from(r.as_ref().iter().map(|&ri| ri / beta).collect::<Vec<_>>()));
            let mut h = vec![vec![T::zero(); m]; m + 1];
            let mut g = vec![T::zero(); m + 1];
            g[0] = beta;
            let mut cs = vec![T::zero(); m];
            let mut sn = vec![T::zero(); m];
            let mut k = 0;

            for j in 0..m {
                iteration += 1;
                let mut w = V::from(vec![T::zero(); n]);
                match (mode, pc) {
                    (Preconditioning::Right, Some(pc)) => {
                        let mut z = V::from(vec![T::zero(); n]);
                        pc.apply(&v_basis[j], &mut z)?;
                        a.matvec(&z, &mut w);
                    }
                    (Preconditioning::Left, Some(pc)) => {
                        let mut av = V::from(vec![T::zero(); n]);
                        a.matvec(&v_basis[j], &mut av);
                        pc.apply(&av, &mut w)?;
                    }
                    _ => a.matvec(&v_basis[j], &mut w),
                }
                let hnorm = orthogonalize(&v_basis, &mut w, &mut h, j);
                h[j + 1][j] = hnorm;
                let happy_breakdown = hnorm.abs() < epsilon;
                if !happy_breakdown {
                    v_basis.push(V::from(w.as_ref().iter().map(|&wi| wi / hnorm).collect::<Vec<_>>()));
                }
                apply_givens_and_update_g(&mut h, &mut g, &mut cs, &mut sn, j, epsilon);
                k = j + 1;
                let (stop, _) = self.conv.check(g[j + 1].abs(), res0, iteration);
                if stop || happy_breakdown {
                    break;
                }
            }

            // x += V_k y (right: x += M⁻¹ V_k y)
            let mut y = vec![T::zero(); k];
            back_substitution(&h, &g, &mut y, k, epsilon);
            let mut update = vec![T::zero(); n];
            for (yi, vi) in y.iter().zip(&v_basis) {
                axpy(*yi, vi.as_ref(), &mut update);
            }
            let update = match (mode, pc) {
                (Preconditioning::Right, Some(pc)) => {
                    let mut z = V::from(vec![T::zero(); n]);
                    pc.apply(&V::from(update), &mut z)?;
                    z
                }
                _ => V::from(update),
            };
            axpy(T::one(), update.as_ref(), x.as_mut());

            r = residual(x)?;
            beta = ip.norm(&r);
            let (stop, s) = self.conv.check(beta, res0, iteration);
            stats = s;
            if stop || beta < epsilon {
                break;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::CsrMatrix;

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

    fn convection_diffusion(n: usize) -> CsrMatrix {
        CsrMatrix::from_fn(n, n, |i, j| {
            if i == j {
                4.0
            } else if j + 1 == i {
                -1.5
            } else if i + 1 == j {
                -0.5
            } else {
                0.0
            }
        })
    }

    #[test]
    fn gmres_solves_nonsymmetric_system() {
        let n = 40;
        let a = convection_diffusion(n);
        let x_true: Vec<f64> = (0..n).map(|i| (i as f64 * 0.3).sin()).collect();
        let mut b = vec![0.0; n];
        a.spmv_add(1.0, &x_true, &mut b);

        let mut x = vec![0.0; n];
        let mut solver = GmresSolver::new(10, 1e-10, 500);
        let stats = solver.solve(&a, None, &b, &mut x).unwrap();
        assert!(stats.converged, "stats = {:?}", stats);
        for (xi, ti) in x.iter().zip(&x_true) {
            assert!((xi - ti).abs() < 1e-8);
        }
    }

    #[test]
    fn left_and_right_preconditioning_agree() {
        let n = 30;
        let a = convection_diffusion(n);
        let b = vec![1.0; n];
        let jacobi = Jacobi {
            inv_diag: a.diagonal().iter().map(|d| 1.0 / d).collect(),
        };
        let pc: &dyn Preconditioner<CsrMatrix, Vec<f64>> = &jacobi;
        let mut xl = vec![0.0; n];
        let mut xr = vec![0.0; n];
        GmresSolver::new(30, 1e-12, 200)
            .with_preconditioning(Preconditioning::Left)
            .solve(&a, Some(pc), &b, &mut xl)
            .unwrap();
        GmresSolver::new(30, 1e-12, 200)
            .with_preconditioning(Preconditioning::Right)
            .solve(&a, Some(pc), &b, &mut xr)
            .unwrap();
        for (l, r) in xl.iter().zip(&xr) {
            assert!((l - r).abs() < 1e-8);
        }
    }

    #[test]
    fn zero_rhs_returns_immediately() {
        let a = convection_diffusion(5);
        let mut x = vec![0.0; 5];
        let stats = GmresSolver::new(5, 1e-8, 10).solve(&a, None, &vec![0.0; 5], &mut x).unwrap();
        assert_eq!(stats.iterations, 0);
        assert!(stats.converged);
        assert!(x.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn iteration_cap_is_respected() {
        let a = convection_diffusion(50);
        let b = vec![1.0; 50];
        let mut x = vec![0.0; 50];
        let stats = GmresSolver::new(2, 1e-14, 3).solve(&a, None, &b, &mut x).unwrap();
        assert!(stats.iterations <= 3);
        assert!(!stats.converged);
    }
}

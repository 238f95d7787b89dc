//! Per-field inner solvers.
//!
//! A `KspContext` is one solver bound to one field's diagonal or Schur block: either a sparse
//! LU factorization, or aggregation AMG applied once (`preonly`) or used as the right
//! preconditioner of GMRES / FGMRES. The context is created once from the field's options and
//! re-bound to a new operator at every block setup; re-binding never reconstructs it.
//!
//! `InnerSolverPool` holds one context per field, indexed by field number.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems. SIAM.
//! - PETSc documentation: https://petsc.org/release/docs/manualpages/KSP/

use crate::config::{FieldOptions, PcType, SolveType};
use crate::error::KError;
use crate::matrix::CsrMatrix;
use crate::preconditioner::amg::{Amg, AmgOptions};
use crate::preconditioner::{FlexiblePreconditioner, Preconditioner};
use crate::solver::fgmres::FixedPc;
use crate::solver::gmres::Preconditioning;
use crate::solver::{FgmresSolver, GmresSolver, LinearSolver, LuSolver};
use crate::utils::convergence::SolveStats;
use std::sync::Arc;
use tracing::{trace, warn};

enum Backend {
    Direct(LuSolver),
    Amg(Option<Amg>),
}

/// One field solver.
pub struct KspContext {
    opts: FieldOptions,
    backend: Backend,
    op: Option<Arc<CsrMatrix>>,
    /// Krylov right-hand side and iterate, sized at bind.
    rhs: Vec<f64>,
    sol: Vec<f64>,
}

impl KspContext {
    /// Validate the options and create an unbound solver.
    pub fn new(opts: &FieldOptions) -> Result<Self, KError> {
        if !opts.solve.is_supported() {
            return Err(KError::Unsupported(
                "stationary field solvers are disabled; use preonly, gmres or fgmres",
            ));
        }
        let mut opts = opts.clone();
        let backend = match opts.prec {
            PcType::Direct => {
                // one application of the factorization, whatever `solve` says
                opts.solve = SolveType::PreOnly;
                Backend::Direct(LuSolver::new())
            }
            PcType::Amg => Backend::Amg(None),
        };
        Ok(Self {
            opts,
            backend,
            op: None,
            rhs: Vec::new(),
            sol: Vec::new(),
        })
    }

    pub fn options(&self) -> &FieldOptions {
        &self.opts
    }

    pub fn operator(&self) -> Option<&Arc<CsrMatrix>> {
        self.op.as_ref()
    }

    /// The AMG hierarchy, for AMG-backed solvers that have been bound.
    pub fn amg(&self) -> Option<&Amg> {
        match &self.backend {
            Backend::Amg(amg) => amg.as_ref(),
            Backend::Direct(_) => None,
        }
    }

    /// Bind (or re-bind) the solver to `a`.
    pub fn set_operator(&mut self, a: Arc<CsrMatrix>) -> Result<(), KError> {
        if a.nrows() != a.ncols() {
            return Err(KError::DimensionMismatch {
                expected: a.nrows(),
                found: a.ncols(),
            });
        }
        match &mut self.backend {
            Backend::Direct(lu) => lu.factor(&a)?,
            Backend::Amg(Some(amg)) => amg.rebind(a.clone())?,
            Backend::Amg(slot) => *slot = Some(Amg::new(a.clone(), AmgOptions::from(&self.opts))?),
        }
        self.rhs.resize(a.nrows(), 0.0);
        self.sol.resize(a.nrows(), 0.0);
        self.op = Some(a);
        Ok(())
    }

    /// Approximately solve `op · x = b`.
    pub fn solve(&mut self, b: &[f64], x: &mut [f64]) -> Result<SolveStats<f64>, KError> {
        let op = self.op.as_ref().ok_or(KError::NotSetUp)?;
        let stats = match &self.backend {
            Backend::Direct(lu) => {
                lu.solve_cached(b, x)?;
                SolveStats {
                    iterations: 1,
                    final_residual: 0.0,
                    converged: true,
                }
            }
            Backend::Amg(amg) => {
                let amg = amg.as_ref().ok_or(KError::NotSetUp)?;
                if b.len() != self.rhs.len() || x.len() != self.sol.len() {
                    return Err(KError::DimensionMismatch {
                        expected: self.rhs.len(),
                        found: if b.len() != self.rhs.len() { b.len() } else { x.len() },
                    });
                }
                self.rhs.copy_from_slice(b);
                self.sol.fill(0.0);
                let stats = solve_amg(&self.opts, op, amg, &self.rhs, &mut self.sol)?;
                x.copy_from_slice(&self.sol);
                stats
            }
        };
        trace!(
            prec = %self.opts.prec,
            solve = %self.opts.solve,
            iterations = stats.iterations,
            residual = stats.final_residual,
            "field solve"
        );
        if self.opts.solve.is_iterative() && !stats.converged {
            warn!(
                solve = %self.opts.solve,
                iterations = stats.iterations,
                residual = stats.final_residual,
                "inner solve stopped without converging"
            );
        }
        Ok(stats)
    }
}

/// AMG applied once, or as the right preconditioner of GMRES / FGMRES, from a zero guess.
fn solve_amg(
    opts: &FieldOptions,
    op: &CsrMatrix,
    amg: &Amg,
    b: &Vec<f64>,
    x: &mut Vec<f64>,
) -> Result<SolveStats<f64>, KError> {
    let stats = match opts.solve {
        SolveType::PreOnly => {
            amg.apply(b, x)?;
            SolveStats {
                iterations: 1,
                final_residual: 0.0,
                converged: true,
            }
        }
        SolveType::Gmres => {
            let pc: &dyn Preconditioner<CsrMatrix, Vec<f64>> = amg;
            GmresSolver::new(opts.restart, opts.tolrel, opts.maxiter)
                .with_atol(opts.tolabs)
                .with_preconditioning(Preconditioning::Right)
                .solve(op, Some(pc), b, x)?
        }
        SolveType::Fgmres => {
            let mut fixed = FixedPc::new(amg);
            let flex: &mut dyn FlexiblePreconditioner<CsrMatrix, Vec<f64>> = &mut fixed;
            FgmresSolver::new(opts.tolrel, opts.maxiter, opts.restart)
                .with_atol(opts.tolabs)
                .solve_flex(op, Some(flex), b, x)?
        }
        SolveType::Stationary(_) => {
            return Err(KError::Unsupported("stationary field solvers are disabled"));
        }
    };
    Ok(stats)
}

/// One solver per field, indexed by field number.
pub struct InnerSolverPool {
    solvers: Vec<KspContext>,
}

impl InnerSolverPool {
    pub fn new(fields: &[FieldOptions]) -> Result<Self, KError> {
        let solvers = fields.iter().map(KspContext::new).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { solvers })
    }

    pub fn len(&self) -> usize {
        self.solvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.solvers.is_empty()
    }

    pub fn get(&self, field: usize) -> Option<&KspContext> {
        self.solvers.get(field)
    }

    fn solver_mut(&mut self, field: usize) -> Result<&mut KspContext, KError> {
        let found = self.solvers.len();
        self.solvers.get_mut(field).ok_or(KError::FieldCountMismatch {
            scheme: "inner solver pool",
            expected: field + 1,
            found,
        })
    }

    pub fn bind(&mut self, field: usize, a: Arc<CsrMatrix>) -> Result<(), KError> {
        self.solver_mut(field)?.set_operator(a)
    }

    pub fn solve(&mut self, field: usize, b: &[f64], x: &mut [f64]) -> Result<SolveStats<f64>, KError> {
        self.solver_mut(field)?.solve(b, x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StationaryKind;

    fn laplacian(n: usize) -> CsrMatrix {
        CsrMatrix::from_fn(n, n, |i, j| {
            if i == j {
                2.0
            } else if i + 1 == j || j + 1 == i {
                -1.0
            } else {
                0.0
            }
        })
    }

    fn residual(a: &CsrMatrix, x: &[f64], b: &[f64]) -> f64 {
        let mut r = b.to_vec();
        a.spmv_add(-1.0, x, &mut r);
        r.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    #[test]
    fn direct_solver_ignores_solve_type() {
        let mut opts = FieldOptions::direct();
        opts.solve = SolveType::Gmres;
        let ksp = KspContext::new(&opts).unwrap();
        assert_eq!(ksp.options().solve, SolveType::PreOnly);
    }

    #[test]
    fn stationary_solvers_are_rejected() {
        let mut opts = FieldOptions::amg(SolveType::PreOnly);
        opts.solve = SolveType::Stationary(StationaryKind::Fixed);
        assert!(matches!(KspContext::new(&opts), Err(KError::Unsupported(_))));
    }

    #[test]
    fn solve_before_binding_fails() {
        let mut ksp = KspContext::new(&FieldOptions::direct()).unwrap();
        let mut x = vec![0.0; 2];
        assert_eq!(ksp.solve(&[1.0, 1.0], &mut x).unwrap_err(), KError::NotSetUp);
    }

    #[test]
    fn amg_gmres_reaches_tolerance() {
        let n = 150;
        let a = Arc::new(laplacian(n));
        let opts = FieldOptions::amg(SolveType::Gmres).with_tolerances(1e-8, 1e-50, 200);
        let mut ksp = KspContext::new(&opts).unwrap();
        ksp.set_operator(a.clone()).unwrap();
        let b = vec![1.0; n];
        let mut x = vec![0.0; n];
        let stats = ksp.solve(&b, &mut x).unwrap();
        assert!(stats.converged);
        assert!(residual(&a, &x, &b) <= 1e-8 * (n as f64).sqrt() * 1.01);
    }

    #[test]
    fn amg_fgmres_reaches_tolerance() {
        let n = 90;
        let a = Arc::new(laplacian(n));
        let opts = FieldOptions::amg(SolveType::Fgmres).with_tolerances(1e-9, 1e-50, 300);
        let mut ksp = KspContext::new(&opts).unwrap();
        ksp.set_operator(a.clone()).unwrap();
        let b: Vec<f64> = (0..n).map(|i| (i as f64).cos()).collect();
        let mut x = vec![0.0; n];
        assert!(ksp.solve(&b, &mut x).unwrap().converged);
        let b_norm = b.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!(residual(&a, &x, &b) <= 1e-9 * b_norm * 1.01);
    }

    #[test]
    fn repeated_amg_solves_reuse_buffers() {
        let n = 64;
        let mut ksp = KspContext::new(&FieldOptions::amg(SolveType::Gmres).with_tolerances(1e-10, 1e-50, 200)).unwrap();
        ksp.set_operator(Arc::new(laplacian(n))).unwrap();
        let b: Vec<f64> = (0..n).map(|i| (i as f64 * 0.3).sin()).collect();
        let mut x1 = vec![0.0; n];
        let mut x2 = vec![7.0; n];
        ksp.solve(&b, &mut x1).unwrap();
        // the stale iterate in the buffer must not leak into the next solve
        ksp.solve(&b, &mut x2).unwrap();
        assert_eq!(x1, x2);
        assert_eq!((ksp.rhs.len(), ksp.sol.len()), (n, n));

        let mut short = vec![0.0; n - 1];
        assert!(matches!(ksp.solve(&b, &mut short), Err(KError::DimensionMismatch { .. })));
    }

    #[test]
    fn rebinding_keeps_the_solver() {
        let n = 120;
        let a = laplacian(n);
        let mut ksp = KspContext::new(&FieldOptions::amg(SolveType::PreOnly)).unwrap();
        ksp.set_operator(Arc::new(a.clone())).unwrap();
        ksp.set_operator(Arc::new(a.scaled(2.0))).unwrap();
        assert_eq!(ksp.amg().map(Amg::hierarchy_builds), Some(1));
    }

    #[test]
    fn pool_rejects_unknown_field() {
        let mut pool = InnerSolverPool::new(&[FieldOptions::direct()]).unwrap();
        let err = pool.bind(1, Arc::new(CsrMatrix::identity(2))).unwrap_err();
        assert!(matches!(err, KError::FieldCountMismatch { .. }));
    }
}

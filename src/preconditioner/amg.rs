//! Aggregation-based algebraic multigrid on CSR operators.
//!
//! Strength of connection, pairwise and greedy aggregation, piecewise-constant interpolation
//! and Galerkin coarse operators. One V-cycle with damped Jacobi smoothing is applied per
//! preconditioner application; the coarsest level is solved with a sparse LU.
//!
//! When the operator is rebound with an identical sparsity pattern the aggregates are kept
//! and only the Galerkin products, smoother diagonals and the coarse factorization are
//! recomputed.

use crate::config::{AmgType, FieldOptions};
use crate::error::KError;
use crate::matrix::CsrMatrix;
use crate::preconditioner::Preconditioner;
use crate::solver::LuSolver;
use std::sync::Arc;
use tracing::debug;

/// Jacobi damping used by the level smoother.
const JACOBI_WEIGHT: f64 = 2.0 / 3.0;

#[derive(Clone, Debug)]
pub struct AmgOptions {
    pub kind: AmgType,
    /// Maximum number of levels, including the finest.
    pub max_levels: usize,
    /// Base strength-of-connection threshold.
    pub threshold: f64,
    /// Pre- and post-smoothing sweeps per level.
    pub smooth_sweeps: usize,
    /// Levels at or below this size are solved directly.
    pub coarse_size: usize,
}

impl Default for AmgOptions {
    fn default() -> Self {
        Self {
            kind: AmgType::Pairwise,
            max_levels: 10,
            threshold: 0.08,
            smooth_sweeps: 1,
            coarse_size: 50,
        }
    }
}

impl From<&FieldOptions> for AmgOptions {
    fn from(opts: &FieldOptions) -> Self {
        Self {
            kind: opts.amgtype,
            max_levels: opts.amg_levels.max(1),
            threshold: opts.amg_threshold,
            smooth_sweeps: opts.amg_smooth,
            ..Self::default()
        }
    }
}

struct AmgLevel {
    a: Arc<CsrMatrix>,
    diag_inv: Vec<f64>,
    /// Aggregate index of each node of this level.
    aggregates: Vec<usize>,
    interpolation: CsrMatrix,
    restriction: CsrMatrix,
}

pub struct Amg {
    opts: AmgOptions,
    levels: Vec<AmgLevel>,
    coarse_a: Arc<CsrMatrix>,
    coarse_lu: LuSolver,
    builds: usize,
}

impl Amg {
    /// Build the hierarchy for `a`.
    pub fn new(a: Arc<CsrMatrix>, opts: AmgOptions) -> Result<Self, KError> {
        let mut amg = Amg {
            opts,
            levels: Vec::new(),
            coarse_a: a.clone(),
            coarse_lu: LuSolver::new(),
            builds: 0,
        };
        amg.build(a)?;
        Ok(amg)
    }

    /// Number of levels including the directly solved coarsest one.
    pub fn num_levels(&self) -> usize {
        self.levels.len() + 1
    }

    /// How many times the aggregation hierarchy has been constructed from scratch.
    pub fn hierarchy_builds(&self) -> usize {
        self.builds
    }

    /// Operator sizes from finest to coarsest.
    pub fn level_sizes(&self) -> Vec<usize> {
        let mut sizes: Vec<usize> = self.levels.iter().map(|l| l.a.nrows()).collect();
        sizes.push(self.coarse_a.nrows());
        sizes
    }

    fn fine(&self) -> &Arc<CsrMatrix> {
        self.levels.first().map(|l| &l.a).unwrap_or(&self.coarse_a)
    }

    /// Replace the operator. An identical sparsity pattern keeps the aggregates.
    pub fn rebind(&mut self, a: Arc<CsrMatrix>) -> Result<(), KError> {
        if self.fine().same_pattern(&a) {
            self.recompute_galerkin(a)
        } else {
            self.build(a)
        }
    }

    fn build(&mut self, a: Arc<CsrMatrix>) -> Result<(), KError> {
        if a.nrows() != a.ncols() {
            return Err(KError::DimensionMismatch {
                expected: a.nrows(),
                found: a.ncols(),
            });
        }
        self.levels.clear();
        let mut current = a;
        while self.levels.len() + 1 < self.opts.max_levels && current.nrows() > self.opts.coarse_size {
            let threshold = adaptive_threshold(&current, self.opts.threshold);
            let strength = strength_graph(&current, threshold);
            let aggregates = match self.opts.kind {
                AmgType::Pairwise => double_pairwise_aggregation(&strength),
                AmgType::Greedy => greedy_aggregation(&strength),
            };
            let coarse_n = aggregates.iter().max().map_or(0, |&m| m + 1);
            if coarse_n == 0 || coarse_n >= current.nrows() {
                debug!(n = current.nrows(), "aggregation stalled, stopping coarsening");
                break;
            }
            let interpolation = construct_prolongation(&aggregates, coarse_n);
            let restriction = interpolation.transpose();
            let coarse = Arc::new(restriction.matmul(&current)?.matmul(&interpolation)?);
            self.levels.push(AmgLevel {
                diag_inv: diagonal_inverse(&current),
                a: current,
                aggregates,
                interpolation,
                restriction,
            });
            current = coarse;
        }
        self.coarse_lu.factor(&current)?;
        self.coarse_a = current;
        self.builds += 1;
        debug!(levels = ?self.level_sizes(), "built AMG hierarchy");
        Ok(())
    }

    fn recompute_galerkin(&mut self, a: Arc<CsrMatrix>) -> Result<(), KError> {
        let mut current = a;
        for level in &mut self.levels {
            let coarse = Arc::new(level.restriction.matmul(&current)?.matmul(&level.interpolation)?);
            level.diag_inv = diagonal_inverse(&current);
            level.a = current;
            current = coarse;
        }
        self.coarse_lu.factor(&current)?;
        self.coarse_a = current;
        debug!(levels = self.num_levels(), "reused AMG aggregates");
        Ok(())
    }

    fn smooth(level: &AmgLevel, r: &[f64], z: &mut [f64], sweeps: usize) {
        let mut res = vec![0.0; r.len()];
        for _ in 0..sweeps {
            res.copy_from_slice(r);
            level.a.spmv_add(-1.0, z, &mut res);
            for ((zi, ri), di) in z.iter_mut().zip(&res).zip(&level.diag_inv) {
                *zi += JACOBI_WEIGHT * di * ri;
            }
        }
    }

    fn vcycle(&self, l: usize, r: &[f64], z: &mut [f64]) -> Result<(), KError> {
        let Some(level) = self.levels.get(l) else {
            return self.coarse_lu.solve_cached(r, z);
        };
        z.fill(0.0);
        Self::smooth(level, r, z, self.opts.smooth_sweeps);
        let mut res = r.to_vec();
        level.a.spmv_add(-1.0, z, &mut res);
        let nc = level.restriction.nrows();
        let mut rc = vec![0.0; nc];
        level.restriction.spmv_add(1.0, &res, &mut rc);
        let mut zc = vec![0.0; nc];
        self.vcycle(l + 1, &rc, &mut zc)?;
        level.interpolation.spmv_add(1.0, &zc, z);
        Self::smooth(level, r, z, self.opts.smooth_sweeps);
        Ok(())
    }

    /// Aggregate assignment of the finest level, if the hierarchy has more than one level.
    pub fn fine_aggregates(&self) -> Option<&[usize]> {
        self.levels.first().map(|l| l.aggregates.as_slice())
    }
}

impl Preconditioner<CsrMatrix, Vec<f64>> for Amg {
    fn apply(&self, r: &Vec<f64>, z: &mut Vec<f64>) -> Result<(), KError> {
        if r.len() != self.fine().nrows() {
            return Err(KError::DimensionMismatch {
                expected: self.fine().nrows(),
                found: r.len(),
            });
        }
        self.vcycle(0, r, z)
    }

    fn setup(&mut self, a: &CsrMatrix) -> Result<(), KError> {
        self.rebind(Arc::new(a.clone()))
    }
}

fn diagonal_inverse(a: &CsrMatrix) -> Vec<f64> {
    a.diagonal()
        .into_iter()
        .map(|d| if d.abs() < 1e-14 { 0.0 } else { 1.0 / d })
        .collect()
}

/// Anisotropy of each row: max |off-diagonal| / |diagonal|.
fn compute_anisotropy(a: &CsrMatrix) -> Vec<f64> {
    (0..a.nrows())
        .map(|i| {
            let (cols, vals) = a.row(i);
            let mut diag = 0.0;
            let mut max_off: f64 = 0.0;
            for (&j, &v) in cols.iter().zip(vals) {
                if j == i {
                    diag = v;
                } else {
                    max_off = max_off.max(v.abs());
                }
            }
            if diag.abs() > 1e-14 { max_off / diag.abs() } else { 0.0 }
        })
        .collect()
}

fn adaptive_threshold(a: &CsrMatrix, base_threshold: f64) -> f64 {
    let anis = compute_anisotropy(a);
    let avg = if anis.is_empty() {
        1.0
    } else {
        anis.iter().sum::<f64>() / anis.len() as f64
    };
    base_threshold * (1.0 + avg.max(0.5))
}

/// Strong neighbors of each node with their strength
/// `|a_ij| / sqrt(|a_ii a_jj|)`, kept when above `threshold`.
fn strength_graph(a: &CsrMatrix, threshold: f64) -> Vec<Vec<(usize, f64)>> {
    let diag = a.diagonal();
    (0..a.nrows())
        .map(|i| {
            let a_ii = diag[i].abs();
            let (cols, vals) = a.row(i);
            cols.iter()
                .zip(vals)
                .filter_map(|(&j, &v)| {
                    if i == j || j >= diag.len() {
                        return None;
                    }
                    let a_jj = diag[j].abs();
                    if a_ii > 1e-14 && a_jj > 1e-14 {
                        let s = v.abs() / (a_ii * a_jj).sqrt();
                        (s > threshold).then_some((j, s))
                    } else {
                        None
                    }
                })
                .collect()
        })
        .collect()
}

/// Pair every node with its strongest unvisited neighbor; leftovers become singletons.
fn pairwise_aggregation(s: &[Vec<(usize, f64)>]) -> Vec<usize> {
    let n = s.len();
    let mut aggregates = vec![usize::MAX; n];
    let mut next = 0;
    for i in 0..n {
        if aggregates[i] != usize::MAX {
            continue;
        }
        let strongest = s[i]
            .iter()
            .filter(|&&(j, _)| aggregates[j] == usize::MAX)
            .fold(None, |best: Option<(usize, f64)>, &(j, w)| match best {
                Some((_, bw)) if bw >= w => best,
                _ => Some((j, w)),
            });
        aggregates[i] = next;
        if let Some((j, _)) = strongest {
            aggregates[j] = next;
        }
        next += 1;
    }
    aggregates
}

/// Two rounds of pairwise matching; aggregates of up to four nodes.
fn double_pairwise_aggregation(s: &[Vec<(usize, f64)>]) -> Vec<usize> {
    let first = pairwise_aggregation(s);
    let coarse = build_coarse_graph(s, &first);
    let second = pairwise_aggregation(&coarse);
    first.iter().map(|&c| second[c]).collect()
}

/// Seed aggregates from unaggregated nodes together with all their free strong neighbors,
/// then attach leftovers to the aggregate of their strongest neighbor.
fn greedy_aggregation(s: &[Vec<(usize, f64)>]) -> Vec<usize> {
    let n = s.len();
    let mut aggregates = vec![usize::MAX; n];
    let mut next = 0;
    for i in 0..n {
        if aggregates[i] != usize::MAX || s[i].iter().any(|&(j, _)| aggregates[j] != usize::MAX) {
            continue;
        }
        aggregates[i] = next;
        for &(j, _) in &s[i] {
            aggregates[j] = next;
        }
        next += 1;
    }
    for i in 0..n {
        if aggregates[i] != usize::MAX {
            continue;
        }
        let host = s[i]
            .iter()
            .filter(|&&(j, _)| aggregates[j] != usize::MAX)
            .fold(None, |best: Option<(usize, f64)>, &(j, w)| match best {
                Some((_, bw)) if bw >= w => best,
                _ => Some((j, w)),
            });
        aggregates[i] = match host {
            Some((j, _)) => aggregates[j],
            None => {
                next += 1;
                next - 1
            }
        };
    }
    aggregates
}

/// Accumulate strengths between aggregates into a coarse graph.
fn build_coarse_graph(s: &[Vec<(usize, f64)>], aggregates: &[usize]) -> Vec<Vec<(usize, f64)>> {
    let coarse_n = aggregates.iter().max().map_or(0, |&m| m + 1);
    let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); coarse_n];
    for (i, neighbors) in s.iter().enumerate() {
        let ai = aggregates[i];
        for &(j, w) in neighbors {
            let aj = aggregates[j];
            if ai == aj {
                continue;
            }
            match rows[ai].iter_mut().find(|(c, _)| *c == aj) {
                Some(entry) => entry.1 += w,
                None => rows[ai].push((aj, w)),
            }
        }
    }
    rows
}

/// Piecewise constant interpolation: P_ij = 1 if node i belongs to aggregate j.
fn construct_prolongation(aggregates: &[usize], coarse_n: usize) -> CsrMatrix {
    let n = aggregates.len();
    let row_ptr: Vec<usize> = (0..=n).collect();
    CsrMatrix::from_csr(n, coarse_n, row_ptr, aggregates.to_vec(), vec![1.0; n])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laplacian_1d(n: usize) -> CsrMatrix {
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

    fn residual_norm(a: &CsrMatrix, z: &[f64], r: &[f64]) -> f64 {
        let mut res = r.to_vec();
        a.spmv_add(-1.0, z, &mut res);
        res.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    #[test]
    fn small_operator_is_solved_directly() {
        let a = CsrMatrix::from_fn(3, 3, |i, j| match (i, j) {
            (0, 0) => 4.0,
            (0, 1) | (1, 0) | (1, 2) | (2, 1) => 1.0,
            (1, 1) => 3.0,
            (2, 2) => 2.0,
            _ => 0.0,
        });
        let amg = Amg::new(Arc::new(a.clone()), AmgOptions::default()).unwrap();
        assert_eq!(amg.num_levels(), 1);
        let r = vec![5.0, 5.0, 3.0];
        let mut z = vec![0.0; 3];
        amg.apply(&r, &mut z).unwrap();
        assert!(residual_norm(&a, &z, &r) < 1e-12);
    }

    fn energy_norm(a: &CsrMatrix, e: &[f64]) -> f64 {
        let mut ae = vec![0.0; e.len()];
        a.spmv_add(1.0, e, &mut ae);
        ae.iter().zip(e).map(|(x, y)| x * y).sum::<f64>().sqrt()
    }

    #[test]
    fn vcycle_contracts_energy_error() {
        for kind in [AmgType::Pairwise, AmgType::Greedy] {
            let n = 200;
            let a = laplacian_1d(n);
            let opts = AmgOptions { kind, coarse_size: 10, ..AmgOptions::default() };
            let amg = Amg::new(Arc::new(a.clone()), opts).unwrap();
            assert!(amg.num_levels() > 1, "{:?} did not coarsen", kind);
            let sizes = amg.level_sizes();
            assert!(sizes.windows(2).all(|w| w[1] < w[0]));

            let r = vec![1.0; n];
            let mut exact = vec![0.0; n];
            let mut lu = LuSolver::new();
            lu.factor(&a).unwrap();
            lu.solve_cached(&r, &mut exact).unwrap();

            let mut z = vec![0.0; n];
            amg.apply(&r, &mut z).unwrap();
            let err: Vec<f64> = exact.iter().zip(&z).map(|(x, y)| x - y).collect();
            assert!(energy_norm(&a, &err) < energy_norm(&a, &exact), "{:?}", kind);
        }
    }

    #[test]
    fn pairwise_matches_strongest_neighbors() {
        let s = vec![
            vec![(1, 0.9), (2, 0.1)],
            vec![(0, 0.9), (2, 0.5)],
            vec![(0, 0.1), (1, 0.5), (3, 0.7)],
            vec![(2, 0.7)],
        ];
        assert_eq!(pairwise_aggregation(&s), vec![0, 0, 1, 1]);
    }

    #[test]
    fn rebind_with_same_pattern_keeps_aggregates() {
        let n = 120;
        let a = laplacian_1d(n);
        let opts = AmgOptions { coarse_size: 10, ..AmgOptions::default() };
        let mut amg = Amg::new(Arc::new(a.clone()), opts).unwrap();
        let before = amg.fine_aggregates().map(|a| a.to_vec());
        assert_eq!(amg.hierarchy_builds(), 1);

        amg.rebind(Arc::new(a.scaled(3.0))).unwrap();
        assert_eq!(amg.hierarchy_builds(), 1);
        assert_eq!(amg.fine_aggregates().map(|a| a.to_vec()), before);

        amg.rebind(Arc::new(CsrMatrix::identity(n))).unwrap();
        assert_eq!(amg.hierarchy_builds(), 2);
    }
}

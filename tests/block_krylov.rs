//! Block preconditioners with AMG field solvers, driving FGMRES on a saddle-point problem.

use kryst_block::config::{BlockPcOptions, FieldOptions, SchemeKind, SolveType};
use kryst_block::context::{BlockPc, KspContext};
use kryst_block::matrix::{CsrMatrix, FieldPartition};
use kryst_block::preconditioner::{Amg, FlexiblePreconditioner};
use kryst_block::solver::FgmresSolver;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// [[L + I, Bt], [B, -εI]] with L the 1D Laplacian on `n` points and B a discrete
/// divergence pairing neighbouring velocity unknowns.
fn stokes_like(n: usize) -> (CsrMatrix, FieldPartition) {
    let m = n / 2;
    let mut triplets = Vec::new();
    for i in 0..n {
        triplets.push((i, i, 3.0));
        if i + 1 < n {
            triplets.push((i, i + 1, -1.0));
            triplets.push((i + 1, i, -1.0));
        }
    }
    for k in 0..m {
        let p = n + k;
        for (col, v) in [(2 * k, 1.0), (2 * k + 1, -1.0)] {
            triplets.push((p, col, v));
            triplets.push((col, p, v));
        }
        triplets.push((p, p, -0.1));
    }
    let op = CsrMatrix::from_triplets(n + m, n + m, &triplets).unwrap();
    (op, FieldPartition::from_sizes(&[n, m]))
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn amg_gmres() -> FieldOptions {
    FieldOptions::amg(SolveType::Gmres).with_tolerances(1e-10, 1e-50, 200)
}

#[test]
fn fgmres_converges_with_schur_preconditioner() {
    let (op, partition) = stokes_like(60);
    let n = op.nrows();
    let opts = BlockPcOptions::new(SchemeKind::Schur2x2, vec![amg_gmres(), FieldOptions::direct()]);
    let mut pc = BlockPc::create(&op, partition, opts).unwrap();

    let mut rng = StdRng::seed_from_u64(42);
    let b: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let mut x = vec![0.0; n];
    let mut solver = FgmresSolver::new(1e-8, 300, n);
    let flex: &mut dyn FlexiblePreconditioner<CsrMatrix, Vec<f64>> = &mut pc;
    let stats = solver.solve_flex(&op, Some(flex), &b, &mut x).unwrap();
    assert!(stats.converged, "{:?}", stats);

    let mut r = b.clone();
    op.spmv_add(-1.0, &x, &mut r);
    assert!(norm(&r) <= 1e-8 * norm(&b) * 1.01);
}

#[test]
fn block_gauss_seidel_drives_fgmres() {
    let (op, partition) = stokes_like(40);
    let n = op.nrows();
    let opts = BlockPcOptions::new(SchemeKind::Bgs2x2, vec![amg_gmres(), FieldOptions::direct()]);
    let mut pc = BlockPc::create(&op, partition, opts).unwrap();
    let b = vec![1.0; n];
    let mut x = vec![0.0; n];
    let flex: &mut dyn FlexiblePreconditioner<CsrMatrix, Vec<f64>> = &mut pc;
    let stats = FgmresSolver::new(1e-8, 300, n)
        .solve_flex(&op, Some(flex), &b, &mut x)
        .unwrap();
    assert!(stats.converged);
}

#[test]
fn repeated_setup_keeps_the_amg_hierarchy() {
    let (op, partition) = stokes_like(80);
    let opts = BlockPcOptions::new(
        SchemeKind::Jacobi2x2,
        vec![FieldOptions::amg(SolveType::PreOnly), FieldOptions::direct()],
    );
    let mut pc = BlockPc::create(&op, partition, opts).unwrap();
    let builds = |pc: &BlockPc| pc.pool().get(0).and_then(KspContext::amg).map(Amg::hierarchy_builds);
    assert_eq!(builds(&pc), Some(1));

    pc.set_up(&op.scaled(1.5)).unwrap();
    pc.set_up(&op).unwrap();
    assert_eq!(builds(&pc), Some(1));

    // one V-cycle per field-0 solve still yields a finite, nonzero correction
    let x = vec![1.0; op.nrows()];
    let mut y = vec![0.0; op.nrows()];
    pc.apply(&x, &mut y).unwrap();
    assert!(y.iter().all(|v| v.is_finite()));
    assert!(norm(&y[..80]) > 0.0);
}

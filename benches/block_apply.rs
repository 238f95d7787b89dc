use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kryst_block::config::{BlockPcOptions, FieldOptions, SchemeKind, SolveType};
use kryst_block::context::BlockPc;
use kryst_block::matrix::{CsrMatrix, FieldPartition};

/// Three-field operator: 1D Laplacians on the diagonal, identity-like couplings off it.
fn three_field(n: usize) -> (CsrMatrix, FieldPartition) {
    let mut triplets = Vec::new();
    for f in 0..3 {
        let off = f * n;
        for i in 0..n {
            triplets.push((off + i, off + i, 4.0 + f as f64));
            if i + 1 < n {
                triplets.push((off + i, off + i + 1, -1.0));
                triplets.push((off + i + 1, off + i, -1.0));
            }
            for g in (0..3).filter(|&g| g != f) {
                triplets.push((off + i, g * n + i, 0.3));
            }
        }
    }
    let op = CsrMatrix::from_triplets(3 * n, 3 * n, &triplets).unwrap();
    (op, FieldPartition::from_sizes(&[n, n, n]))
}

fn bench_block_pc(c: &mut Criterion) {
    let n = 200;
    let (op, partition) = three_field(n);
    let fields = vec![
        FieldOptions::amg(SolveType::PreOnly),
        FieldOptions::direct(),
        FieldOptions::direct(),
    ];
    let opts = BlockPcOptions::new(SchemeKind::Schur3x3, fields);
    let mut pc = BlockPc::create(&op, partition, opts).unwrap();
    let x: Vec<f64> = (0..3 * n).map(|i| (i as f64).sin()).collect();
    let mut y = vec![0.0; 3 * n];

    c.bench_function("schur3x3 setup", |ben| {
        ben.iter(|| pc.set_up(black_box(&op)).unwrap())
    });

    c.bench_function("schur3x3 apply", |ben| {
        ben.iter(|| pc.apply(black_box(&x), black_box(&mut y)).unwrap())
    });
}

criterion_group!(benches, bench_block_pc);
criterion_main!(benches);

//! Block preconditioners for multi-field saddle-point systems.
//!
//! The global operator is split by a [`FieldPartition`] into blocks. Each scheme extracts the
//! blocks it needs, forms approximate Schur complements from cheap diagonal inverses, binds one
//! inner solver per field and chains inner solves with block mat-vecs in `apply`.
//!
//! | scheme | fields | action |
//! |---|---|---|
//! | `schur2x2` | 2 | Schur reduction, A → Smod → A |
//! | `simple2x2` | 2 | as `schur2x2`, last solve replaced by `y1 -= Adinv·Bt·y2` |
//! | `schur3x3` | 3 | Schur reduction, A → Smod → Wmod → Smod → A |
//! | `schur4x4` | 4 | symmetric block Gauss-Seidel of field 3 around a `schur3x3` core |
//! | `bgsschur4x4` | 4 | one-sided block Gauss-Seidel around a `schur3x3` core |
//! | `bgs2x2` | 2 | lower block Gauss-Seidel |
//! | `jacobi2x2` | 2 | block Jacobi |

pub mod alternatives;
pub mod arena;
pub mod nested;
pub mod scaling;
pub mod schur;

pub use alternatives::{Bgs2x2, Jacobi2x2};
pub use arena::{BlockArena, BlockMatrices, BlockName, Blocks, Level, WorkVectors};
pub use nested::{NestedVariant, Schur4x4};
pub use scaling::{ApproximateInverse, ScalingStrategy};
pub use schur::{Schur2x2, Schur3x3};

use crate::config::{BlockPcOptions, SchemeKind};
use crate::context::ksp_context::InnerSolverPool;
use crate::error::KError;
use crate::matrix::{CsrMatrix, FieldPartition};

/// A block preconditioning scheme over a fixed field partition.
pub trait BlockScheme {
    fn kind(&self) -> SchemeKind;

    fn partition(&self) -> &FieldPartition;

    /// Blocks extracted from the operator at every setup.
    fn required_blocks(&self) -> Blocks;

    /// Re-extract blocks from `op`, recompute derived matrices and re-bind the field solvers.
    fn setup(&mut self, op: &CsrMatrix, pool: &mut InnerSolverPool) -> Result<(), KError>;

    /// y ≈ op⁻¹ x
    fn apply(&mut self, pool: &mut InnerSolverPool, x: &[f64], y: &mut [f64]) -> Result<(), KError>;

    /// Matrices held at nesting `level`, if this scheme has such a level.
    fn matrices(&self, level: Level) -> Option<&BlockMatrices>;
}

/// z = x − M·y
pub(crate) fn residual_into(m: &CsrMatrix, x: &[f64], y: &[f64], z: &mut [f64]) {
    z.copy_from_slice(x);
    m.spmv_add(-1.0, y, z);
}

/// Construct the scheme selected by `opts` over `partition`.
pub fn build_scheme(
    partition: FieldPartition,
    opts: &BlockPcOptions,
) -> Result<Box<dyn BlockScheme>, KError> {
    let scaling = &opts.schur_block_scaling;
    let strict = opts.strict_finite;
    let scheme: Box<dyn BlockScheme> = match opts.scheme {
        SchemeKind::Schur2x2 => Box::new(Schur2x2::new(partition, scaling, strict)?),
        SchemeKind::Simple2x2 => Box::new(Schur2x2::simple(partition, scaling, strict)?),
        SchemeKind::Schur3x3 => Box::new(Schur3x3::new(partition, scaling, strict)?),
        SchemeKind::Schur4x4 => Box::new(Schur4x4::new(
            partition,
            scaling,
            strict,
            NestedVariant::Symmetric,
        )?),
        SchemeKind::BgsSchur4x4 => Box::new(Schur4x4::new(
            partition,
            scaling,
            strict,
            NestedVariant::OneSided,
        )?),
        SchemeKind::Bgs2x2 => Box::new(Bgs2x2::new(partition)?),
        SchemeKind::Jacobi2x2 => Box::new(Jacobi2x2::new(partition)?),
    };
    Ok(scheme)
}

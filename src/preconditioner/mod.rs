//! Preconditioners for linear solvers.
//!
//! This module defines the Preconditioner trait and includes the aggregation AMG used by the
//! field solvers and the block schemes for multi-field operators.

use crate::error::KError;

/// A preconditioner M ≈ A⁻¹.
pub trait Preconditioner<M, V> {
    /// Apply M⁻¹ to r, writing z = M⁻¹ r
    fn apply(&self, r: &V, z: &mut V) -> Result<(), KError>;
    /// Optionally: setup/factorize from A
    fn setup(&mut self, _a: &M) -> Result<(), KError> { Ok(()) }
}

/// A preconditioner whose action M⁻¹ may change at every iteration.
pub trait FlexiblePreconditioner<M, V> {
    /// Given the current residual `r`, produce `z ≈ Mₖ⁻¹ r`.
    fn apply(&mut self, r: &V, z: &mut V) -> Result<(), KError>;
}

pub mod amg;
pub mod block;

pub use amg::{Amg, AmgOptions};
pub use block::{
    build_scheme, Bgs2x2, BlockName, BlockScheme, Jacobi2x2, Level, NestedVariant, Schur2x2,
    Schur3x3, Schur4x4, ScalingStrategy,
};

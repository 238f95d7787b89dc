//! kryst-block: block preconditioners for multi-field sparse systems, PETSc-style over Faer
//!
//! The operator's unknowns are split into fields by a [`FieldPartition`]. A [`BlockPc`]
//! extracts the field blocks, builds approximate Schur complements from diagonal inverses,
//! binds one inner solver (direct LU, or AMG applied once or inside GMRES/FGMRES) per field
//! and applies a Schur reduction, nested Schur, block Gauss-Seidel or block Jacobi scheme.

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod matrix;
pub mod preconditioner;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use config::*;
pub use context::*;
pub use crate::core::*;
pub use error::*;
pub use matrix::*;
pub use preconditioner::*;
pub use solver::*;

// Re-export SolveStats at the crate root for convenience
pub use utils::convergence::SolveStats;

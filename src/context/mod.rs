//! Context module: lifecycle objects wrapping solvers and preconditioners.
//!
//! Modules:
//! - [`ksp_context`]: `KspContext`, one inner solver bound to one field block, and the
//!   per-field `InnerSolverPool`.
//! - [`pc_context`]: `BlockPc`, the block preconditioner callers create, set up, apply and
//!   destroy.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems. SIAM.
//! - PETSc documentation: https://petsc.org/release/docs/manualpages/PC/PCFIELDSPLIT.html

pub mod ksp_context;
pub use ksp_context::{InnerSolverPool, KspContext};
pub mod pc_context;
pub use pc_context::BlockPc;

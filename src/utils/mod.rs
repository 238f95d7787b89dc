//! Convergence bookkeeping shared by the Krylov kernels.

pub mod convergence;

pub use convergence::{Convergence, SolveStats};

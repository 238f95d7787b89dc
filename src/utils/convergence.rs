//! Convergence tracking & tolerance checks for iterative solvers.

/// Stopping criteria & stats.
///
/// An iteration stops once `‖r‖ ≤ max(rtol · ‖r₀‖, atol)` or after `max_iters` steps.
#[derive(Clone, Debug)]
pub struct Convergence<T> {
    pub rtol: T,
    pub atol: T,
    pub max_iters: usize,
}

#[derive(Clone, Debug)]
pub struct SolveStats<T> {
    pub iterations: usize,
    pub final_residual: T,
    pub converged: bool,
}

impl<T: Copy + num_traits::Float> Convergence<T> {
    /// Relative tolerance only.
    pub fn new(rtol: T, max_iters: usize) -> Self {
        Self { rtol, atol: T::zero(), max_iters }
    }

    pub fn with_atol(mut self, atol: T) -> Self {
        self.atol = atol;
        self
    }

    /// Returns (should_stop, stats) given current `res_norm` and iteration `i`.
    pub fn check(&self, res_norm: T, res0_norm: T, i: usize) -> (bool, SolveStats<T>) {
        let converged = res_norm <= (self.rtol * res0_norm).max(self.atol);
        let stop = converged || i >= self.max_iters;
        (
            stop,
            SolveStats {
                iterations: i,
                final_residual: res_norm,
                converged,
            },
        )
    }
}

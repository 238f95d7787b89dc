//! Block preconditioner context.
//!
//! `BlockPc` is the lifecycle object callers hold: it validates the configuration against
//! the field partition, owns one inner solver per field and the selected block scheme, and
//! dispatches `set_up` / `apply` to that scheme.
//!
//! # Example
//!
//! ```rust
//! use kryst_block::config::{BlockPcOptions, FieldOptions, SchemeKind};
//! use kryst_block::context::BlockPc;
//! use kryst_block::matrix::{CsrMatrix, FieldPartition};
//!
//! let op = CsrMatrix::from_fn(4, 4, |i, j| if i == j { 4.0 } else if i + 2 == j || j + 2 == i { 1.0 } else { 0.0 });
//! let opts = BlockPcOptions::new(SchemeKind::Schur2x2, vec![FieldOptions::direct(); 2]);
//! let mut pc = BlockPc::create(&op, FieldPartition::from_sizes(&[2, 2]), opts).unwrap();
//! let mut y = vec![0.0; 4];
//! pc.apply(&[1.0, 0.0, 0.0, 0.0], &mut y).unwrap();
//! pc.destroy();
//! ```

use crate::config::BlockPcOptions;
use crate::context::ksp_context::InnerSolverPool;
use crate::error::KError;
use crate::matrix::{CsrMatrix, FieldPartition};
use crate::preconditioner::block::{build_scheme, BlockName, BlockScheme, Level};
use crate::preconditioner::FlexiblePreconditioner;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct BlockPc {
    opts: BlockPcOptions,
    partition: FieldPartition,
    pool: InnerSolverPool,
    scheme: Box<dyn BlockScheme>,
    setups: usize,
    /// False after a failed setup: field solvers may be bound to a mix of operators.
    ready: bool,
}

impl BlockPc {
    /// Validate `opts` against `partition` and `op`, build the field solvers and the scheme,
    /// and run the first setup.
    ///
    /// Configuration errors are raised before any block is extracted.
    pub fn create(
        op: &CsrMatrix,
        partition: FieldPartition,
        opts: BlockPcOptions,
    ) -> Result<Self, KError> {
        let fields = opts.validate()?;
        partition.require(opts.scheme.name(), fields)?;
        let pool = InnerSolverPool::new(&opts.fields)?;
        let scheme = build_scheme(partition.clone(), &opts)?;
        info!(
            scheme = %opts.scheme,
            fields = ?partition.sizes(),
            "created block preconditioner"
        );
        let mut pc = Self {
            opts,
            partition,
            pool,
            scheme,
            setups: 0,
            ready: false,
        };
        pc.set_up(op)?;
        Ok(pc)
    }

    /// Re-extract blocks from `op`, recompute the Schur matrices and re-bind the field solvers.
    ///
    /// On failure `apply` returns [`KError::NotSetUp`] until a later setup succeeds.
    pub fn set_up(&mut self, op: &CsrMatrix) -> Result<(), KError> {
        let n = self.partition.total();
        for found in [op.nrows(), op.ncols()] {
            if found != n {
                return Err(KError::DimensionMismatch { expected: n, found });
            }
        }
        self.ready = false;
        let start = Instant::now();
        if let Err(e) = self.scheme.setup(op, &mut self.pool) {
            warn!(scheme = %self.opts.scheme, error = %e, "PREC setup failed");
            return Err(e);
        }
        self.ready = true;
        self.setups += 1;
        let elapsed = start.elapsed();
        if self.opts.print_enhanced {
            info!(scheme = %self.opts.scheme, te = ?elapsed, "PREC setup");
        } else {
            debug!(scheme = %self.opts.scheme, te = ?elapsed, "PREC setup");
        }
        Ok(())
    }

    /// y ≈ op⁻¹ x
    pub fn apply(&mut self, x: &[f64], y: &mut [f64]) -> Result<(), KError> {
        let n = self.partition.total();
        for found in [x.len(), y.len()] {
            if found != n {
                return Err(KError::DimensionMismatch { expected: n, found });
            }
        }
        if !self.ready {
            return Err(KError::NotSetUp);
        }
        self.scheme.apply(&mut self.pool, x, y)
    }

    /// Release the scheme, its matrices and the field solvers.
    pub fn destroy(self) {
        debug!(scheme = %self.opts.scheme, setups = self.setups, "destroyed block preconditioner");
    }

    /// Printing is not supported; kept for interface conformance.
    pub fn view(&self) {}

    /// Options are fixed at creation; kept for interface conformance.
    pub fn set_from_options(&mut self) {}

    pub fn options(&self) -> &BlockPcOptions {
        &self.opts
    }

    pub fn partition(&self) -> &FieldPartition {
        &self.partition
    }

    pub fn scheme(&self) -> &dyn BlockScheme {
        self.scheme.as_ref()
    }

    pub fn pool(&self) -> &InnerSolverPool {
        &self.pool
    }

    /// True once a setup has succeeded and no later one has failed.
    pub fn is_set_up(&self) -> bool {
        self.ready
    }

    /// Number of completed setups, including the one run by `create`.
    pub fn setup_count(&self) -> usize {
        self.setups
    }

    /// Extracted or derived matrix `name` of the scheme at nesting `level`.
    pub fn block(&self, level: Level, name: BlockName) -> Option<&CsrMatrix> {
        self.scheme.matrices(level)?.get(name).ok()
    }
}

impl FlexiblePreconditioner<CsrMatrix, Vec<f64>> for BlockPc {
    fn apply(&mut self, r: &Vec<f64>, z: &mut Vec<f64>) -> Result<(), KError> {
        BlockPc::apply(self, r, z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldOptions, SchemeKind};

    fn saddle(n: usize) -> CsrMatrix {
        CsrMatrix::from_fn(2 * n, 2 * n, |i, j| match (i, j) {
            (i, j) if i == j && i < n => 4.0,
            (i, j) if i == j => 3.0,
            (i, j) if i + n == j || j + n == i => 1.0,
            _ => 0.0,
        })
    }

    #[test]
    fn configuration_errors_precede_setup() {
        let op = saddle(2);
        let opts = BlockPcOptions::new(SchemeKind::Schur3x3, vec![FieldOptions::direct(); 3]);
        let err = BlockPc::create(&op, FieldPartition::from_sizes(&[2, 2]), opts).err();
        assert!(matches!(err, Some(KError::FieldCountMismatch { expected: 3, found: 2, .. })));
    }

    #[test]
    fn operator_size_is_checked() {
        let opts = BlockPcOptions::new(SchemeKind::Jacobi2x2, vec![FieldOptions::direct(); 2]);
        let err = BlockPc::create(&saddle(3), FieldPartition::from_sizes(&[2, 2]), opts).err();
        assert_eq!(err, Some(KError::DimensionMismatch { expected: 4, found: 6 }));
    }

    #[test]
    fn lifecycle_counts_setups_and_exposes_blocks() {
        let op = saddle(2);
        let opts = BlockPcOptions::new(SchemeKind::Schur2x2, vec![FieldOptions::direct(); 2]);
        let mut pc = BlockPc::create(&op, FieldPartition::from_sizes(&[2, 2]), opts).unwrap();
        pc.view();
        pc.set_from_options();
        pc.set_up(&op).unwrap();
        assert_eq!(pc.setup_count(), 2);
        let smod = pc.block(Level::TOP, BlockName::Smod).unwrap();
        assert!((smod.get(0, 0) - 2.75).abs() < 1e-14);
        assert!(pc.block(Level(1), BlockName::A).is_none());

        let mut y = vec![0.0; 3];
        assert!(matches!(
            pc.apply(&[1.0; 4], &mut y),
            Err(KError::DimensionMismatch { expected: 4, found: 3 })
        ));
        pc.destroy();
    }
}

//! Four-field scheme: block Gauss-Seidel on field 3 around a three-field Schur core.
//!
//! Fields 0, 1 and 2 form the composite block K, which the core [`Schur3x3`] treats as its
//! whole operator. With G the field-3 diagonal block, Ft the composite-to-field-3 coupling
//! and F its transpose position:
//!
//! - one-sided: `y4 = G⁻¹x4`, `y123 = core(x123 − Ft·y4)`
//! - symmetric: as one-sided, followed by `y4 = G⁻¹(x4 − F·y123)`

use crate::config::{ScalingLevels, SchemeKind};
use crate::context::ksp_context::InnerSolverPool;
use crate::error::KError;
use crate::matrix::{CsrMatrix, FieldPartition, IndexSet};
use crate::preconditioner::block::arena::{BlockArena, BlockMatrices, BlockName, Blocks, Level};
use crate::preconditioner::block::schur::Schur3x3;
use crate::preconditioner::block::{residual_into, BlockScheme};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NestedVariant {
    /// G-solve before and after the core.
    Symmetric,
    /// G-solve before the core only; F is never extracted.
    OneSided,
}

pub struct Schur4x4 {
    partition: FieldPartition,
    composite: IndexSet,
    core: Schur3x3,
    variant: NestedVariant,
    arena: BlockArena<2>,
}

impl Schur4x4 {
    pub fn new(
        partition: FieldPartition,
        scaling: &ScalingLevels,
        strict: bool,
        variant: NestedVariant,
    ) -> Result<Self, KError> {
        let kind = match variant {
            NestedVariant::Symmetric => SchemeKind::Schur4x4,
            NestedVariant::OneSided => SchemeKind::BgsSchur4x4,
        };
        partition.require(kind.name(), 4)?;
        let (composite, core_partition) = partition.restrict(&[0, 1, 2])?;
        let core = Schur3x3::at_level(core_partition, scaling, strict, Level::TOP.nested())?;
        let arena = BlockArena::new(Level::TOP, [composite.len(), partition.field(3).len()]);
        Ok(Self {
            partition,
            composite,
            core,
            variant,
            arena,
        })
    }

    pub fn variant(&self) -> NestedVariant {
        self.variant
    }

    pub fn core(&self) -> &Schur3x3 {
        &self.core
    }
}

impl BlockScheme for Schur4x4 {
    fn kind(&self) -> SchemeKind {
        match self.variant {
            NestedVariant::Symmetric => SchemeKind::Schur4x4,
            NestedVariant::OneSided => SchemeKind::BgsSchur4x4,
        }
    }

    fn partition(&self) -> &FieldPartition {
        &self.partition
    }

    fn required_blocks(&self) -> Blocks {
        match self.variant {
            NestedVariant::Symmetric => Blocks::NESTED_SYMMETRIC,
            NestedVariant::OneSided => Blocks::NESTED_ONE_SIDED,
        }
    }

    fn setup(&mut self, op: &CsrMatrix, pool: &mut InnerSolverPool) -> Result<(), KError> {
        let mats = BlockMatrices::extract(self.arena.level(), op, &self.partition, self.required_blocks())?;
        // the core binds fields 0..3 of the shared pool
        self.core.setup(mats.get(BlockName::K)?, pool)?;
        pool.bind(3, mats.shared(BlockName::G)?)?;
        self.arena.mats = mats;
        Ok(())
    }

    fn apply(&mut self, pool: &mut InnerSolverPool, x: &[f64], y: &mut [f64]) -> Result<(), KError> {
        let mats = &self.arena.mats;
        let work = &mut self.arena.work;
        let [x123, x4] = &mut work.x;
        let [y123, y4] = &mut work.y;
        let [z123, z4] = &mut work.z;
        self.composite.gather(x, x123);
        self.partition.field(3).gather(x, x4);

        pool.solve(3, x4, y4)?;
        residual_into(mats.get(BlockName::Ft)?, x123, y4, z123);
        self.core.apply(pool, z123, y123)?;

        if self.variant == NestedVariant::Symmetric {
            residual_into(mats.get(BlockName::F)?, x4, y123, z4);
            pool.solve(3, z4, y4)?;
        }

        self.composite.scatter(y123, y);
        self.partition.field(3).scatter(y4, y);
        Ok(())
    }

    fn matrices(&self, level: Level) -> Option<&BlockMatrices> {
        if level == self.arena.level() {
            Some(&self.arena.mats)
        } else {
            self.core.matrices(level)
        }
    }
}

//! Two-field schemes without Schur complements.

use crate::config::SchemeKind;
use crate::context::ksp_context::InnerSolverPool;
use crate::error::KError;
use crate::matrix::{CsrMatrix, FieldPartition};
use crate::preconditioner::block::arena::{BlockArena, BlockMatrices, BlockName, Blocks, Level};
use crate::preconditioner::block::{residual_into, BlockScheme};

/// Lower block Gauss-Seidel: `y1 = A⁻¹x1`, `y2 = C⁻¹(x2 − B·y1)`.
pub struct Bgs2x2 {
    partition: FieldPartition,
    arena: BlockArena<2>,
}

impl Bgs2x2 {
    pub fn new(partition: FieldPartition) -> Result<Self, KError> {
        partition.require(SchemeKind::Bgs2x2.name(), 2)?;
        Ok(Self {
            arena: BlockArena::for_partition(Level::TOP, &partition),
            partition,
        })
    }
}

impl BlockScheme for Bgs2x2 {
    fn kind(&self) -> SchemeKind {
        SchemeKind::Bgs2x2
    }

    fn partition(&self) -> &FieldPartition {
        &self.partition
    }

    fn required_blocks(&self) -> Blocks {
        Blocks::BGS_2X2
    }

    fn setup(&mut self, op: &CsrMatrix, pool: &mut InnerSolverPool) -> Result<(), KError> {
        let mats = BlockMatrices::extract(self.arena.level(), op, &self.partition, Blocks::BGS_2X2)?;
        pool.bind(0, mats.shared(BlockName::A)?)?;
        pool.bind(1, mats.shared(BlockName::C)?)?;
        self.arena.mats = mats;
        Ok(())
    }

    fn apply(&mut self, pool: &mut InnerSolverPool, x: &[f64], y: &mut [f64]) -> Result<(), KError> {
        let mats = &self.arena.mats;
        let work = &mut self.arena.work;
        let [x1, x2] = &mut work.x;
        let [y1, y2] = &mut work.y;
        let [_, z2] = &mut work.z;
        self.partition.field(0).gather(x, x1);
        self.partition.field(1).gather(x, x2);

        pool.solve(0, x1, y1)?;
        residual_into(mats.get(BlockName::B)?, x2, y1, z2);
        pool.solve(1, z2, y2)?;

        self.partition.field(0).scatter(y1, y);
        self.partition.field(1).scatter(y2, y);
        Ok(())
    }

    fn matrices(&self, level: Level) -> Option<&BlockMatrices> {
        (level == self.arena.level()).then_some(&self.arena.mats)
    }
}

/// Block Jacobi: the two field solves are independent.
pub struct Jacobi2x2 {
    partition: FieldPartition,
    arena: BlockArena<2>,
}

impl Jacobi2x2 {
    pub fn new(partition: FieldPartition) -> Result<Self, KError> {
        partition.require(SchemeKind::Jacobi2x2.name(), 2)?;
        Ok(Self {
            arena: BlockArena::for_partition(Level::TOP, &partition),
            partition,
        })
    }
}

impl BlockScheme for Jacobi2x2 {
    fn kind(&self) -> SchemeKind {
        SchemeKind::Jacobi2x2
    }

    fn partition(&self) -> &FieldPartition {
        &self.partition
    }

    fn required_blocks(&self) -> Blocks {
        Blocks::JACOBI_2X2
    }

    fn setup(&mut self, op: &CsrMatrix, pool: &mut InnerSolverPool) -> Result<(), KError> {
        let mats = BlockMatrices::extract(self.arena.level(), op, &self.partition, Blocks::JACOBI_2X2)?;
        pool.bind(0, mats.shared(BlockName::A)?)?;
        pool.bind(1, mats.shared(BlockName::C)?)?;
        self.arena.mats = mats;
        Ok(())
    }

    fn apply(&mut self, pool: &mut InnerSolverPool, x: &[f64], y: &mut [f64]) -> Result<(), KError> {
        let work = &mut self.arena.work;
        for f in 0..2 {
            self.partition.field(f).gather(x, &mut work.x[f]);
            pool.solve(f, &work.x[f], &mut work.y[f])?;
            self.partition.field(f).scatter(&work.y[f], y);
        }
        Ok(())
    }

    fn matrices(&self, level: Level) -> Option<&BlockMatrices> {
        (level == self.arena.level()).then_some(&self.arena.mats)
    }
}

//! Schur complement reductions for two and three fields.
//!
//! With the blocks of the operator named
//!
//! ```text
//! [ A   Bt  Dt ]
//! [ B   C   Et ]
//! [ D   E   R  ]
//! ```
//!
//! the exact inverse of A inside the Schur complements is replaced by a diagonal
//! approximation `Adinv` (see [`ScalingStrategy`]):
//!
//! - `Smod = C − B·Adinv·Bt`
//! - `Tmod = Et − B·Adinv·Dt`
//! - `Wmod = R − D·Adinv·Dt − E·Smoddinv·Tmod + D·Adinv·Bt·Smoddinv·Tmod`
//!
//! where `Smoddinv` approximates `Smod⁻¹` with the second scaling level.

use crate::config::{ScalingLevels, SchemeKind};
use crate::context::ksp_context::InnerSolverPool;
use crate::error::KError;
use crate::matrix::{CsrMatrix, FieldPartition};
use crate::preconditioner::block::arena::{BlockArena, BlockMatrices, BlockName, Blocks, Level};
use crate::preconditioner::block::scaling::ScalingStrategy;
use crate::preconditioner::block::{residual_into, BlockScheme};

/// Two-field Schur reduction.
pub struct Schur2x2 {
    partition: FieldPartition,
    scaling: ScalingStrategy,
    strict: bool,
    simple: bool,
    arena: BlockArena<2>,
}

impl Schur2x2 {
    pub fn new(partition: FieldPartition, scaling: &ScalingLevels, strict: bool) -> Result<Self, KError> {
        partition.require(SchemeKind::Schur2x2.name(), 2)?;
        Ok(Self {
            arena: BlockArena::for_partition(Level::TOP, &partition),
            partition,
            scaling: scaling.level(0).into(),
            strict,
            simple: false,
        })
    }

    /// SIMPLE variant: the final A-solve is replaced by `y1 -= Adinv·Bt·y2`.
    pub fn simple(partition: FieldPartition, scaling: &ScalingLevels, strict: bool) -> Result<Self, KError> {
        partition.require(SchemeKind::Simple2x2.name(), 2)?;
        let mut scheme = Self::new(partition, scaling, strict)?;
        scheme.simple = true;
        Ok(scheme)
    }

    pub fn arena(&self) -> &BlockArena<2> {
        &self.arena
    }
}

impl BlockScheme for Schur2x2 {
    fn kind(&self) -> SchemeKind {
        if self.simple {
            SchemeKind::Simple2x2
        } else {
            SchemeKind::Schur2x2
        }
    }

    fn partition(&self) -> &FieldPartition {
        &self.partition
    }

    fn required_blocks(&self) -> Blocks {
        Blocks::SCHUR_2X2
    }

    fn setup(&mut self, op: &CsrMatrix, pool: &mut InnerSolverPool) -> Result<(), KError> {
        let mut mats = BlockMatrices::extract(self.arena.level(), op, &self.partition, Blocks::SCHUR_2X2)?;

        let adinv = self.scaling.approximate_checked(mats.get(BlockName::A)?, "Adinv", self.strict)?;
        let adinv_bt = adinv.left_mul(mats.get(BlockName::Bt)?);
        let b_adinv_bt = mats.get(BlockName::B)?.matmul(&adinv_bt)?;
        let smod = mats.get(BlockName::C)?.add(-1.0, &b_adinv_bt)?;

        mats.set_inverse(BlockName::A, adinv);
        mats.insert(BlockName::AdinvBt, adinv_bt);
        mats.insert(BlockName::Smod, smod);

        pool.bind(0, mats.shared(BlockName::A)?)?;
        pool.bind(1, mats.shared(BlockName::Smod)?)?;
        self.arena.mats = mats;
        Ok(())
    }

    fn apply(&mut self, pool: &mut InnerSolverPool, x: &[f64], y: &mut [f64]) -> Result<(), KError> {
        let mats = &self.arena.mats;
        let work = &mut self.arena.work;
        let [x1, x2] = &mut work.x;
        let [y1, y2] = &mut work.y;
        let [z1, z2] = &mut work.z;
        self.partition.field(0).gather(x, x1);
        self.partition.field(1).gather(x, x2);

        // 1) A y1 = x1
        pool.solve(0, x1, y1)?;
        // 2) Smod y2 = x2 - B y1
        residual_into(mats.get(BlockName::B)?, x2, y1, z2);
        pool.solve(1, z2, y2)?;

        if self.simple {
            // 3) y1 -= Adinv Bt y2
            mats.get(BlockName::AdinvBt)?.spmv_add(-1.0, y2, y1);
        } else {
            // 3) A y1 = x1 - Bt y2
            residual_into(mats.get(BlockName::Bt)?, x1, y2, z1);
            pool.solve(0, z1, y1)?;
        }

        self.partition.field(0).scatter(y1, y);
        self.partition.field(1).scatter(y2, y);
        Ok(())
    }

    fn matrices(&self, level: Level) -> Option<&BlockMatrices> {
        (level == self.arena.level()).then_some(&self.arena.mats)
    }
}

/// Three-field Schur reduction with five inner solves A → Smod → Wmod → Smod → A.
pub struct Schur3x3 {
    partition: FieldPartition,
    scaling: [ScalingStrategy; 2],
    strict: bool,
    arena: BlockArena<3>,
}

impl Schur3x3 {
    pub fn new(partition: FieldPartition, scaling: &ScalingLevels, strict: bool) -> Result<Self, KError> {
        Self::at_level(partition, scaling, strict, Level::TOP)
    }

    /// Scheme whose arena is tagged with `level`; used when nested inside a larger scheme.
    pub fn at_level(
        partition: FieldPartition,
        scaling: &ScalingLevels,
        strict: bool,
        level: Level,
    ) -> Result<Self, KError> {
        partition.require(SchemeKind::Schur3x3.name(), 3)?;
        Ok(Self {
            arena: BlockArena::for_partition(level, &partition),
            partition,
            scaling: [scaling.level(0).into(), scaling.level(1).into()],
            strict,
        })
    }

    pub fn arena(&self) -> &BlockArena<3> {
        &self.arena
    }
}

impl BlockScheme for Schur3x3 {
    fn kind(&self) -> SchemeKind {
        SchemeKind::Schur3x3
    }

    fn partition(&self) -> &FieldPartition {
        &self.partition
    }

    fn required_blocks(&self) -> Blocks {
        Blocks::SCHUR_3X3
    }

    fn setup(&mut self, op: &CsrMatrix, pool: &mut InnerSolverPool) -> Result<(), KError> {
        use BlockName::*;
        let mut mats = BlockMatrices::extract(self.arena.level(), op, &self.partition, Blocks::SCHUR_3X3)?;

        let adinv = self.scaling[0].approximate_checked(mats.get(A)?, "Adinv", self.strict)?;
        let adinv_bt = adinv.left_mul(mats.get(Bt)?);
        let adinv_dt = adinv.left_mul(mats.get(Dt)?);

        let smod = mats.get(C)?.add(-1.0, &mats.get(B)?.matmul(&adinv_bt)?)?;
        let tmod = mats.get(Et)?.add(-1.0, &mats.get(B)?.matmul(&adinv_dt)?)?;

        let smoddinv = self.scaling[1].approximate_checked(&smod, "Smoddinv", self.strict)?;
        let smoddinv_tmod = smoddinv.left_mul(&tmod);
        let dbt = mats.get(D)?.matmul(&adinv_bt)?;

        let d_adinv_dt = mats.get(D)?.matmul(&adinv_dt)?;
        let e_smoddinv_tmod = mats.get(E)?.matmul(&smoddinv_tmod)?;
        let d_adinv_bt_smoddinv_tmod = dbt.matmul(&smoddinv_tmod)?;
        let wmod = mats
            .get(R)?
            .add(-1.0, &d_adinv_dt)?
            .add(-1.0, &e_smoddinv_tmod)?
            .add(1.0, &d_adinv_bt_smoddinv_tmod)?;

        mats.set_inverse(A, adinv);
        mats.set_inverse(Smod, smoddinv);
        mats.insert(AdinvBt, adinv_bt);
        mats.insert(Smod, smod);
        mats.insert(Tmod, tmod);
        mats.insert(Wmod, wmod);
        mats.insert(DBt, dbt);

        pool.bind(0, mats.shared(A)?)?;
        pool.bind(1, mats.shared(Smod)?)?;
        pool.bind(2, mats.shared(Wmod)?)?;
        self.arena.mats = mats;
        Ok(())
    }

    fn apply(&mut self, pool: &mut InnerSolverPool, x: &[f64], y: &mut [f64]) -> Result<(), KError> {
        use BlockName::*;
        let mats = &self.arena.mats;
        let work = &mut self.arena.work;
        let [x1, x2, x3] = &mut work.x;
        let [y1, y2, y3] = &mut work.y;
        let [z1, z2, z3] = &mut work.z;
        self.partition.field(0).gather(x, x1);
        self.partition.field(1).gather(x, x2);
        self.partition.field(2).gather(x, x3);

        // 1) A y1 = x1
        pool.solve(0, x1, y1)?;

        // 2) Smod y2 = x2 - B y1
        residual_into(mats.get(B)?, x2, y1, z2);
        pool.solve(1, z2, y2)?;

        // 3) Wmod y3 = x3 - D y1 + DBt y2 - E y2
        residual_into(mats.get(D)?, x3, y1, z3);
        mats.get(DBt)?.spmv_add(1.0, y2, z3);
        mats.get(E)?.spmv_add(-1.0, y2, z3);
        pool.solve(2, z3, y3)?;

        // 4) Smod y2 = x2 - B y1 - Tmod y3
        residual_into(mats.get(B)?, x2, y1, z2);
        mats.get(Tmod)?.spmv_add(-1.0, y3, z2);
        pool.solve(1, z2, y2)?;

        // 5) A y1 = x1 - Bt y2 - Dt y3
        residual_into(mats.get(Bt)?, x1, y2, z1);
        mats.get(Dt)?.spmv_add(-1.0, y3, z1);
        pool.solve(0, z1, y1)?;

        self.partition.field(0).scatter(y1, y);
        self.partition.field(1).scatter(y2, y);
        self.partition.field(2).scatter(y3, y);
        Ok(())
    }

    fn matrices(&self, level: Level) -> Option<&BlockMatrices> {
        (level == self.arena.level()).then_some(&self.arena.mats)
    }
}

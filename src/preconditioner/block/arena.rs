//! Storage for extracted blocks, derived Schur matrices and per-field work vectors.
//!
//! Every scheme owns one arena. Matrices are keyed by [`BlockName`] and tagged with the
//! nesting [`Level`] of the owning scheme, so a nested scheme and its core can both be
//! inspected through `(level, name)`. Matrices bound to field solvers are held behind
//! `Arc` and shared with the solver instead of copied.

use crate::error::KError;
use crate::matrix::{CsrMatrix, FieldPartition, IndexSet};
use crate::core::traits::SubmatrixExtract;
use crate::preconditioner::block::scaling::ApproximateInverse;
use bitflags::bitflags;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

bitflags! {
    /// Set of blocks a scheme extracts from the global operator.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Blocks: u32 {
        const A  = 1 << 0;
        const BT = 1 << 1;
        const B  = 1 << 2;
        const C  = 1 << 3;
        const DT = 1 << 4;
        const ET = 1 << 5;
        const D  = 1 << 6;
        const E  = 1 << 7;
        const R  = 1 << 8;
        const G  = 1 << 9;
        const FT = 1 << 10;
        const F  = 1 << 11;
        /// Composite operator of fields 0, 1 and 2.
        const K  = 1 << 12;

        const SCHUR_2X2 = Self::A.bits() | Self::BT.bits() | Self::B.bits() | Self::C.bits();
        const SCHUR_3X3 = Self::SCHUR_2X2.bits() | Self::DT.bits() | Self::ET.bits()
            | Self::D.bits() | Self::E.bits() | Self::R.bits();
        const BGS_2X2 = Self::A.bits() | Self::B.bits() | Self::C.bits();
        const JACOBI_2X2 = Self::A.bits() | Self::C.bits();
        const NESTED_ONE_SIDED = Self::K.bits() | Self::G.bits() | Self::FT.bits();
        const NESTED_SYMMETRIC = Self::NESTED_ONE_SIDED.bits() | Self::F.bits();
    }
}

/// Nesting depth of the scheme owning an arena; the outermost scheme is `Level::TOP`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Level(pub u8);

impl Level {
    pub const TOP: Level = Level(0);

    pub fn nested(self) -> Level {
        Level(self.0 + 1)
    }
}

/// Row or column extent of an extracted block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Span {
    Field(usize),
    /// Sorted union of fields 0, 1 and 2.
    Composite,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockName {
    A,
    Bt,
    B,
    C,
    Dt,
    Et,
    D,
    E,
    R,
    G,
    Ft,
    F,
    K,
    /// diag-approximation of A⁻¹ times Bt
    AdinvBt,
    Smod,
    Tmod,
    Wmod,
    /// D · Adinv · Bt
    DBt,
}

impl BlockName {
    const EXTRACTED: [(BlockName, Blocks); 13] = [
        (BlockName::A, Blocks::A),
        (BlockName::Bt, Blocks::BT),
        (BlockName::B, Blocks::B),
        (BlockName::C, Blocks::C),
        (BlockName::Dt, Blocks::DT),
        (BlockName::Et, Blocks::ET),
        (BlockName::D, Blocks::D),
        (BlockName::E, Blocks::E),
        (BlockName::R, Blocks::R),
        (BlockName::G, Blocks::G),
        (BlockName::Ft, Blocks::FT),
        (BlockName::F, Blocks::F),
        (BlockName::K, Blocks::K),
    ];

    /// Rows and columns of an extracted block; `None` for derived matrices.
    pub fn extent(self) -> Option<(Span, Span)> {
        use Span::{Composite, Field};
        let e = match self {
            BlockName::A => (Field(0), Field(0)),
            BlockName::Bt => (Field(0), Field(1)),
            BlockName::B => (Field(1), Field(0)),
            BlockName::C => (Field(1), Field(1)),
            BlockName::Dt => (Field(0), Field(2)),
            BlockName::Et => (Field(1), Field(2)),
            BlockName::D => (Field(2), Field(0)),
            BlockName::E => (Field(2), Field(1)),
            BlockName::R => (Field(2), Field(2)),
            BlockName::G => (Field(3), Field(3)),
            BlockName::Ft => (Composite, Field(3)),
            BlockName::F => (Field(3), Composite),
            BlockName::K => (Composite, Composite),
            _ => return None,
        };
        Some(e)
    }

    /// Blocks named by `set`, in a fixed order.
    pub fn in_set(set: Blocks) -> impl Iterator<Item = BlockName> {
        Self::EXTRACTED
            .into_iter()
            .filter(move |(_, flag)| set.contains(*flag))
            .map(|(name, _)| name)
    }
}

impl fmt::Display for BlockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Named matrices and approximate inverses of one scheme level.
#[derive(Debug)]
pub struct BlockMatrices {
    level: Level,
    map: BTreeMap<BlockName, Arc<CsrMatrix>>,
    inverses: BTreeMap<BlockName, ApproximateInverse>,
}

impl BlockMatrices {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            map: BTreeMap::new(),
            inverses: BTreeMap::new(),
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn contains(&self, name: BlockName) -> bool {
        self.map.contains_key(&name)
    }

    pub fn get(&self, name: BlockName) -> Result<&CsrMatrix, KError> {
        self.map.get(&name).map(|m| m.as_ref()).ok_or(KError::NotSetUp)
    }

    /// Shared handle, for binding a field solver.
    pub fn shared(&self, name: BlockName) -> Result<Arc<CsrMatrix>, KError> {
        self.map.get(&name).cloned().ok_or(KError::NotSetUp)
    }

    pub fn insert(&mut self, name: BlockName, m: CsrMatrix) {
        self.map.insert(name, Arc::new(m));
    }

    /// Approximate inverse computed from block `of`.
    pub fn inverse(&self, of: BlockName) -> Result<&ApproximateInverse, KError> {
        self.inverses.get(&of).ok_or(KError::NotSetUp)
    }

    pub fn set_inverse(&mut self, of: BlockName, inv: ApproximateInverse) {
        self.inverses.insert(of, inv);
    }

    /// Fresh set holding every block in `required`, extracted from `op`.
    ///
    /// Schemes build into a fresh set and replace their arena's only once every derived
    /// matrix is computed, so a failed setup keeps the previous operator's matrices whole.
    pub fn extract(
        level: Level,
        op: &CsrMatrix,
        partition: &FieldPartition,
        required: Blocks,
    ) -> Result<Self, KError> {
        let mut mats = Self::new(level);
        let composite = required
            .intersects(Blocks::K | Blocks::FT | Blocks::F)
            .then(|| partition.union_of(&[0, 1, 2]));
        let select = |span: Span| -> Result<&IndexSet, KError> {
            match span {
                Span::Field(i) if i < partition.len() => Ok(partition.field(i)),
                Span::Field(i) => Err(KError::InvalidPartition(format!(
                    "block needs field {} but the partition has {}",
                    i,
                    partition.len()
                ))),
                Span::Composite => composite.as_ref().ok_or(KError::NotSetUp),
            }
        };
        for name in BlockName::in_set(required) {
            let Some((rows, cols)) = name.extent() else {
                continue;
            };
            let block = op.submatrix(select(rows)?.indices(), select(cols)?.indices())?;
            mats.insert(name, block);
        }
        Ok(mats)
    }
}

/// Scratch vectors, one per field: inputs `x`, outputs `y` and intermediates `z`.
#[derive(Debug)]
pub struct WorkVectors<const N: usize> {
    pub x: [Vec<f64>; N],
    pub y: [Vec<f64>; N],
    pub z: [Vec<f64>; N],
}

impl<const N: usize> WorkVectors<N> {
    pub fn new(sizes: [usize; N]) -> Self {
        Self {
            x: sizes.map(|n| vec![0.0; n]),
            y: sizes.map(|n| vec![0.0; n]),
            z: sizes.map(|n| vec![0.0; n]),
        }
    }
}

#[derive(Debug)]
pub struct BlockArena<const N: usize> {
    pub mats: BlockMatrices,
    pub work: WorkVectors<N>,
}

impl<const N: usize> BlockArena<N> {
    pub fn new(level: Level, sizes: [usize; N]) -> Self {
        Self {
            mats: BlockMatrices::new(level),
            work: WorkVectors::new(sizes),
        }
    }

    /// Arena sized after the first `N` fields of `partition`.
    pub fn for_partition(level: Level, partition: &FieldPartition) -> Self {
        Self::new(level, std::array::from_fn(|i| partition.field(i).len()))
    }

    pub fn level(&self) -> Level {
        self.mats.level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_sets_name_expected_blocks() {
        let names: Vec<_> = BlockName::in_set(Blocks::SCHUR_2X2).collect();
        assert_eq!(names, vec![BlockName::A, BlockName::Bt, BlockName::B, BlockName::C]);
        assert!(Blocks::NESTED_SYMMETRIC.contains(Blocks::F));
        assert!(!Blocks::NESTED_ONE_SIDED.contains(Blocks::F));
        assert_eq!(BlockName::in_set(Blocks::SCHUR_3X3).count(), 9);
    }

    #[test]
    fn extract_uses_partition_order() {
        // fields interleaved: 0 -> {0, 2}, 1 -> {1}
        let op = CsrMatrix::from_fn(3, 3, |i, j| (10 * i + j) as f64);
        let part = FieldPartition::new(
            3,
            vec![IndexSet::new(vec![0, 2]).unwrap(), IndexSet::new(vec![1]).unwrap()],
        )
        .unwrap();
        let mats = BlockMatrices::extract(Level::TOP, &op, &part, Blocks::SCHUR_2X2).unwrap();
        let a = mats.get(BlockName::A).unwrap();
        assert_eq!(a.get(0, 1), 2.0);
        assert_eq!(a.get(1, 0), 20.0);
        let bt = mats.get(BlockName::Bt).unwrap();
        assert_eq!((bt.nrows(), bt.ncols()), (2, 1));
        assert_eq!(bt.get(1, 0), 21.0);
        assert!(mats.get(BlockName::Smod).is_err());
    }

    #[test]
    fn composite_blocks_for_four_fields() {
        let op = CsrMatrix::from_fn(4, 4, |i, j| (1 + 4 * i + j) as f64);
        let part = FieldPartition::from_sizes(&[1, 1, 1, 1]);
        let mats = BlockMatrices::extract(Level(1), &op, &part, Blocks::NESTED_ONE_SIDED).unwrap();
        assert_eq!(mats.level(), Level(1));
        assert_eq!(mats.get(BlockName::K).unwrap().nrows(), 3);
        assert_eq!(mats.get(BlockName::Ft).unwrap().get(2, 0), 12.0);
        assert!(!mats.contains(BlockName::F));
    }
}

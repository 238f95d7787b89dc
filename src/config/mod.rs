//! Configuration surface of the block preconditioners.

pub mod options;

pub use options::{
    AmgType, BlockPcOptions, FieldOptions, PcType, ScalingLevels, ScalingMode, SchemeKind,
    SchurScaling, SolveType, StationaryKind,
};

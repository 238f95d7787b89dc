//! Configuration for block preconditioners and their per-field inner solvers.
//!
//! Every recognized option is enumerated here with its default, so that schemes read a
//! fully-populated struct instead of probing optional keys. All structs deserialize with
//! `serde` from any self-describing format; string-valued choices go through `FromStr`,
//! which makes an unknown string a `KError::UnknownOption` when parsed programmatically.

use crate::error::KError;
use serde::de::value::{MapAccessDeserializer, SeqAccessDeserializer};
use serde::de::{Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_enum {
    ($ty:ident, $option:literal) => {
        impl TryFrom<String> for $ty {
            type Error = KError;
            fn try_from(s: String) -> Result<Self, KError> {
                s.parse()
            }
        }

        impl From<$ty> for String {
            fn from(v: $ty) -> String {
                v.name().to_string()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl $ty {
            fn unknown(value: &str) -> KError {
                KError::UnknownOption {
                    option: $option,
                    value: value.to_string(),
                }
            }
        }
    };
}

/// Inner preconditioner backend of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PcType {
    /// Algebraic multigrid as the field's preconditioner.
    Amg,
    /// LU factorization, applied once.
    Direct,
}

impl PcType {
    pub fn name(&self) -> &'static str {
        match self {
            PcType::Amg => "amg",
            PcType::Direct => "direct",
        }
    }
}

impl FromStr for PcType {
    type Err = KError;
    fn from_str(s: &str) -> Result<Self, KError> {
        match s {
            "amg" => Ok(PcType::Amg),
            "direct" => Ok(PcType::Direct),
            _ => Err(Self::unknown(s)),
        }
    }
}

string_enum!(PcType, "prec");

/// Fixed-iteration stationary smoothers. Not a supported code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationaryKind {
    /// y ← y + P⁻¹(x − A y), a fixed number of times.
    Fixed,
    /// Same iteration on the Schur-reduced operator of the second field.
    FixedSchur,
}

/// How a field's inner system is solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SolveType {
    /// Apply the field preconditioner once.
    #[default]
    PreOnly,
    /// Restarted GMRES, right-preconditioned.
    Gmres,
    /// Flexible GMRES.
    Fgmres,
    /// Disabled; rejected when the field solver is constructed.
    Stationary(StationaryKind),
}

impl SolveType {
    pub fn name(&self) -> &'static str {
        match self {
            SolveType::PreOnly => "preonly",
            SolveType::Gmres => "gmres",
            SolveType::Fgmres => "fgmres",
            SolveType::Stationary(StationaryKind::Fixed) => "stat_iter_fixed",
            SolveType::Stationary(StationaryKind::FixedSchur) => "stat_iter_fixed_scr",
        }
    }

    /// False for variants that parse but cannot be constructed.
    pub const fn is_supported(&self) -> bool {
        !matches!(self, SolveType::Stationary(_))
    }

    pub const fn is_iterative(&self) -> bool {
        matches!(self, SolveType::Gmres | SolveType::Fgmres)
    }
}

impl FromStr for SolveType {
    type Err = KError;
    fn from_str(s: &str) -> Result<Self, KError> {
        match s {
            "preonly" => Ok(SolveType::PreOnly),
            "gmres" => Ok(SolveType::Gmres),
            "fgmres" => Ok(SolveType::Fgmres),
            "stat_iter_fixed" => Ok(SolveType::Stationary(StationaryKind::Fixed)),
            "stat_iter_fixed_scr" => Ok(SolveType::Stationary(StationaryKind::FixedSchur)),
            _ => Err(Self::unknown(s)),
        }
    }
}

string_enum!(SolveType, "solve");

/// Multigrid backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AmgType {
    /// Double-pairwise aggregation (the generic default).
    #[default]
    Pairwise,
    /// Single-pass greedy aggregation.
    Greedy,
}

impl AmgType {
    pub fn name(&self) -> &'static str {
        match self {
            AmgType::Pairwise => "pairwise",
            AmgType::Greedy => "greedy",
        }
    }
}

impl FromStr for AmgType {
    type Err = KError;
    fn from_str(s: &str) -> Result<Self, KError> {
        match s {
            "pairwise" | "hypre" | "gamg" => Ok(AmgType::Pairwise),
            "greedy" => Ok(AmgType::Greedy),
            _ => Err(Self::unknown(s)),
        }
    }
}

string_enum!(AmgType, "amgtype");

/// Approximate inverse used inside Schur complements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ScalingMode {
    /// Reciprocal of the main diagonal.
    #[default]
    Diag,
    /// Reciprocal of the absolute row sums.
    RowSum,
    /// All ones.
    None,
}

impl ScalingMode {
    pub fn name(&self) -> &'static str {
        match self {
            ScalingMode::Diag => "diag",
            ScalingMode::RowSum => "rowsum",
            ScalingMode::None => "none",
        }
    }
}

impl FromStr for ScalingMode {
    type Err = KError;
    fn from_str(s: &str) -> Result<Self, KError> {
        match s {
            "diag" => Ok(ScalingMode::Diag),
            "rowsum" => Ok(ScalingMode::RowSum),
            "none" => Ok(ScalingMode::None),
            _ => Err(Self::unknown(s)),
        }
    }
}

string_enum!(ScalingMode, "schur_block_scaling type");

/// Block preconditioning scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SchemeKind {
    /// Approximate block-LU with a modified Schur complement.
    Schur2x2,
    /// `Schur2x2` with the final field-0 solve replaced by a scaled update.
    Simple2x2,
    /// Nested two-level Schur reduction.
    Schur3x3,
    /// Symmetric block Gauss-Seidel of the 4th field around a 3-field Schur core.
    Schur4x4,
    /// One-sided block Gauss-Seidel of the 4th field around a 3-field Schur core.
    BgsSchur4x4,
    /// Block lower-triangular Gauss-Seidel.
    Bgs2x2,
    /// Block diagonal.
    Jacobi2x2,
}

impl SchemeKind {
    pub fn name(&self) -> &'static str {
        match self {
            SchemeKind::Schur2x2 => "schur2x2",
            SchemeKind::Simple2x2 => "simple2x2",
            SchemeKind::Schur3x3 => "schur3x3",
            SchemeKind::Schur4x4 => "schur4x4",
            SchemeKind::BgsSchur4x4 => "bgsschur4x4",
            SchemeKind::Bgs2x2 => "bgs2x2",
            SchemeKind::Jacobi2x2 => "jacobi2x2",
        }
    }

    /// Number of fields the scheme operates on.
    pub const fn field_count(&self) -> usize {
        match self {
            SchemeKind::Schur2x2 | SchemeKind::Simple2x2 | SchemeKind::Bgs2x2 | SchemeKind::Jacobi2x2 => 2,
            SchemeKind::Schur3x3 => 3,
            SchemeKind::Schur4x4 | SchemeKind::BgsSchur4x4 => 4,
        }
    }
}

impl FromStr for SchemeKind {
    type Err = KError;
    fn from_str(s: &str) -> Result<Self, KError> {
        match s {
            "schur2x2" | "schur" => Ok(SchemeKind::Schur2x2),
            "simple2x2" => Ok(SchemeKind::Simple2x2),
            "schur3x3" => Ok(SchemeKind::Schur3x3),
            "schur4x4" => Ok(SchemeKind::Schur4x4),
            "bgsschur4x4" => Ok(SchemeKind::BgsSchur4x4),
            "bgs2x2" => Ok(SchemeKind::Bgs2x2),
            "jacobi2x2" => Ok(SchemeKind::Jacobi2x2),
            _ => Err(Self::unknown(s)),
        }
    }
}

string_enum!(SchemeKind, "block_precond");

fn default_maxiter() -> usize {
    1000
}
fn default_tolrel() -> f64 {
    1e-5
}
fn default_tolabs() -> f64 {
    1e-50
}
fn default_restart() -> usize {
    30
}
fn default_stat_iter() -> usize {
    1
}
fn default_amg_levels() -> usize {
    10
}
fn default_amg_threshold() -> f64 {
    0.08
}
fn default_amg_smooth() -> usize {
    1
}
fn default_scale_val() -> f64 {
    1.0
}

/// Options of one field's inner solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOptions {
    pub prec: PcType,
    #[serde(default)]
    pub solve: SolveType,
    #[serde(default)]
    pub amgtype: AmgType,
    #[serde(default = "default_maxiter")]
    pub maxiter: usize,
    #[serde(default = "default_tolrel")]
    pub tolrel: f64,
    #[serde(default = "default_tolabs")]
    pub tolabs: f64,
    /// Krylov restart length for `gmres`/`fgmres`.
    #[serde(default = "default_restart")]
    pub restart: usize,
    /// Sweeps of the (disabled) stationary smoothers.
    #[serde(default = "default_stat_iter")]
    pub stat_iter: usize,
    #[serde(default = "default_amg_levels")]
    pub amg_levels: usize,
    /// Strength-of-connection threshold for aggregation.
    #[serde(default = "default_amg_threshold")]
    pub amg_threshold: f64,
    /// Pre- and post-smoothing Jacobi sweeps per level.
    #[serde(default = "default_amg_smooth")]
    pub amg_smooth: usize,
}

impl FieldOptions {
    pub fn new(prec: PcType) -> Self {
        Self {
            prec,
            solve: SolveType::default(),
            amgtype: AmgType::default(),
            maxiter: default_maxiter(),
            tolrel: default_tolrel(),
            tolabs: default_tolabs(),
            restart: default_restart(),
            stat_iter: default_stat_iter(),
            amg_levels: default_amg_levels(),
            amg_threshold: default_amg_threshold(),
            amg_smooth: default_amg_smooth(),
        }
    }

    pub fn direct() -> Self {
        Self::new(PcType::Direct)
    }

    pub fn amg(solve: SolveType) -> Self {
        Self {
            solve,
            ..Self::new(PcType::Amg)
        }
    }

    pub fn with_tolerances(mut self, tolrel: f64, tolabs: f64, maxiter: usize) -> Self {
        self.tolrel = tolrel;
        self.tolabs = tolabs;
        self.maxiter = maxiter;
        self
    }
}

/// Scaling mode and multiplier of one Schur nesting level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchurScaling {
    #[serde(rename = "type")]
    pub kind: ScalingMode,
    #[serde(default = "default_scale_val")]
    pub val: f64,
}

impl SchurScaling {
    pub fn new(kind: ScalingMode, val: f64) -> Self {
        Self { kind, val }
    }
}

impl Default for SchurScaling {
    fn default() -> Self {
        Self::new(ScalingMode::Diag, 1.0)
    }
}

/// Per-level Schur scaling. A single entry applies to every level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingLevels(Vec<SchurScaling>);

impl<'de> Deserialize<'de> for ScalingLevels {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LevelsVisitor;

        impl<'de> Visitor<'de> for LevelsVisitor {
            type Value = ScalingLevels;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a scaling entry or a list of scaling entries")
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<ScalingLevels, A::Error> {
                SchurScaling::deserialize(MapAccessDeserializer::new(map)).map(ScalingLevels::uniform)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<ScalingLevels, A::Error> {
                Vec::<SchurScaling>::deserialize(SeqAccessDeserializer::new(seq)).map(ScalingLevels::new)
            }
        }

        deserializer.deserialize_any(LevelsVisitor)
    }
}

impl ScalingLevels {
    pub const NESTING_LEVELS: usize = 2;

    pub fn new(levels: Vec<SchurScaling>) -> Self {
        ScalingLevels(levels)
    }

    pub fn uniform(s: SchurScaling) -> Self {
        ScalingLevels(vec![s; Self::NESTING_LEVELS])
    }

    /// Configured entries, in level order.
    pub fn levels(&self) -> &[SchurScaling] {
        &self.0
    }

    /// Scaling of nesting level `level` (0: inverse of A, 1: inverse of Smod).
    /// Levels beyond the configured list fall back to the default.
    pub fn level(&self, level: usize) -> SchurScaling {
        self.0.get(level).copied().unwrap_or_default()
    }
}

impl Default for ScalingLevels {
    fn default() -> Self {
        ScalingLevels::uniform(SchurScaling::default())
    }
}

/// Full configuration of a block preconditioner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockPcOptions {
    #[serde(rename = "block_precond")]
    pub scheme: SchemeKind,
    /// Declared number of fields; checked against the scheme and the partition.
    #[serde(default)]
    pub field_count: Option<usize>,
    pub fields: Vec<FieldOptions>,
    #[serde(default)]
    pub schur_block_scaling: ScalingLevels,
    /// Fail setup on non-finite approximate inverses instead of only warning.
    #[serde(default)]
    pub strict_finite: bool,
    /// Report setup timings at `info` instead of `debug` level.
    #[serde(default)]
    pub print_enhanced: bool,
}

impl BlockPcOptions {
    pub fn new(scheme: SchemeKind, fields: Vec<FieldOptions>) -> Self {
        Self {
            scheme,
            field_count: None,
            fields,
            schur_block_scaling: ScalingLevels::default(),
            strict_finite: false,
            print_enhanced: false,
        }
    }

    pub fn with_scaling(mut self, levels: Vec<SchurScaling>) -> Self {
        self.schur_block_scaling = ScalingLevels::new(levels);
        self
    }

    /// Field count implied by the scheme, cross-checked against the declared
    /// `field_count` and the number of per-field option entries. Scaling factors must be
    /// finite and positive.
    pub fn validate(&self) -> Result<usize, KError> {
        let expected = self.scheme.field_count();
        let scheme = self.scheme.name();
        for found in self.field_count.into_iter().chain([self.fields.len()]) {
            if found != expected {
                return Err(KError::FieldCountMismatch {
                    scheme,
                    expected,
                    found,
                });
            }
        }
        if let Some(bad) = self
            .schur_block_scaling
            .levels()
            .iter()
            .find(|s| !(s.val.is_finite() && s.val > 0.0))
        {
            return Err(KError::InvalidValue {
                option: "schur_block_scaling val",
                value: bad.val.to_string(),
            });
        }
        Ok(expected)
    }
}

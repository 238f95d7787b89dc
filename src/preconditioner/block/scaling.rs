//! Cheap diagonal approximations of block inverses.
//!
//! `diag` takes the reciprocal of the main diagonal, `rowsum` the reciprocal of the
//! absolute row sums and `none` the identity; each result is multiplied by the configured
//! factor. Zero pivots are not corrected: the resulting infinities are kept and can be
//! queried with [`ApproximateInverse::is_finite`].

use crate::config::{ScalingMode, SchurScaling};
use crate::core::wrappers::{abs, all_finite, reciprocal, scale};
use crate::error::KError;
use crate::matrix::CsrMatrix;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScalingStrategy {
    pub mode: ScalingMode,
    pub factor: f64,
}

impl From<SchurScaling> for ScalingStrategy {
    fn from(s: SchurScaling) -> Self {
        Self {
            mode: s.kind,
            factor: s.val,
        }
    }
}

impl ScalingStrategy {
    pub fn new(mode: ScalingMode, factor: f64) -> Self {
        Self { mode, factor }
    }

    /// Diagonal approximation of `block⁻¹`.
    pub fn approximate(&self, block: &CsrMatrix) -> ApproximateInverse {
        let mut diag = match self.mode {
            ScalingMode::Diag => {
                let mut d = block.diagonal();
                reciprocal(&mut d);
                d
            }
            ScalingMode::RowSum => {
                let mut d = block.row_sums();
                abs(&mut d);
                reciprocal(&mut d);
                d
            }
            ScalingMode::None => vec![1.0; block.nrows()],
        };
        scale(self.factor, &mut diag);
        ApproximateInverse { diag }
    }

    /// As [`approximate`](Self::approximate), reporting non-finite entries.
    ///
    /// With `strict` set, non-finite entries fail with [`KError::NonFinite`]; otherwise a
    /// warning is emitted and the inverse is returned unchanged.
    pub fn approximate_checked(
        &self,
        block: &CsrMatrix,
        what: &'static str,
        strict: bool,
    ) -> Result<ApproximateInverse, KError> {
        let inv = self.approximate(block);
        if !inv.is_finite() {
            if strict {
                return Err(KError::NonFinite(what));
            }
            let count = inv.diag.iter().filter(|d| !d.is_finite()).count();
            warn!(block = what, mode = %self.mode, count, "approximate inverse has non-finite entries");
        }
        Ok(inv)
    }
}

/// Diagonal matrix standing in for the inverse of a block.
#[derive(Clone, Debug, PartialEq)]
pub struct ApproximateInverse {
    diag: Vec<f64>,
}

impl ApproximateInverse {
    pub fn diagonal(&self) -> &[f64] {
        &self.diag
    }

    pub fn len(&self) -> usize {
        self.diag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diag.is_empty()
    }

    pub fn is_finite(&self) -> bool {
        all_finite(&self.diag)
    }

    /// diag · M
    pub fn left_mul(&self, m: &CsrMatrix) -> CsrMatrix {
        m.scale_rows(&self.diag)
    }
}

use thiserror::Error;

// Unified error type for kryst-block

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KError {
    #[error("factorization error: {0}")]
    FactorError(String),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("unknown {option} option: '{value}'")]
    UnknownOption { option: &'static str, value: String },
    #[error("invalid {option}: {value}")]
    InvalidValue { option: &'static str, value: String },
    #[error("scheme '{scheme}' requires {expected} fields, got {found}")]
    FieldCountMismatch {
        scheme: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("invalid field partition: {0}")]
    InvalidPartition(String),
    #[error("dimension mismatch: expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("non-finite values in {0}")]
    NonFinite(&'static str),
    #[error("preconditioner used before setup")]
    NotSetUp,
    #[error("sparse matrix creation failed: {0}")]
    SparseCreation(String),
}

impl KError {
    /// True for errors that stem from configuration rather than numerics.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            KError::UnknownOption { .. }
                | KError::InvalidValue { .. }
                | KError::FieldCountMismatch { .. }
                | KError::InvalidPartition(_)
                | KError::Unsupported(_)
        )
    }
}

//! Error types of the ClippDCD solver
//!
#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClippDcdError>;

/// Fatal conditions of a solve call
///
/// Invalid input and numeric instability abort the solve without a partial result. Running out
/// of iterations is not an error, see [`ExitReason`](crate::ExitReason).
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClippDcdError {
    #[error("dual matrix must be square, but has shape ({rows}, {cols})")]
    NotSquare { rows: usize, cols: usize },
    #[error("dual matrix must not be empty")]
    EmptyMatrix,
    #[error("row {row} of the dual matrix has {actual} entries, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error("upper bound C should be positive and finite, but is {0}")]
    InvalidBound(f32),
    #[error("dual matrix entry ({row}, {col}) is not finite")]
    NonFiniteEntry { row: usize, col: usize },
    #[error("diagonal entry {index} of the dual matrix should be positive, but is {value}")]
    NonPositiveDiagonal { index: usize, value: f32 },
    #[error("gradient of coordinate {index} became non-finite")]
    NonFiniteGradient { index: usize },
    #[error("tolerance should be positive and finite, but is {0}")]
    InvalidEps(f32),
    #[error("iteration budget must be at least 1, but is {0}")]
    InvalidMaxIterations(usize),
}

impl ClippDcdError {
    /// Whether the arguments of the solve call were rejected before any iteration
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            ClippDcdError::NotSquare { .. }
                | ClippDcdError::EmptyMatrix
                | ClippDcdError::RaggedRow { .. }
                | ClippDcdError::InvalidBound(_)
                | ClippDcdError::NonFiniteEntry { .. }
        )
    }

    /// Whether the iteration was aborted because the quadratic form became ill-posed
    pub fn is_numeric_instability(&self) -> bool {
        matches!(
            self,
            ClippDcdError::NonPositiveDiagonal { .. } | ClippDcdError::NonFiniteGradient { .. }
        )
    }
}

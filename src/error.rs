use thiserror::Error;

use crate::ica::Stage;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("capacity/voltage curve needs at least two points, got {len}")]
    NullData { len: usize },
    #[error("capacity and voltage lengths differ: {capacity} vs {voltage}")]
    LengthMismatch { capacity: usize, voltage: usize },
    #[error("no samples for cycle {cycle}, step {step}")]
    InsufficientData { cycle: u32, step: u32 },
    #[error("active material mass must be positive, got {0:?}")]
    InvalidMass(Option<f64>),
    #[error("converter stage {requested:?} called while in state {current:?}")]
    StateOrder { requested: Stage, current: Stage },
    #[error("missing column `{column}` (semantic field {field})")]
    MissingColumn { field: &'static str, column: String },
    #[error("column `{column}` has {actual} rows, expected {expected}")]
    ColumnLengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("column `{column}` row {row}: {value} is not a valid index")]
    InvalidColumnValue {
        column: String,
        row: usize,
        value: f64,
    },
    #[error("cannot process curve: {0}")]
    DegenerateCurve(&'static str),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// True for the conditions that indicate a caller contract violation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::NullData { .. }
                | CoreError::InsufficientData { .. }
                | CoreError::InvalidMass(_)
                | CoreError::StateOrder { .. }
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

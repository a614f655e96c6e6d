//! Error types for the paged score reference

use thiserror::Error;

/// Result type alias using the crate's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for score-reference operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Shape mismatch for {what}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Dtype mismatch for {what}: expected {expected}, got {got}")]
    DtypeMismatch {
        what: &'static str,
        expected: String,
        got: String,
    },

    #[error("Unsupported dtype: {0}")]
    UnsupportedDtype(String),

    #[error(
        "Block table entry out of range: sequence {seq}, logical block {logical_block} \
         maps to physical block {physical_block} but the pool has {num_blocks} blocks"
    )]
    BlockOutOfRange {
        seq: usize,
        logical_block: usize,
        physical_block: usize,
        num_blocks: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

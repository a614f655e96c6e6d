//! Pagedref: reference scoring for paged key/value-cache attention
//!
//! This crate provides the backend-agnostic types: element dtypes, the error
//! type, the tensor and op traits, the problem configuration and the score
//! tensor. Backend implementations live in separate crates.

#[allow(clippy::missing_errors_doc, clippy::doc_markdown)]
pub mod backend;
pub mod block_allocator;
pub mod config;
pub mod dtype;
pub mod error;
pub mod scores;
pub mod tensor;

pub use backend::{Backend, CastOps, PagedScoreOps};
pub use block_allocator::{BlockAllocator, BlockConfig, BlockTable};
pub use config::ScoreConfig;
pub use dtype::{DType, TensorDType};
pub use error::{Error, Result};
pub use scores::PagedScores;
pub use tensor::Tensor;

//! CPU implementations of the backend op traits.

pub mod cast;
pub(crate) mod matmul;
pub mod score;

//! Host backend for the paged score reference.
//!
//! Runs the query·key score stage over a block-paged key cache on the CPU
//! using AVX2+FMA (x86-64) or NEON (AArch64) dot products. Half-precision
//! inputs are widened to f32 and all accumulation is f32.
//!
//! This backend exists to produce reference values an optimized kernel can
//! be checked against. It is not optimised for throughput.

#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod ops;
mod simd;
pub mod tensor;

use pagedref::backend::Backend;

pub use tensor::CpuTensor;

/// Marker type for the CPU backend.
///
/// All op trait impls are on this type.
pub struct CpuBackend;

impl Backend for CpuBackend {
    type Tensor = CpuTensor;
}

/// Check that the current CPU supports the required SIMD features.
///
/// # Errors
/// Returns an error if AVX2+FMA is missing on x86-64.
pub fn check_cpu_support() -> pagedref::Result<()> {
    simd::check_cpu_support()
}

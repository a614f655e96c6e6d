//! Backend trait and op trait definitions.
//!
//! The score reference is expressed against `B: Backend` plus the op traits
//! it needs, so an optimized backend can be checked against the host one
//! through the same calls.
//!
//! # Design notes
//!
//! - **Op traits extend `Backend`** and use `Self::Tensor` from the
//!   supertrait.
//! - **Scores come back as host data** ([`PagedScores`]) because their only
//!   consumer is comparison and printing code.

use crate::scores::PagedScores;
use crate::tensor::Tensor;
use crate::DType;
use crate::Result;

/// A compute backend.
pub trait Backend: 'static {
    /// The tensor type for this backend (e.g., `CpuTensor`).
    type Tensor: Tensor + Clone;
}

/// Type-casting operations.
pub trait CastOps: Backend {
    /// Cast tensor to f32.
    fn cast_to_f32(input: &Self::Tensor) -> Result<Self::Tensor>;

    /// Cast tensor from f32 to the target dtype.
    fn cast_from_f32(input: &Self::Tensor, target: DType) -> Result<Self::Tensor>;
}

/// Query·key scoring over a block-paged key cache.
pub trait PagedScoreOps: Backend {
    /// Compute `Score[i][j][k][g][p] = dot(Q[i][j*G+g], K[block_tables[i][k]][p][j])`
    /// for every full block `k < context_lens[i] / block_size`.
    ///
    /// - `query`: `(num_seqs, num_heads, head_size)`, f16 or bf16
    /// - `key_cache`: `(num_blocks, block_size, num_kv_heads, head_size)`,
    ///   same dtype as `query`
    /// - `block_tables`: `(num_seqs, max_blocks_per_seq)`, u32
    /// - `context_lens`: `(num_seqs,)`, u32
    ///
    /// All inputs are validated before any score is computed; on error no
    /// partial output is returned.
    fn paged_scores(
        query: &Self::Tensor,
        key_cache: &Self::Tensor,
        block_tables: &Self::Tensor,
        context_lens: &Self::Tensor,
    ) -> Result<PagedScores>;
}

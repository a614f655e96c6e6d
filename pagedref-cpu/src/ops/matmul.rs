//! Small dense products used by the score reference.
//!
//! Everything is f32 row-major. Keys are gathered as `(block_size, head_size)`
//! rows, which is already `Bᵀ` for `Q × Kᵀ`, so `C[m,n] = dot(A[m,:], B[n,:])`
//! is a contiguous SIMD dot product and no transpose is materialized.

use crate::simd;

/// `A (M,K) × Bᵀ` where `B` is given as `(N,K)`, written into `c (M,N)`.
#[allow(clippy::many_single_char_names)]
pub(crate) fn gemm_nt_into(a: &[f32], b: &[f32], c: &mut [f32], m: usize, k: usize, n: usize) {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), n * k);
    debug_assert_eq!(c.len(), m * n);
    for (a_row, c_row) in a.chunks_exact(k).zip(c.chunks_exact_mut(n)) {
        for (col, out) in c_row.iter_mut().enumerate() {
            *out = simd::dot_f32(a_row, &b[col * k..(col + 1) * k]);
        }
    }
}

//! Shared helpers for paged score integration tests.
//!
//! Inputs are kept as f32 host vectors and converted to half-precision
//! tensors per test. Using small integers keeps every value exact in f16
//! and bf16, and every dot product exact in f32, so results can be compared
//! with `==`.

#![allow(dead_code)]

use pagedref::backend::CastOps;
use pagedref::{DType, PagedScoreOps, PagedScores, Result, ScoreConfig};
use pagedref_cpu::{CpuBackend, CpuTensor};

/// Host-side description of one score computation.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub config: ScoreConfig,
    /// `(num_seqs, num_heads, head_size)`
    pub query: Vec<f32>,
    /// `(num_blocks, block_size, num_kv_heads, head_size)`
    pub keys: Vec<f32>,
    /// `(num_seqs, max_blocks_per_seq)`
    pub block_tables: Vec<u32>,
    /// `(num_seqs,)`
    pub context_lens: Vec<u32>,
}

impl Inputs {
    /// Query and key cache stored as `dtype`, index tensors as u32.
    pub fn tensors(&self, dtype: DType) -> (CpuTensor, CpuTensor, CpuTensor, CpuTensor) {
        let c = &self.config;
        let cast = |shape: &[usize], data: &[f32]| {
            CpuBackend::cast_from_f32(&CpuTensor::from_f32(shape, data), dtype)
                .expect("cast to half precision")
        };
        (
            cast(&c.query_shape(), &self.query),
            cast(&c.key_cache_shape(), &self.keys),
            CpuTensor::from_u32(&c.block_table_shape(), &self.block_tables),
            CpuTensor::from_u32(&c.context_lens_shape(), &self.context_lens),
        )
    }

    pub fn try_scores(&self, dtype: DType) -> Result<PagedScores> {
        let (q, k, bt, cl) = self.tensors(dtype);
        CpuBackend::paged_scores(&q, &k, &bt, &cl)
    }

    /// Scores with f16 storage.
    pub fn scores(&self) -> PagedScores {
        self.try_scores(DType::F16).expect("paged_scores failed")
    }

    /// Direct evaluation of
    /// `dot(Q[i][j*G+g], K[block_tables[i][k]][p][j])`.
    pub fn naive_score(&self, i: usize, j: usize, k: usize, g: usize, p: usize) -> f32 {
        let c = &self.config;
        let head = j * c.query_group_size() + g;
        let q_off = (i * c.num_heads + head) * c.head_size;
        let physical = self.block_tables[i * c.max_blocks_per_seq + k] as usize;
        let k_off = ((physical * c.block_size + p) * c.num_kv_heads + j) * c.head_size;
        (0..c.head_size)
            .map(|d| self.query[q_off + d] * self.keys[k_off + d])
            .sum()
    }
}

/// Assert every scored element equals the naive formula and every element
/// past a sequence's useful blocks is zero.
pub fn assert_matches_naive(inputs: &Inputs, scores: &PagedScores) {
    let c = &inputs.config;
    let [s, h, blocks, g, p] = *scores.shape();
    assert_eq!(
        (s, h, g, p),
        (c.num_seqs, c.num_kv_heads, c.query_group_size(), c.block_size)
    );
    for i in 0..s {
        let useful = c.useful_blocks(inputs.context_lens[i] as usize);
        assert_eq!(scores.useful_blocks(i), useful, "useful blocks of seq {i}");
        for j in 0..h {
            for k in 0..blocks {
                for gi in 0..g {
                    for pi in 0..p {
                        let got = scores.get(i, j, k, gi, pi);
                        let want = if k < useful {
                            inputs.naive_score(i, j, k, gi, pi)
                        } else {
                            0.0
                        };
                        // exact: integer inputs make every product and sum exact
                        assert!(
                            got == want,
                            "score[{i}][{j}][{k}][{gi}][{pi}]: got {got}, want {want}"
                        );
                    }
                }
            }
        }
    }
}

/// Deterministic small-integer fill in `[-4, 4]`.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
pub fn int_pattern(len: usize, salt: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (((i * 7 + salt * 13) % 9) as i64 - 4) as f32)
        .collect()
}

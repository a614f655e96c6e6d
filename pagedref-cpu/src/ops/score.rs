//! PagedScoreOps implementation: the query·key score stage of paged
//! attention, computed on the host.
//!
//! For each `(sequence, kv-head)` the `query_group_size` query rows sharing
//! that kv-head are widened to f32 once. For each full logical block the
//! physical block named by the block table is gathered (one kv-head's
//! `(block_size, head_size)` slice, widened to f32) and a single
//! `G × block_size` product is written into the output.
//!
//! `(sequence, kv-head)` chunks of the output are disjoint, so they are
//! filled in parallel with Rayon without changing any result bit.

use log::{debug, trace};
use pagedref::backend::PagedScoreOps;
use pagedref::config::ScoreConfig;
use pagedref::dtype::DType;
use pagedref::scores::PagedScores;
use pagedref::tensor::Tensor;
use pagedref::{Error, Result};
use rayon::prelude::*;

use crate::ops::matmul::gemm_nt_into;
use crate::simd;
use crate::tensor::CpuTensor;
use crate::CpuBackend;

/// Raw half-precision key storage, widened to f32 on gather.
#[derive(Clone, Copy)]
enum HalfSlice<'a> {
    F16(&'a [half::f16]),
    BF16(&'a [half::bf16]),
}

impl<'a> HalfSlice<'a> {
    fn new(tensor: &'a CpuTensor) -> Result<Self> {
        match tensor.dtype() {
            DType::F16 => Ok(Self::F16(tensor.as_slice())),
            DType::BF16 => Ok(Self::BF16(tensor.as_slice())),
            other => Err(Error::UnsupportedDtype(format!(
                "paged scores need f16 or bf16 storage, got {other}"
            ))),
        }
    }

    fn widen_into(self, offset: usize, out: &mut [f32]) {
        let range = offset..offset + out.len();
        match self {
            Self::F16(src) => {
                for (dst, v) in out.iter_mut().zip(&src[range]) {
                    *dst = v.to_f32();
                }
            }
            Self::BF16(src) => {
                for (dst, v) in out.iter_mut().zip(&src[range]) {
                    *dst = v.to_f32();
                }
            }
        }
    }
}

fn expect_dtype(what: &'static str, tensor: &CpuTensor, expected: DType) -> Result<()> {
    if tensor.dtype() == expected {
        Ok(())
    } else {
        Err(Error::DtypeMismatch {
            what,
            expected: expected.to_string(),
            got: tensor.dtype().to_string(),
        })
    }
}

/// Check dtypes and shapes of all four inputs and infer the geometry.
fn validate_inputs(
    query: &CpuTensor,
    key_cache: &CpuTensor,
    block_tables: &CpuTensor,
    context_lens: &CpuTensor,
) -> Result<ScoreConfig> {
    if !query.dtype().is_half_precision() {
        return Err(Error::UnsupportedDtype(format!(
            "query must be f16 or bf16, got {}",
            query.dtype()
        )));
    }
    expect_dtype("key_cache", key_cache, query.dtype())?;
    expect_dtype("block_tables", block_tables, DType::U32)?;
    expect_dtype("context_lens", context_lens, DType::U32)?;

    let config = ScoreConfig::infer(query.shape(), key_cache.shape(), block_tables.shape())?;

    if context_lens.ndim() != 1 {
        return Err(Error::InvalidShape(format!(
            "context_lens must be 1-D, got shape {:?}",
            context_lens.shape()
        )));
    }
    if context_lens.shape() != config.context_lens_shape() {
        return Err(Error::ShapeMismatch {
            what: "context_lens",
            expected: config.context_lens_shape().to_vec(),
            got: context_lens.shape().to_vec(),
        });
    }
    Ok(config)
}

/// Per-sequence count of full blocks, rejecting contexts longer than a
/// block-table row can describe.
fn useful_blocks_per_seq(config: &ScoreConfig, context_lens: &[u32]) -> Result<Vec<usize>> {
    context_lens
        .iter()
        .enumerate()
        .map(|(seq, &len)| {
            let len = len as usize;
            if len > config.max_context_len() {
                return Err(Error::InvalidShape(format!(
                    "context_lens[{seq}] = {len} exceeds max_blocks_per_seq ({}) x block_size ({})",
                    config.max_blocks_per_seq, config.block_size
                )));
            }
            Ok(config.useful_blocks(len))
        })
        .collect()
}

/// Every meaningful block-table entry (the first `ceil(len / block_size)`
/// of each row) must name a block inside the pool. Padding is not read.
fn check_block_table(
    config: &ScoreConfig,
    block_tables: &[u32],
    context_lens: &[u32],
) -> Result<()> {
    for (seq, (row, &len)) in block_tables
        .chunks_exact(config.max_blocks_per_seq.max(1))
        .zip(context_lens)
        .enumerate()
    {
        let meaningful = (len as usize).div_ceil(config.block_size);
        for (logical_block, &physical) in row[..meaningful].iter().enumerate() {
            let physical_block = physical as usize;
            if physical_block >= config.num_blocks {
                return Err(Error::BlockOutOfRange {
                    seq,
                    logical_block,
                    physical_block,
                    num_blocks: config.num_blocks,
                });
            }
        }
    }
    Ok(())
}

#[allow(clippy::many_single_char_names)]
impl PagedScoreOps for CpuBackend {
    fn paged_scores(
        query: &CpuTensor,
        key_cache: &CpuTensor,
        block_tables: &CpuTensor,
        context_lens: &CpuTensor,
    ) -> Result<PagedScores> {
        simd::check_cpu_support()?;
        let config = validate_inputs(query, key_cache, block_tables, context_lens)?;

        let lens = context_lens.as_u32_slice();
        let table = block_tables.as_u32_slice();
        let useful = useful_blocks_per_seq(&config, lens)?;
        check_block_table(&config, table, lens)?;
        debug!("paged_scores: {config:?}, useful_blocks = {useful:?}");

        let group = config.query_group_size();
        let head_size = config.head_size;
        let block_size = config.block_size;
        let num_kv_heads = config.num_kv_heads;
        let max_blocks = config.max_blocks_per_seq;

        // (num_seqs, num_kv_heads, G, head_size): one contiguous G x head_size
        // group per (sequence, kv-head).
        let q = query.reshape(&config.grouped_query_shape()).to_f32_vec()?;
        let keys = HalfSlice::new(key_cache)?;

        let mut scores = PagedScores::zeros(config, useful.clone())?;
        let chunk_len = scores.head_chunk_len();
        if chunk_len == 0 {
            return Ok(scores);
        }
        let block_len = scores.block_len();

        scores
            .as_mut_slice()
            .par_chunks_mut(chunk_len)
            .enumerate()
            .for_each(|(idx, out)| {
                let seq = idx / num_kv_heads;
                let kv_head = idx % num_kv_heads;
                trace!("seq {seq} kv_head {kv_head}: {} blocks", useful[seq]);

                let q_group = &q[idx * group * head_size..(idx + 1) * group * head_size];
                let mut k_rows = vec![0.0f32; block_size * head_size];

                for k in 0..useful[seq] {
                    let physical = table[seq * max_blocks + k] as usize;
                    for (p, row) in k_rows.chunks_exact_mut(head_size).enumerate() {
                        let offset = ((physical * block_size + p) * num_kv_heads + kv_head)
                            * head_size;
                        keys.widen_into(offset, row);
                    }
                    gemm_nt_into(
                        q_group,
                        &k_rows,
                        &mut out[k * block_len..(k + 1) * block_len],
                        group,
                        head_size,
                        block_size,
                    );
                }
            });

        Ok(scores)
    }
}

//! Synthetic inputs for the score benchmark: constant query heads, all-ones
//! keys and block tables handed out by a fresh block pool.

use pagedref::backend::CastOps;
use pagedref::{BlockAllocator, DType, Error, Result, ScoreConfig};
use pagedref_cpu::{CpuBackend, CpuTensor};

/// The four tensors the score reference consumes.
pub struct HarnessInputs {
    pub query: CpuTensor,
    pub key_cache: CpuTensor,
    pub block_tables: CpuTensor,
    pub context_lens: CpuTensor,
}

/// Build inputs for `config`:
/// - query head `h` of every sequence filled with `h + 1`
/// - key cache filled with ones
/// - every sequence holds `context_len` tokens in blocks taken from a fresh
///   pool, so sequence `i` owns the next `ceil(context_len / block_size)`
///   blocks after sequence `i - 1`; unused row slots are 0
/// - every context length set to `context_len`
pub fn build_inputs(
    config: &ScoreConfig,
    dtype: DType,
    context_len: usize,
) -> Result<HarnessInputs> {
    config.validate()?;
    if config.num_blocks == 0 {
        return Err(Error::InvalidShape("num_blocks must be > 0".into()));
    }

    let head_size = config.head_size;
    #[allow(clippy::cast_precision_loss)]
    let query_data: Vec<f32> = (0..config.num_seqs * config.num_heads)
        .flat_map(|row| {
            let head = row % config.num_heads;
            std::iter::repeat((head + 1) as f32).take(head_size)
        })
        .collect();
    let query = CpuBackend::cast_from_f32(
        &CpuTensor::from_f32(&config.query_shape(), &query_data),
        dtype,
    )?;
    let key_cache = CpuTensor::full(&config.key_cache_shape(), 1.0, dtype)?;

    let mut pool = BlockAllocator::new(&config.block_config());
    let mut block_table_data = Vec::with_capacity(config.num_seqs * config.max_blocks_per_seq);
    for seq in 0..config.num_seqs {
        let table = pool.allocate_sequence(context_len).ok_or_else(|| {
            Error::InvalidShape(format!(
                "block pool of {} blocks exhausted at sequence {seq} ({} blocks per sequence)",
                config.num_blocks,
                pool.blocks_needed(context_len)
            ))
        })?;
        block_table_data.extend(table.to_row(config.max_blocks_per_seq, 0)?);
    }
    let block_tables = CpuTensor::from_u32(&config.block_table_shape(), &block_table_data);

    let context_lens = CpuTensor::from_u32(
        &config.context_lens_shape(),
        &vec![to_u32("context_len", context_len)?; config.num_seqs],
    );

    Ok(HarnessInputs {
        query,
        key_cache,
        block_tables,
        context_lens,
    })
}

fn to_u32(what: &str, value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::InvalidShape(format!("{what} {value} exceeds u32")))
}

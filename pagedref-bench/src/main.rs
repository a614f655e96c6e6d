//! Paged score reference harness.
//!
//! Builds synthetic query / key-cache / block-table inputs, computes the
//! reference scores on the host and prints one `query_group_size x block_size`
//! slice for comparison with an optimized kernel's output.
//!
//! Usage: pagedref-bench [--config cfg.json] [--num-heads 16 ...] [--dtype bf16]

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use log::info;
use pagedref::{DType, Error, PagedScoreOps, Result, ScoreConfig, Tensor};
use pagedref_cpu::{CpuBackend, CpuTensor};

mod harness;
mod print;

/// Default context length: one partition of 512 tokens.
const DEFAULT_CONTEXT_LEN: usize = 512;

#[derive(Parser, Debug)]
#[command(about = "Compute reference paged-attention scores on synthetic inputs")]
struct Args {
    /// JSON file with a ScoreConfig; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    num_seqs: Option<usize>,

    #[arg(long)]
    num_heads: Option<usize>,

    #[arg(long)]
    head_size: Option<usize>,

    #[arg(long)]
    num_kv_heads: Option<usize>,

    #[arg(long)]
    block_size: Option<usize>,

    #[arg(long)]
    num_blocks: Option<usize>,

    #[arg(long)]
    max_blocks_per_seq: Option<usize>,

    /// Raw storage type of query and key cache (f16 or bf16)
    #[arg(long, default_value = "f16")]
    dtype: DType,

    /// Valid tokens per sequence
    #[arg(long, default_value_t = DEFAULT_CONTEXT_LEN)]
    context_len: usize,

    /// Which (sequence, kv-head, block) matrix to print
    #[arg(long, default_value_t = 0)]
    seq: usize,

    #[arg(long, default_value_t = 0)]
    kv_head: usize,

    #[arg(long, default_value_t = 0)]
    block: usize,

    #[arg(long, default_value_t = 0)]
    row_start: usize,

    #[arg(long, default_value_t = 8)]
    row_end: usize,

    #[arg(long, default_value_t = 0)]
    col_start: usize,

    #[arg(long, default_value_t = 64)]
    col_end: usize,
}

impl Args {
    fn score_config(&self) -> Result<ScoreConfig> {
        let mut config = match &self.config {
            Some(path) => ScoreConfig::from_json_file(path)?,
            None => ScoreConfig::default(),
        };
        let overrides = [
            (&mut config.num_seqs, self.num_seqs),
            (&mut config.num_heads, self.num_heads),
            (&mut config.head_size, self.head_size),
            (&mut config.num_kv_heads, self.num_kv_heads),
            (&mut config.block_size, self.block_size),
            (&mut config.num_blocks, self.num_blocks),
            (&mut config.max_blocks_per_seq, self.max_blocks_per_seq),
        ];
        for (field, value) in overrides {
            if let Some(v) = value {
                *field = v;
            }
        }
        config.validate()?;
        Ok(config)
    }
}

fn describe(name: &str, t: &CpuTensor) {
    info!("{name} shape: {:?} dtype: {}", t.shape(), t.dtype());
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    pagedref_cpu::check_cpu_support()?;
    let config = args.score_config()?;
    info!("config: {config:?}");

    let inputs = harness::build_inputs(&config, args.dtype, args.context_len)?;
    describe("query", &inputs.query);
    describe("key_cache", &inputs.key_cache);
    describe("block_tables", &inputs.block_tables);
    describe("context_lens", &inputs.context_lens);

    let start = Instant::now();
    let scores = CpuBackend::paged_scores(
        &inputs.query,
        &inputs.key_cache,
        &inputs.block_tables,
        &inputs.context_lens,
    )?;
    info!(
        "ref_scores shape: {:?} in {:.2} ms",
        scores.shape(),
        start.elapsed().as_secs_f64() * 1e3
    );

    let [num_seqs, num_kv_heads, num_blocks, group, block_size] = *scores.shape();
    if args.seq >= num_seqs || args.kv_head >= num_kv_heads || args.block >= num_blocks {
        return Err(Error::InvalidShape(format!(
            "cannot print block ({}, {}, {}) of scores shaped {:?}",
            args.seq,
            args.kv_head,
            args.block,
            scores.shape()
        )));
    }
    let matrix = scores.block(args.seq, args.kv_head, args.block);
    print!(
        "{}",
        print::format_slice(
            matrix,
            group,
            block_size,
            args.row_start..args.row_end,
            args.col_start..args.col_end,
        )?
    );
    Ok(())
}

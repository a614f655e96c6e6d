//! Score tensor produced by the paged score reference.

use crate::config::ScoreConfig;
use crate::{Error, Result};

/// Float32 scores laid out as
/// `[num_seqs, num_kv_heads, blocks, query_group_size, block_size]`.
///
/// `blocks` is the largest per-sequence useful block count. Sequence `i`
/// only has `useful_blocks(i)` meaningful blocks; the rest of its rows are
/// zero.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedScores {
    useful_blocks: Vec<usize>,
    shape: [usize; 5],
    data: Vec<f32>,
}

impl PagedScores {
    /// Zero-filled scores for `config`, with one useful block count per
    /// sequence.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if `useful_blocks` does not have one entry
    /// per sequence.
    pub fn zeros(config: ScoreConfig, useful_blocks: Vec<usize>) -> Result<Self> {
        if useful_blocks.len() != config.num_seqs {
            return Err(Error::ShapeMismatch {
                what: "useful_blocks",
                expected: vec![config.num_seqs],
                got: vec![useful_blocks.len()],
            });
        }
        let max_blocks = useful_blocks.iter().copied().max().unwrap_or(0);
        let shape = config.score_shape(max_blocks);
        let numel = shape.iter().product();
        Ok(Self {
            useful_blocks,
            shape,
            data: vec![0.0; numel],
        })
    }

    #[must_use]
    pub fn shape(&self) -> &[usize; 5] {
        &self.shape
    }

    /// Number of scored blocks for sequence `seq`.
    ///
    /// # Panics
    /// Panics if `seq` is out of range.
    #[must_use]
    pub fn useful_blocks(&self, seq: usize) -> usize {
        self.useful_blocks[seq]
    }

    /// Elements in one `(sequence, kv-head)` chunk.
    #[must_use]
    pub fn head_chunk_len(&self) -> usize {
        self.shape[2] * self.block_len()
    }

    /// Elements in one `query_group_size x block_size` block matrix.
    #[must_use]
    pub fn block_len(&self) -> usize {
        self.shape[3] * self.shape[4]
    }

    /// The `query_group_size x block_size` matrix for
    /// `(seq, kv_head, block)`, row-major.
    ///
    /// # Panics
    /// Panics if any index is out of range.
    #[must_use]
    pub fn block(&self, seq: usize, kv_head: usize, block: usize) -> &[f32] {
        assert!(
            seq < self.shape[0] && kv_head < self.shape[1] && block < self.shape[2],
            "block index ({seq}, {kv_head}, {block}) out of range for shape {:?}",
            self.shape
        );
        let start =
            (seq * self.shape[1] + kv_head) * self.head_chunk_len() + block * self.block_len();
        &self.data[start..start + self.block_len()]
    }

    /// Single score `Score[seq][kv_head][block][group][pos]`.
    ///
    /// # Panics
    /// Panics if any index is out of range.
    #[must_use]
    pub fn get(&self, seq: usize, kv_head: usize, block: usize, group: usize, pos: usize) -> f32 {
        assert!(
            group < self.shape[3] && pos < self.shape[4],
            "in-block index ({group}, {pos}) out of range for shape {:?}",
            self.shape
        );
        self.block(seq, kv_head, block)[group * self.shape[4] + pos]
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

//! Block pool bookkeeping for paged key caches
//!
//! A key cache is a pool of `num_blocks` fixed-size blocks, each holding
//! `block_size` tokens. A sequence owns an ordered list of physical blocks
//! (its [`BlockTable`]); the score reference reads the table row to find
//! where each logical block lives in the pool.
//!
//! This is host-side bookkeeping only. It produces the `u32` block-table
//! rows the score reference consumes.

#![allow(clippy::must_use_candidate)]

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Pool geometry shared by the allocator and the key cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockConfig {
    /// Number of tokens stored per block.
    pub block_size: usize,
    /// Total number of blocks in the pool.
    pub num_blocks: usize,
}

/// Manages a pool of key-cache blocks.
///
/// Blocks are identified by an index in `[0, num_blocks)`. Free blocks sit
/// on a LIFO stack, so allocation and freeing are O(1).
#[derive(Debug)]
pub struct BlockAllocator {
    free_blocks: Vec<usize>,
    num_blocks: usize,
    block_size: usize,
}

impl BlockAllocator {
    /// Create a new allocator with all blocks free.
    ///
    /// Blocks come out in ascending order (`0, 1, 2, ...`) on a fresh pool.
    ///
    /// # Panics
    /// Panics if `block_size` or `num_blocks` is zero.
    pub fn new(config: &BlockConfig) -> Self {
        assert!(config.block_size > 0, "block_size must be > 0");
        assert!(config.num_blocks > 0, "num_blocks must be > 0");

        let free_blocks: Vec<usize> = (0..config.num_blocks).rev().collect();
        Self {
            free_blocks,
            num_blocks: config.num_blocks,
            block_size: config.block_size,
        }
    }

    /// Allocate a single block, or `None` if the pool is exhausted.
    pub fn allocate(&mut self) -> Option<usize> {
        self.free_blocks.pop()
    }

    /// Allocate enough blocks for `num_tokens` tokens and return the
    /// resulting table. Returns `None` (allocating nothing) if the pool
    /// cannot satisfy the request.
    pub fn allocate_sequence(&mut self, num_tokens: usize) -> Option<BlockTable> {
        let needed = self.blocks_needed(num_tokens);
        if !self.can_allocate(needed) {
            return None;
        }
        let mut table = BlockTable::new(self.block_size);
        for _ in 0..needed {
            table.append_block(self.free_blocks.pop()?);
        }
        table.advance(num_tokens);
        Some(table)
    }

    /// Free a single block, returning it to the pool.
    ///
    /// # Panics
    /// Panics if `block_idx` is out of range or was already free.
    pub fn free(&mut self, block_idx: usize) {
        assert!(
            block_idx < self.num_blocks,
            "block index {block_idx} out of range (num_blocks = {})",
            self.num_blocks,
        );
        assert!(
            !self.free_blocks.contains(&block_idx),
            "double-free of block {block_idx}",
        );
        self.free_blocks.push(block_idx);
    }

    /// Free every block of `table` and reset it.
    ///
    /// # Panics
    /// Panics if any block index is out of range or was already free.
    pub fn release(&mut self, table: &mut BlockTable) {
        for &block_idx in table.blocks() {
            self.free(block_idx);
        }
        table.reset();
    }

    /// Number of free blocks remaining.
    pub fn num_free(&self) -> usize {
        self.free_blocks.len()
    }

    /// Total number of blocks in the pool.
    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    /// Number of tokens per block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Whether at least `n` blocks can be allocated.
    pub fn can_allocate(&self, n: usize) -> bool {
        self.free_blocks.len() >= n
    }

    /// Number of blocks needed to store `num_tokens` tokens.
    ///
    /// This is `ceil(num_tokens / block_size)`.
    pub fn blocks_needed(&self, num_tokens: usize) -> usize {
        num_tokens.div_ceil(self.block_size)
    }
}

/// Per-sequence mapping from logical block position to physical block index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTable {
    /// `blocks[i]` = physical block index for logical block `i`.
    blocks: Vec<usize>,
    /// Number of valid tokens (the sequence's context length).
    seq_len: usize,
    block_size: usize,
}

impl BlockTable {
    /// Create an empty block table.
    pub fn new(block_size: usize) -> Self {
        Self {
            blocks: Vec::new(),
            seq_len: 0,
            block_size,
        }
    }

    /// Build a table from an explicit block list and context length.
    ///
    /// # Errors
    /// Returns `InvalidShape` if `blocks` cannot hold `seq_len` tokens.
    pub fn from_blocks(block_size: usize, blocks: Vec<usize>, seq_len: usize) -> Result<Self> {
        if blocks.len() * block_size < seq_len {
            return Err(Error::InvalidShape(format!(
                "{} blocks of {block_size} tokens cannot hold {seq_len} tokens",
                blocks.len()
            )));
        }
        Ok(Self {
            blocks,
            seq_len,
            block_size,
        })
    }

    /// Physical block indices in logical order.
    pub fn blocks(&self) -> &[usize] {
        &self.blocks
    }

    /// Number of valid tokens.
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Number of physical blocks in the table.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of completely filled blocks, `floor(seq_len / block_size)`.
    pub fn full_blocks(&self) -> usize {
        self.seq_len / self.block_size
    }

    /// Append a physical block to the table.
    pub fn append_block(&mut self, block_idx: usize) {
        self.blocks.push(block_idx);
    }

    /// Record that `n` more tokens are valid.
    pub fn advance(&mut self, n: usize) {
        self.seq_len += n;
    }

    /// Clear blocks and length. Does NOT free blocks; see
    /// [`BlockAllocator::release`].
    pub fn reset(&mut self) {
        self.blocks.clear();
        self.seq_len = 0;
    }

    /// Flatten into a block-table row of width `max_blocks_per_seq`,
    /// padding unused slots with `pad`.
    ///
    /// # Errors
    /// Returns `InvalidShape` if the table has more than `max_blocks_per_seq`
    /// blocks or a block index does not fit in `u32`.
    pub fn to_row(&self, max_blocks_per_seq: usize, pad: u32) -> Result<Vec<u32>> {
        if self.blocks.len() > max_blocks_per_seq {
            return Err(Error::InvalidShape(format!(
                "block table has {} blocks, row width is {max_blocks_per_seq}",
                self.blocks.len()
            )));
        }
        let mut row = Vec::with_capacity(max_blocks_per_seq);
        for &b in &self.blocks {
            let b = u32::try_from(b)
                .map_err(|_| Error::InvalidShape(format!("block index {b} exceeds u32")))?;
            row.push(b);
        }
        row.resize(max_blocks_per_seq, pad);
        Ok(row)
    }
}

//! Score reference configuration
//!
//! [`ScoreConfig`] carries the problem geometry as a runtime value so that
//! several configurations can coexist in one process (and in one test
//! binary). It is either deserialized from JSON, built explicitly, or
//! inferred from the shapes of the four input tensors.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::block_allocator::BlockConfig;
use crate::{Error, Result};

/// Geometry of one paged score computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreConfig {
    /// Number of sequences in the batch
    pub num_seqs: usize,

    /// Number of query heads
    pub num_heads: usize,

    /// Elements per head vector
    pub head_size: usize,

    /// Number of key/value heads (`num_heads` must be a multiple)
    pub num_kv_heads: usize,

    /// Tokens per cache block
    pub block_size: usize,

    /// Physical blocks in the key cache pool
    pub num_blocks: usize,

    /// Width of each block-table row
    pub max_blocks_per_seq: usize,
}

impl Default for ScoreConfig {
    /// The geometry of the reference benchmark harness.
    fn default() -> Self {
        Self {
            num_seqs: 1,
            num_heads: 16,
            head_size: 128,
            num_kv_heads: 2,
            block_size: 64,
            num_blocks: 3146,
            max_blocks_per_seq: 800,
        }
    }
}

impl ScoreConfig {
    /// Load configuration from a JSON file. Missing fields take their
    /// [`Default`] values.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Parse and validate configuration from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or the geometry is invalid.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Infer the configuration from input shapes:
    /// query `[num_seqs, num_heads, head_size]`,
    /// key cache `[num_blocks, block_size, num_kv_heads, head_size]`,
    /// block table `[num_seqs, max_blocks_per_seq]`.
    ///
    /// # Errors
    /// Returns `InvalidShape` for a wrong rank or an invalid geometry and
    /// `ShapeMismatch` when the shapes disagree with each other.
    pub fn infer(query: &[usize], key_cache: &[usize], block_table: &[usize]) -> Result<Self> {
        expect_rank("query", query, 3)?;
        expect_rank("key_cache", key_cache, 4)?;
        expect_rank("block_tables", block_table, 2)?;

        let config = Self {
            num_seqs: query[0],
            num_heads: query[1],
            head_size: query[2],
            num_kv_heads: key_cache[2],
            block_size: key_cache[1],
            num_blocks: key_cache[0],
            max_blocks_per_seq: block_table[1],
        };
        config.validate()?;

        if key_cache[3] != config.head_size {
            return Err(Error::ShapeMismatch {
                what: "key_cache",
                expected: config.key_cache_shape().to_vec(),
                got: key_cache.to_vec(),
            });
        }
        if block_table[0] != config.num_seqs {
            return Err(Error::ShapeMismatch {
                what: "block_tables",
                expected: config.block_table_shape().to_vec(),
                got: block_table.to_vec(),
            });
        }
        Ok(config)
    }

    /// Check the geometry is internally consistent.
    ///
    /// # Errors
    /// Returns `InvalidShape` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.num_heads == 0 || self.head_size == 0 {
            return Err(Error::InvalidShape(format!(
                "num_heads ({}) and head_size ({}) must be > 0",
                self.num_heads, self.head_size
            )));
        }
        if self.num_kv_heads == 0 || self.num_heads % self.num_kv_heads != 0 {
            return Err(Error::InvalidShape(format!(
                "num_heads ({}) must be a positive multiple of num_kv_heads ({})",
                self.num_heads, self.num_kv_heads
            )));
        }
        if self.block_size == 0 {
            return Err(Error::InvalidShape("block_size must be > 0".into()));
        }
        Ok(())
    }

    /// Query heads sharing one key/value head.
    #[must_use]
    pub fn query_group_size(&self) -> usize {
        self.num_heads / self.num_kv_heads
    }

    /// Longest context a block-table row can describe.
    #[must_use]
    pub fn max_context_len(&self) -> usize {
        self.max_blocks_per_seq * self.block_size
    }

    /// Number of fully populated blocks for a context of `context_len`
    /// tokens. A partial trailing block is not counted.
    #[must_use]
    pub fn useful_blocks(&self, context_len: usize) -> usize {
        context_len / self.block_size
    }

    /// Pool geometry for a [`BlockAllocator`](crate::BlockAllocator).
    #[must_use]
    pub fn block_config(&self) -> BlockConfig {
        BlockConfig {
            block_size: self.block_size,
            num_blocks: self.num_blocks,
        }
    }

    #[must_use]
    pub fn query_shape(&self) -> [usize; 3] {
        [self.num_seqs, self.num_heads, self.head_size]
    }

    /// `[num_seqs, num_kv_heads, query_group_size, head_size]`
    #[must_use]
    pub fn grouped_query_shape(&self) -> [usize; 4] {
        [
            self.num_seqs,
            self.num_kv_heads,
            self.query_group_size(),
            self.head_size,
        ]
    }

    #[must_use]
    pub fn key_cache_shape(&self) -> [usize; 4] {
        [
            self.num_blocks,
            self.block_size,
            self.num_kv_heads,
            self.head_size,
        ]
    }

    #[must_use]
    pub fn block_table_shape(&self) -> [usize; 2] {
        [self.num_seqs, self.max_blocks_per_seq]
    }

    #[must_use]
    pub fn context_lens_shape(&self) -> [usize; 1] {
        [self.num_seqs]
    }

    /// `[num_seqs, num_kv_heads, useful_blocks, query_group_size, block_size]`
    #[must_use]
    pub fn score_shape(&self, useful_blocks: usize) -> [usize; 5] {
        [
            self.num_seqs,
            self.num_kv_heads,
            useful_blocks,
            self.query_group_size(),
            self.block_size,
        ]
    }
}

fn expect_rank(what: &str, shape: &[usize], rank: usize) -> Result<()> {
    if shape.len() == rank {
        Ok(())
    } else {
        Err(Error::InvalidShape(format!(
            "{what} must be {rank}-D, got shape {shape:?}"
        )))
    }
}

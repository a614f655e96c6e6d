//! Integration tests for the host paged score reference.

mod test_helpers;

use pagedref::{BlockAllocator, DType, Error, PagedScoreOps, ScoreConfig, Tensor};
use pagedref_cpu::{CpuBackend, CpuTensor};
use proptest::prelude::*;
use test_helpers::{assert_matches_naive, int_pattern, Inputs};

fn scenario_config() -> ScoreConfig {
    ScoreConfig {
        num_seqs: 1,
        num_heads: 2,
        head_size: 4,
        num_kv_heads: 1,
        block_size: 2,
        num_blocks: 2,
        max_blocks_per_seq: 2,
    }
}

/// Both query heads are `[1, 2, 3, 4]`; the cache holds
/// block 0: `[1,1,1,1]`, `[1,0,-1,2]` and block 1: `[0.5;4]`, `[2,0,0,0]`.
fn scenario_one() -> Inputs {
    Inputs {
        config: scenario_config(),
        query: vec![1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0],
        keys: vec![
            1.0, 1.0, 1.0, 1.0, //
            1.0, 0.0, -1.0, 2.0, //
            0.5, 0.5, 0.5, 0.5, //
            2.0, 0.0, 0.0, 0.0,
        ],
        block_tables: vec![0, 1],
        context_lens: vec![4],
    }
}

#[test]
fn scenario_one_hand_computed() {
    let scores = scenario_one().scores();
    assert_eq!(scores.shape(), &[1, 1, 2, 2, 2]);
    // [g][p]: dot([1,2,3,4], key row p)
    assert_eq!(scores.block(0, 0, 0), &[10.0, 6.0, 10.0, 6.0]);
    assert_eq!(scores.block(0, 0, 1), &[5.0, 2.0, 5.0, 2.0]);
}

#[test]
fn scenario_one_bf16_matches_f16() {
    let inputs = scenario_one();
    let f16 = inputs.try_scores(DType::F16).unwrap();
    let bf16 = inputs.try_scores(DType::BF16).unwrap();
    assert_eq!(f16, bf16);
}

#[test]
fn scenario_two_partial_block_truncated() {
    let config = ScoreConfig {
        num_blocks: 3,
        max_blocks_per_seq: 3,
        ..scenario_config()
    };
    let inputs = Inputs {
        config,
        query: int_pattern(8, 1),
        keys: int_pattern(3 * 2 * 4, 2),
        block_tables: vec![2, 0, 1],
        context_lens: vec![5],
    };
    let scores = inputs.scores();
    // floor(5 / 2) = 2: the fifth token's block is not scored
    assert_eq!(scores.useful_blocks(0), 2);
    assert_eq!(scores.shape(), &[1, 1, 2, 2, 2]);
    assert_matches_naive(&inputs, &scores);
}

#[test]
fn scenario_three_no_cross_sequence_contamination() {
    let config = ScoreConfig {
        num_seqs: 2,
        num_heads: 4,
        head_size: 4,
        num_kv_heads: 2,
        block_size: 2,
        num_blocks: 4,
        max_blocks_per_seq: 2,
    };
    let inputs = Inputs {
        config,
        query: int_pattern(2 * 4 * 4, 3),
        keys: int_pattern(4 * 2 * 2 * 4, 5),
        block_tables: vec![0, 3, 3, 1],
        context_lens: vec![4, 4],
    };
    let scores = inputs.scores();
    assert_matches_naive(&inputs, &scores);

    // Sequence 1 alone, with the same physical blocks, gives the same rows.
    let alone = Inputs {
        config: ScoreConfig {
            num_seqs: 1,
            ..config
        },
        query: inputs.query[16..].to_vec(),
        keys: inputs.keys.clone(),
        block_tables: vec![3, 1],
        context_lens: vec![4],
    }
    .scores();
    for j in 0..2 {
        for k in 0..2 {
            assert_eq!(scores.block(1, j, k), alone.block(0, j, k));
        }
    }
}

#[test]
fn divergent_context_lengths_use_per_sequence_blocks() {
    let config = ScoreConfig {
        num_seqs: 3,
        num_heads: 2,
        head_size: 3,
        num_kv_heads: 1,
        block_size: 2,
        num_blocks: 6,
        max_blocks_per_seq: 3,
    };
    let inputs = Inputs {
        config,
        query: int_pattern(3 * 2 * 3, 7),
        keys: int_pattern(6 * 2 * 3, 11),
        block_tables: vec![5, 4, 3, 0, 0, 0, 1, 2, 0],
        context_lens: vec![6, 1, 3],
    };
    let scores = inputs.scores();
    assert_eq!(scores.shape()[2], 3);
    assert_eq!(
        (0..3).map(|i| scores.useful_blocks(i)).collect::<Vec<_>>(),
        vec![3, 0, 1]
    );
    assert_matches_naive(&inputs, &scores);
    assert!(scores.block(1, 0, 0).iter().all(|&v| v == 0.0));
}

#[test]
fn allocator_built_tables_with_reused_blocks() {
    let config = ScoreConfig {
        num_seqs: 2,
        num_heads: 4,
        head_size: 3,
        num_kv_heads: 2,
        block_size: 2,
        num_blocks: 5,
        max_blocks_per_seq: 4,
    };
    let mut pool = BlockAllocator::new(&config.block_config());
    let mut first = pool.allocate_sequence(5).unwrap();
    let second = pool.allocate_sequence(3).unwrap();
    assert_eq!(pool.num_free(), 0);

    // The first sequence finishes and its blocks back a new one.
    pool.release(&mut first);
    let third = pool.allocate_sequence(6).unwrap();

    // Padding slots hold a value no pool has; they must never be read.
    let mut block_tables = second.to_row(config.max_blocks_per_seq, u32::MAX).unwrap();
    block_tables.extend(third.to_row(config.max_blocks_per_seq, u32::MAX).unwrap());

    let inputs = Inputs {
        config,
        query: int_pattern(2 * 4 * 3, 4),
        keys: int_pattern(5 * 2 * 2 * 3, 6),
        block_tables,
        context_lens: vec![3, 6],
    };
    let scores = inputs.scores();
    assert_eq!(scores.shape(), &[2, 2, 3, 2, 2]);
    assert_eq!((scores.useful_blocks(0), scores.useful_blocks(1)), (1, 3));
    assert_matches_naive(&inputs, &scores);
}

#[test]
fn group_members_share_the_physical_block() {
    // Query head g of the group is (g + 1) times head 0, so each output row
    // must be the same multiple of row 0.
    let config = ScoreConfig {
        num_seqs: 1,
        num_heads: 3,
        head_size: 5,
        num_kv_heads: 1,
        block_size: 4,
        num_blocks: 3,
        max_blocks_per_seq: 2,
    };
    let base = int_pattern(5, 2);
    let query = (1..=3u8)
        .flat_map(|m| base.iter().map(move |&v| v * f32::from(m)))
        .collect();
    let inputs = Inputs {
        config,
        query,
        keys: int_pattern(3 * 4 * 5, 9),
        block_tables: vec![2, 1],
        context_lens: vec![8],
    };
    let scores = inputs.scores();
    for k in 0..2 {
        let block = scores.block(0, 0, k);
        for g in 0..3u8 {
            for p in 0..4 {
                assert!(block[usize::from(g) * 4 + p] == block[p] * f32::from(g + 1));
            }
        }
    }
}

#[test]
fn shape_error_for_wrong_query_rank() {
    let inputs = scenario_one();
    let (q, k, bt, cl) = inputs.tensors(DType::F16);
    let q4 = q.reshape(&[1, 1, 2, 4]);
    let err = CpuBackend::paged_scores(&q4, &k, &bt, &cl).unwrap_err();
    assert!(matches!(err, Error::InvalidShape(msg) if msg.contains("query")));
}

#[test]
fn shape_error_for_context_len_count() {
    let inputs = scenario_one();
    let (q, k, bt, _) = inputs.tensors(DType::F16);
    let cl = CpuTensor::from_u32(&[2], &[4, 4]);
    let err = CpuBackend::paged_scores(&q, &k, &bt, &cl).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { what: "context_lens", .. }));
}

#[test]
fn shape_error_for_context_longer_than_table() {
    let mut inputs = scenario_one();
    inputs.context_lens = vec![5];
    assert!(matches!(
        inputs.try_scores(DType::F16),
        Err(Error::InvalidShape(_))
    ));
}

#[test]
fn dtype_error_for_f32_storage() {
    let inputs = scenario_one();
    assert!(matches!(
        inputs.try_scores(DType::F32),
        Err(Error::UnsupportedDtype(_))
    ));
}

#[test]
fn range_error_for_stale_block_index() {
    let mut inputs = scenario_one();
    inputs.block_tables = vec![0, 2];
    let err = inputs.try_scores(DType::F16).unwrap_err();
    assert!(matches!(
        err,
        Error::BlockOutOfRange {
            seq: 0,
            logical_block: 1,
            physical_block: 2,
            num_blocks: 2
        }
    ));
}

#[test]
fn reference_harness_geometry() {
    // Default geometry with all-ones keys and query head h = h + 1:
    // every score is (h + 1) * head_size.
    let config = ScoreConfig {
        num_blocks: 16,
        max_blocks_per_seq: 8,
        ..ScoreConfig::default()
    };
    let query = (0..config.num_heads)
        .flat_map(|h| {
            #[allow(clippy::cast_precision_loss)]
            let v = (h + 1) as f32;
            std::iter::repeat(v).take(config.head_size)
        })
        .collect();
    let inputs = Inputs {
        config,
        query,
        keys: vec![1.0; 16 * 64 * 2 * 128],
        block_tables: (0..8).collect(),
        context_lens: vec![512],
    };
    let scores = inputs.scores();
    assert_eq!(scores.shape(), &[1, 2, 8, 8, 64]);
    let first = scores.block(0, 0, 0);
    for g in 0..8u16 {
        let row = &first[usize::from(g) * 64..usize::from(g + 1) * 64];
        assert!(row.iter().all(|&v| v == f32::from(g + 1) * 128.0));
    }
    let second_head = scores.block(0, 1, 7);
    assert!(second_head[..64].iter().all(|&v| v == 9.0 * 128.0));
}

#[test]
fn empty_batch_gives_empty_scores() {
    let inputs = Inputs {
        config: ScoreConfig {
            num_seqs: 0,
            ..scenario_config()
        },
        query: vec![],
        keys: scenario_one().keys,
        block_tables: vec![],
        context_lens: vec![],
    };
    for dtype in [DType::F16, DType::BF16] {
        let scores = inputs.try_scores(dtype).unwrap();
        assert_eq!(scores.shape(), &[0, 1, 0, 2, 2]);
        assert!(scores.as_slice().is_empty());
    }
}

#[test]
fn empty_pool_with_empty_contexts() {
    // The block-table entries are padding: nothing may read them.
    let inputs = Inputs {
        config: ScoreConfig {
            num_seqs: 2,
            num_blocks: 0,
            ..scenario_config()
        },
        query: int_pattern(2 * 2 * 4, 1),
        keys: vec![],
        block_tables: vec![0, 2, 7, u32::MAX],
        context_lens: vec![0, 0],
    };
    let scores = inputs.scores();
    assert_eq!(scores.shape(), &[2, 1, 0, 2, 2]);
    assert_eq!((scores.useful_blocks(0), scores.useful_blocks(1)), (0, 0));
    assert_matches_naive(&inputs, &scores);
}

#[test]
fn empty_pool_with_tokens_is_out_of_range() {
    let inputs = Inputs {
        config: ScoreConfig {
            num_blocks: 0,
            ..scenario_config()
        },
        query: int_pattern(2 * 4, 1),
        keys: vec![],
        block_tables: vec![0, 0],
        context_lens: vec![1],
    };
    assert!(matches!(
        inputs.try_scores(DType::F16),
        Err(Error::BlockOutOfRange {
            seq: 0,
            logical_block: 0,
            physical_block: 0,
            num_blocks: 0
        })
    ));
}

#[test]
fn zero_width_block_table() {
    let mut inputs = Inputs {
        config: ScoreConfig {
            max_blocks_per_seq: 0,
            ..scenario_config()
        },
        block_tables: vec![],
        context_lens: vec![0],
        ..scenario_one()
    };
    let scores = inputs.scores();
    assert_eq!(scores.shape(), &[1, 1, 0, 2, 2]);

    // a zero-width row can describe no tokens at all
    inputs.context_lens = vec![1];
    assert!(matches!(
        inputs.try_scores(DType::F16),
        Err(Error::InvalidShape(_))
    ));
}

// ---- Properties ----

fn arb_inputs() -> impl Strategy<Value = Inputs> {
    (
        0usize..=3, // num_seqs
        1usize..=2, // num_kv_heads
        1usize..=3, // query_group_size
        1usize..=9, // head_size
        1usize..=4, // block_size
        0usize..=6, // num_blocks
        0usize..=4, // max_blocks_per_seq
    )
        .prop_flat_map(|(s, kvh, g, d, bs, nb, mb)| {
            let config = ScoreConfig {
                num_seqs: s,
                num_heads: kvh * g,
                head_size: d,
                num_kv_heads: kvh,
                block_size: bs,
                num_blocks: nb,
                max_blocks_per_seq: mb,
            };
            // An empty pool can only back empty contexts.
            let max_ctx = if nb == 0 {
                0
            } else {
                u32::try_from(config.max_context_len()).unwrap()
            };
            (
                Just(config),
                prop::collection::vec(-4i8..=4, s * kvh * g * d),
                prop::collection::vec(-4i8..=4, nb * bs * kvh * d),
                prop::collection::vec(0..u32::try_from(nb.max(1)).unwrap(), s * mb),
                prop::collection::vec(0..=max_ctx, s),
            )
        })
        .prop_map(|(config, q, k, block_tables, context_lens)| Inputs {
            config,
            query: q.into_iter().map(f32::from).collect(),
            keys: k.into_iter().map(f32::from).collect(),
            block_tables,
            context_lens,
        })
}

proptest! {
    #[test]
    fn prop_matches_naive_formula(inputs in arb_inputs()) {
        let scores = inputs.scores();
        let max_useful = inputs
            .context_lens
            .iter()
            .map(|&l| inputs.config.useful_blocks(l as usize))
            .max()
            .unwrap_or(0);
        prop_assert_eq!(scores.shape(), &inputs.config.score_shape(max_useful));
        assert_matches_naive(&inputs, &scores);
    }

    #[test]
    fn prop_deterministic(inputs in arb_inputs()) {
        let a = inputs.scores();
        let b = inputs.scores();
        let a_bits: Vec<u32> = a.as_slice().iter().map(|v| v.to_bits()).collect();
        let b_bits: Vec<u32> = b.as_slice().iter().map(|v| v.to_bits()).collect();
        prop_assert_eq!(a_bits, b_bits);
    }

    #[test]
    fn prop_block_table_indirection_is_local(
        inputs in arb_inputs(),
        seq_pick in any::<prop::sample::Index>(),
        block_pick in any::<prop::sample::Index>(),
        target_pick in any::<prop::sample::Index>(),
    ) {
        let c = inputs.config;
        prop_assume!(c.num_seqs > 0);
        let seq = seq_pick.index(c.num_seqs);
        let useful = c.useful_blocks(inputs.context_lens[seq] as usize);
        prop_assume!(useful > 0);
        let k = block_pick.index(useful);

        let mut changed = inputs.clone();
        changed.block_tables[seq * c.max_blocks_per_seq + k] =
            u32::try_from(target_pick.index(c.num_blocks)).unwrap();

        let before = inputs.scores();
        let after = changed.scores();
        assert_matches_naive(&changed, &after);
        for i in 0..c.num_seqs {
            for j in 0..c.num_kv_heads {
                for b in 0..before.shape()[2] {
                    if i == seq && b == k {
                        continue;
                    }
                    prop_assert_eq!(before.block(i, j, b), after.block(i, j, b));
                }
            }
        }
    }
}

//! Parallel execution must match sequential execution on random blocks.

mod common;

use common::*;
use occ_executor::{execute_block, execute_block_sequential};
use rand::seq::SliceRandom;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn test_random_blocks_match_sequential() {
    let registry = registry();
    for seed in 0..10 {
        let base = random_state(6);
        let txs = random_block(seed, 150, 6, 4);
        let expected = execute_block_sequential(&registry, &txs, &base).unwrap();

        for threads in [1, 2, 4, 8] {
            let output = execute_block(registry.clone(), &txs, &base, threads).unwrap();
            assert_same_output(&expected, &output, &format!("seed={seed} threads={threads}"));
        }
    }
}

#[test]
fn test_extreme_contention_matches_sequential() {
    // Two accounts and one counter: nearly every pair of transactions conflicts
    let registry = registry();
    for seed in 0..5 {
        let base = random_state(2);
        let txs = random_block(1_000 + seed, 300, 2, 1);
        let expected = execute_block_sequential(&registry, &txs, &base).unwrap();

        for threads in [2, 4, 8] {
            let output = execute_block(registry.clone(), &txs, &base, threads).unwrap();
            assert_same_output(&expected, &output, &format!("seed={seed} threads={threads}"));
        }
    }
}

#[test]
fn test_repeated_runs_are_deterministic() {
    let registry = registry();
    let base = random_state(3);
    let txs = random_block(42, 200, 3, 2);

    let first = execute_block(registry.clone(), &txs, &base, 8).unwrap();
    for run in 0..10 {
        let output = execute_block(registry.clone(), &txs, &base, 8).unwrap();
        assert_same_output(&first, &output, &format!("run={run}"));
    }
}

#[test]
fn test_shuffled_blocks_match_sequential() {
    let registry = registry();
    let base = random_state(8);
    let mut txs = random_block(5, 100, 8, 3);
    let mut rng = StdRng::seed_from_u64(5);

    for round in 0..5 {
        txs.shuffle(&mut rng);
        let expected = execute_block_sequential(&registry, &txs, &base).unwrap();
        let output = execute_block(registry.clone(), &txs, &base, 4).unwrap();
        assert_same_output(&expected, &output, &format!("round={round}"));
    }
}

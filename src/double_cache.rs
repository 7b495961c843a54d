//! Batched double-precision PRNG over the permutation.
//!
//! Mirrors a cached-batch `Math.random` replacement: each 8-round block
//! yields 8 doubles, one per cursor slot, each built from a low word
//! `e[cursor]` and 21 bits of a high word `e[cursor + 8]`. The counter only
//! moves when the cursor wraps from 7 to 0, yet the block is recomputed on
//! every draw. That redundancy is part of the observable sequence and is
//! kept as is.

use tracing::trace;

use crate::constants::{CACHE_SEED_WORDS, COUNTER_MASK, CURSOR_START, SEED_MODULUS};
use crate::lcg::SeedGenerator;
use crate::permutation::{COUNTER_WORD, PermutationState, STATE_WORDS};

/// Rounds used for every cache block.
pub const CACHE_ROUNDS: usize = 8;

/// Doubles produced per block.
pub const BATCH_SIZE: usize = 8;

const TWO_POW_32: f64 = 4_294_967_296.0;
const TWO_POW_53: f64 = 9_007_199_254_740_992.0;

/// Deterministic random-number cache seeded from a millisecond timestamp.
#[derive(Debug, Clone)]
pub struct DoubleCache {
    state: PermutationState,
    cursor: usize,
}

impl DoubleCache {
    /// Seed the cache: 12 table words, the masked timestamp as counter, then
    /// three LCG outputs.
    pub fn new(timestamp_ms: u64) -> Self {
        let mut words = [0u32; STATE_WORDS];
        words[..CACHE_SEED_WORDS.len()].copy_from_slice(&CACHE_SEED_WORDS);
        words[COUNTER_WORD] = COUNTER_MASK & timestamp_ms as u32;

        let mut seeds = SeedGenerator::new(timestamp_ms);
        for (slot, seed) in words[COUNTER_WORD + 1..].iter_mut().zip(&mut seeds) {
            *slot = seed % SEED_MODULUS;
        }
        trace!(counter = words[COUNTER_WORD], tail = ?&words[COUNTER_WORD + 1..], "seeded double cache");

        Self::from_state(PermutationState::new(words), CURSOR_START)
    }

    /// Resume from an explicit state and cursor. `cursor` is taken modulo the batch size.
    pub fn from_state(state: PermutationState, cursor: usize) -> Self {
        Self {
            state,
            cursor: cursor % BATCH_SIZE,
        }
    }

    pub fn state(&self) -> &PermutationState {
        &self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Next double in `[0, 1)`.
    pub fn rand(&mut self) -> f64 {
        let e = self.state.block(CACHE_ROUNDS);
        let low = e[self.cursor];
        let high = (e[self.cursor + BATCH_SIZE] & 0xffff_fff0) >> 11;

        if self.cursor == BATCH_SIZE - 1 {
            self.state.bump_counter();
            self.cursor = 0;
        } else {
            self.cursor += 1;
        }

        (low as f64 + TWO_POW_32 * high as f64) / TWO_POW_53
    }

    /// `floor(rand() * 2^32)`.
    pub fn next_u32(&mut self) -> u32 {
        (self.rand() * TWO_POW_32) as u32
    }

    /// `floor(rand() * bound)`, always below `bound` for `bound > 0`.
    pub fn below(&mut self, bound: usize) -> usize {
        (self.rand() * bound as f64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: u64 = 1767083930000;

    #[test]
    fn test_seeded_state() {
        let cache = DoubleCache::new(TS);
        let expected = [
            0x9610b96b, 0xa2059a1c, 0xbf7d9295, 0x9cfd98d8, 0x0cf899e0, 0xaeb64559, 0x5949af24,
            0x8092054d, 0x0c95d927, 0x0b086719, 0xad111c64, 0xde807cca, 0x6e68f190, 0x61a8ea89,
            0x3b57ca8e, 0x3becb2af,
        ];
        assert_eq!(*cache.state().words(), expected);
        assert_eq!(cache.cursor(), CURSOR_START);
    }

    #[test]
    fn test_first_draws() {
        let mut cache = DoubleCache::new(TS);
        assert_eq!(cache.rand(), 0.5654891866654438);
        assert_eq!(cache.rand(), 0.38255837320854524);
        assert_eq!(cache.rand(), 0.7071414727622485);
    }

    #[test]
    fn test_batch_shares_one_block() {
        let mut cache = DoubleCache::new(TS);
        let counter = cache.state().counter();
        let block = cache.state().block(CACHE_ROUNDS);

        for slot in 0..BATCH_SIZE {
            assert_eq!(cache.cursor(), slot);
            assert_eq!(cache.state().counter(), counter, "counter moved at slot {}", slot);
            let expected = (block[slot] as f64
                + TWO_POW_32 * ((block[slot + 8] & 0xffff_fff0) >> 11) as f64)
                / TWO_POW_53;
            assert_eq!(cache.rand(), expected, "slot {}", slot);
        }

        // Ninth draw comes from the next block.
        assert_eq!(cache.cursor(), 0);
        assert_eq!(cache.state().counter(), counter.wrapping_add(1));
        let next_block = cache.state().block(CACHE_ROUNDS);
        assert_ne!(next_block, block);
        let expected = (next_block[0] as f64
            + TWO_POW_32 * ((next_block[8] & 0xffff_fff0) >> 11) as f64)
            / TWO_POW_53;
        assert_eq!(cache.rand(), expected);
    }

    #[test]
    fn test_draws_stay_in_unit_interval() {
        let mut cache = DoubleCache::new(0);
        for _ in 0..256 {
            let x = cache.rand();
            assert!((0.0..1.0).contains(&x), "draw {} out of range", x);
        }
    }

    #[test]
    fn test_quantized_draws() {
        let mut a = DoubleCache::new(TS);
        let mut b = DoubleCache::new(TS);
        assert_eq!(a.next_u32(), (b.rand() * TWO_POW_32) as u32);
        assert_eq!(a.next_u32(), 1643075701);
        for _ in 0..64 {
            assert!(a.below(177) < 177);
        }
    }

    #[test]
    fn test_counter_wraps() {
        let mut words = [0u32; STATE_WORDS];
        words[COUNTER_WORD] = u32::MAX;
        let mut cache = DoubleCache::from_state(PermutationState::new(words), 7);
        cache.rand();
        assert_eq!(cache.state().counter(), 0);
        assert_eq!(cache.cursor(), 0);
    }
}

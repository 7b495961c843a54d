//! Linear congruential generator seeding the random-number cache.
//!
//! `seed = (seed * 1103515245 + 12345) & 0x7fffffff`, starting from the raw
//! millisecond timestamp. The browser computes this with big integers; only
//! the low 31 bits survive the mask, so wrapping `u64` arithmetic gives the
//! same sequence.

const MULTIPLIER: u64 = 1_103_515_245;
const INCREMENT: u64 = 12_345;
const MASK: u64 = 0x7fff_ffff;

/// Stateful LCG. Yields an endless stream of 31-bit values.
#[derive(Debug, Clone)]
pub struct SeedGenerator {
    seed: u64,
}

impl SeedGenerator {
    pub fn new(timestamp_ms: u64) -> Self {
        Self { seed: timestamp_ms }
    }
}

impl Iterator for SeedGenerator {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        self.seed = self
            .seed
            .wrapping_mul(MULTIPLIER)
            .wrapping_add(INCREMENT)
            & MASK;
        Some(self.seed as u32)
    }
}

//! Counter-mode keystream over the permutation.
//!
//! State = 4 fixed nonce words followed by 12 key words drawn from the
//! random-number cache. Each 64-byte chunk of the payload is XORed with one
//! block; the counter word is bumped between chunks but not after the last
//! one. Keystream words are applied little-endian, so a trailing partial word
//! only touches the bytes that exist.
//!
//! There is no authentication tag. Applying the same cipher twice restores
//! the input.

use crate::constants::NONCE_WORDS;
use crate::double_cache::DoubleCache;
use crate::permutation::{PermutationState, STATE_WORDS};

/// Key words drawn per token.
pub const KEY_WORDS: usize = 12;

/// Smallest round count a token can use.
pub const MIN_ROUNDS: usize = 7;

/// Number of distinct round counts (7..=14).
pub const ROUND_CHOICES: usize = 8;

const BLOCK_BYTES: usize = STATE_WORDS * 4;

/// The 12 random words of a cipher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySchedule([u32; KEY_WORDS]);

impl KeySchedule {
    pub const fn new(words: [u32; KEY_WORDS]) -> Self {
        Self(words)
    }

    /// Draw 12 words, one `floor(rand() * 2^32)` each.
    pub fn draw(cache: &mut DoubleCache) -> Self {
        Self(core::array::from_fn(|_| cache.next_u32()))
    }

    pub fn words(&self) -> &[u32; KEY_WORDS] {
        &self.0
    }

    /// The key words as 48 little-endian bytes.
    pub fn to_le_bytes(&self) -> [u8; KEY_WORDS * 4] {
        let mut out = [0u8; KEY_WORDS * 4];
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.0.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Nonce words followed by the key words.
    pub fn initial_state(&self) -> PermutationState {
        let mut words = [0u32; STATE_WORDS];
        words[..NONCE_WORDS.len()].copy_from_slice(&NONCE_WORDS);
        words[NONCE_WORDS.len()..].copy_from_slice(&self.0);
        PermutationState::new(words)
    }
}

/// Draw a round count in `7..=14`.
pub fn draw_rounds(cache: &mut DoubleCache) -> usize {
    MIN_ROUNDS + cache.below(ROUND_CHOICES)
}

/// Keystream cipher for one token.
#[derive(Debug, Clone)]
pub struct KeystreamCipher {
    state: PermutationState,
    rounds: usize,
}

impl KeystreamCipher {
    pub fn new(key: &KeySchedule, rounds: usize) -> Self {
        Self {
            state: key.initial_state(),
            rounds,
        }
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// XOR `data` in place with the keystream. Each call starts from the
    /// initial counter.
    pub fn apply_keystream(&self, data: &mut [u8]) {
        let mut state = self.state;
        let mut chunks = data.chunks_mut(BLOCK_BYTES).peekable();
        while let Some(chunk) = chunks.next() {
            let stream = state.block(self.rounds);
            let stream_bytes = stream.iter().flat_map(|w| w.to_le_bytes());
            for (byte, ks) in chunk.iter_mut().zip(stream_bytes) {
                *byte ^= ks;
            }
            if chunks.peek().is_some() {
                state.bump_counter();
            }
        }
    }

    /// Convenience wrapper returning a new buffer.
    pub fn apply(&self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.apply_keystream(&mut out);
        out
    }
}

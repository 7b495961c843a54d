//! ChaCha-style ARX block function.
//!
//! Same quarter round as ChaCha, but the diagonal pass uses the groupings
//! found in the browser bundle: `(2,7,12,13)` and `(3,4,13,14)` instead of
//! ChaCha's `(2,7,8,13)` and `(3,4,9,14)`. Rounds alternate column/diagonal
//! starting with a column round, and an odd round count ends on a column
//! round. The output is the worked state plus the input state (feed-forward).

/// Words in a permutation state.
pub const STATE_WORDS: usize = 16;

/// Index of the block counter word.
pub const COUNTER_WORD: usize = 12;

/// A 16-word permutation state.
///
/// The random-number cache and the keystream cipher each own one of these
/// and advance their own counter word; the two are never shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermutationState([u32; STATE_WORDS]);

impl PermutationState {
    pub const fn new(words: [u32; STATE_WORDS]) -> Self {
        Self(words)
    }

    pub fn words(&self) -> &[u32; STATE_WORDS] {
        &self.0
    }

    pub fn counter(&self) -> u32 {
        self.0[COUNTER_WORD]
    }

    /// Advance the counter word by one, wrapping at 2^32.
    pub fn bump_counter(&mut self) {
        self.0[COUNTER_WORD] = self.0[COUNTER_WORD].wrapping_add(1);
    }

    /// Run the block function over this state. The state itself is untouched.
    pub fn block(&self, rounds: usize) -> [u32; STATE_WORDS] {
        block(&self.0, rounds)
    }
}

#[inline(always)]
fn quarter_round(w: &mut [u32; STATE_WORDS], a: usize, b: usize, c: usize, d: usize) {
    w[a] = w[a].wrapping_add(w[b]);
    w[d] = (w[d] ^ w[a]).rotate_left(16);
    w[c] = w[c].wrapping_add(w[d]);
    w[b] = (w[b] ^ w[c]).rotate_left(12);
    w[a] = w[a].wrapping_add(w[b]);
    w[d] = (w[d] ^ w[a]).rotate_left(8);
    w[c] = w[c].wrapping_add(w[d]);
    w[b] = (w[b] ^ w[c]).rotate_left(7);
}

pub(crate) fn column_round(w: &mut [u32; STATE_WORDS]) {
    quarter_round(w, 0, 4, 8, 12);
    quarter_round(w, 1, 5, 9, 13);
    quarter_round(w, 2, 6, 10, 14);
    quarter_round(w, 3, 7, 11, 15);
}

pub(crate) fn diagonal_round(w: &mut [u32; STATE_WORDS]) {
    quarter_round(w, 0, 5, 10, 15);
    quarter_round(w, 1, 6, 11, 12);
    quarter_round(w, 2, 7, 12, 13);
    quarter_round(w, 3, 4, 13, 14);
}

/// Apply `rounds` rounds to a copy of `state` and add the input back in.
///
/// `rounds == 0` is accepted and yields `2 * state` word-wise.
pub fn block(state: &[u32; STATE_WORDS], rounds: usize) -> [u32; STATE_WORDS] {
    let mut w = *state;
    let mut r = 0;
    while r < rounds {
        column_round(&mut w);
        r += 1;
        if r >= rounds {
            break;
        }
        diagonal_round(&mut w);
        r += 1;
    }
    for (out, input) in w.iter_mut().zip(state.iter()) {
        *out = out.wrapping_add(*input);
    }
    w
}

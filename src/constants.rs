//! The constant table behind both permutation states.
//!
//! Recovered from the obfuscated browser bundle, where it is a single array
//! that the code indexes into for every magic number. Most slots are small
//! integers the bundle uses elsewhere; the pipeline only reads the slots
//! named below. Slot 5 is empty in the bundle and is kept empty here so that
//! the indices line up.
//!
//! All lookups happen in `const` context, so reading the empty slot is a
//! compile error rather than a runtime panic.

/// Number of slots in the table.
pub const TABLE_LEN: usize = 93;

#[rustfmt::skip]
const TABLE: [Option<u32>; TABLE_LEN] = [
    Some(u32::MAX), Some(138), Some(1498001188), Some(211147047), Some(253), None,
    Some(203), Some(288), Some(9), Some(1196819126), Some(3212677781), Some(135),
    Some(263), Some(193), Some(58), Some(18), Some(244), Some(2931180889), Some(240),
    Some(173), Some(268), Some(2157053261), Some(261), Some(175), Some(14), Some(5),
    Some(171), Some(270), Some(156), Some(258), Some(13), Some(15), Some(3732962506),
    Some(185), Some(169), Some(2), Some(6), Some(132), Some(162), Some(200), Some(3),
    Some(160), Some(217618912), Some(62), Some(2517678443), Some(44), Some(164), Some(4),
    Some(96), Some(183), Some(2903579748), Some(3863347763), Some(119), Some(181),
    Some(10), Some(190), Some(8), Some(2654435769), Some(259), Some(104), Some(230),
    Some(128), Some(2633865432), Some(225), Some(1), Some(257), Some(143), Some(179),
    Some(16), Some(600974999), Some(185100057), Some(32), Some(188), Some(53),
    Some(2718276124), Some(177), Some(196), Some(u32::MAX), Some(147), Some(117), Some(17),
    Some(49), Some(7), Some(28), Some(12), Some(266), Some(216), Some(11), Some(0),
    Some(45), Some(166), Some(247), Some(1451689750),
];

const fn word(index: usize) -> u32 {
    match TABLE[index] {
        Some(value) => value,
        None => panic!("constant table slot is empty"),
    }
}

/// Look up a slot. Returns `None` for the empty slot and for out-of-range indices.
pub fn get(index: usize) -> Option<u32> {
    TABLE.get(index).copied().flatten()
}

/// Words 0..12 of the random-number cache state.
pub const CACHE_SEED_WORDS: [u32; 12] = [
    word(44),
    word(74),
    word(10),
    word(62),
    word(42),
    word(17),
    word(2),
    word(21),
    word(3),
    word(70),
    word(50),
    word(32),
];

/// ANDed with the low 32 bits of the timestamp to form the cache counter word.
pub const COUNTER_MASK: u32 = word(0);

/// Modulus applied to each LCG output before it enters the cache state.
pub const SEED_MODULUS: u32 = word(77);

/// Initial cursor into the 8-slot double batch.
pub const CURSOR_START: usize = word(88) as usize;

/// Fixed words 0..4 of the keystream cipher state.
pub const NONCE_WORDS: [u32; 4] = [word(9), word(69), word(51), word(92)];

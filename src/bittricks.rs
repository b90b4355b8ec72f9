// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
bit packing for on-chip storage bookkeeping.

Storage is tracked in dwords, one bit per dword, so most of this is
rounding bit counts up to dwords and building contiguous masks.
*/

/// Number of dwords needed to hold `bits` bits.
pub const fn dwords_for_bits(bits: u32) -> u32 {
    bits.div_ceil(32)
}

/// Number of bytes needed to hold `bits` bits.
pub const fn bytes_for_bits(bits: u32) -> u32 {
    bits.div_ceil(8)
}

/// A mask with `len` bits set, starting at bit `start`.
///
/// # Panics
/// If the range does not fit in 32 bits.
pub const fn range_mask(start: u32, len: u32) -> u32 {
    assert!(start + len <= 32, "range does not fit in a dword mask");
    if len == 0 {
        0
    } else if len == 32 {
        u32::MAX
    } else {
        ((1u32 << len) - 1) << start
    }
}

/// A mask of the low `bits` bits of a dword.
pub const fn low_bits(bits: u32) -> u32 {
    range_mask(0, bits)
}

/// Rounds up to the next power of two; zero rounds to one.
pub const fn next_power_of_two(value: u32) -> u32 {
    value.next_power_of_two()
}

//! Wraparound-aware ordering for 32-bit frame counters.
//!
//! Frame counters wrap at 2^32. Two counters are compared with the
//! half-range rule: `v` is newer than `w` iff `(v - w) mod 2^32` is nonzero
//! and below 2^31. Every ordering decision in the relay goes through these
//! helpers; comparing counters with `<` directly is a bug.

const HALF_RANGE: u32 = 1 << 31;

/// Returns true iff `v` is strictly newer than `w` under wraparound.
#[inline]
#[must_use]
pub fn newer(v: u32, w: u32) -> bool {
    v != w && v.wrapping_sub(w) < HALF_RANGE
}

/// Returns true iff `v` is strictly older than `w` under wraparound.
#[inline]
#[must_use]
pub fn older(v: u32, w: u32) -> bool {
    newer(w, v)
}

/// Number of frames `v` trails `lead` by, clamped to zero when `v` is ahead.
#[inline]
#[must_use]
pub fn lag_behind(lead: u32, v: u32) -> u32 {
    if newer(v, lead) {
        0
    } else {
        lead.wrapping_sub(v)
    }
}

//! # Canary Guard Codec
//!
//! Fixed guard-byte patterns written at both boundaries of every tracked
//! allocation. A mismatch at free time means something wrote outside its
//! buffer.

use static_assertions::const_assert_eq;

/// Guard-band width on each side of a tracked payload.
pub const CANARY_LEN: usize = 8;

/// Pattern written immediately before the first caller-visible byte.
pub const HEADER_CANARY: [u8; CANARY_LEN] = [0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68];

/// Pattern written immediately after the last caller-visible byte.
pub const TAIL_CANARY: [u8; CANARY_LEN] = [0x80, 0x81, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87];

const_assert_eq!(HEADER_CANARY.len(), CANARY_LEN);
const_assert_eq!(TAIL_CANARY.len(), CANARY_LEN);

/// Compare a guard region against its expected pattern.
#[inline]
pub fn matches(region: &[u8], pattern: &[u8; CANARY_LEN]) -> bool {
    region.len() == CANARY_LEN && region == pattern
}

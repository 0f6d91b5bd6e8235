//! Vector id generation and the stable ring hash.

use rand::Rng;

/// Lower bound of the id space, `2^32`. Ids below this are reserved for
/// caller-assigned identifiers from legacy imports.
pub const MIN_VECTOR_ID: i64 = 1 << 32;

/// Draws a fresh positive vector id uniformly from `[2^32, 2^63 - 1]`.
///
/// The draw is deliberately not monotonic: monotone ids would hash into a
/// narrow arc and concentrate on one shard. `thread_rng` keeps the source
/// thread-safe without shared state.
#[must_use]
pub fn generate_vector_id() -> i64 {
    rand::thread_rng().gen_range(MIN_VECTOR_ID..=i64::MAX)
}

/// Maps a vector id onto the 64-bit ring.
///
/// SplitMix64: deterministic across processes and endian-independent,
/// since it only performs integer arithmetic on the id value. Must never
/// change once data has been placed.
#[must_use]
pub fn ring_hash(id: i64) -> u64 {
    let mut z = (id as u64).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

//! Deterministic hashing for sync-state checksums.
//!
//! Peers compare checksums of their sync buffers to detect desyncs, so the
//! hash must not depend on a per-process seed the way
//! `std::collections::hash_map::DefaultHasher` does. This module uses 64-bit
//! FNV-1a over the codec bytes of a state. The codec uses fixed-width integers,
//! so identical states hash identically on every peer.
//!
//! FNV-1a is not cryptographically secure. It only has to detect accidental divergence.
//!
//! ```
//! use netsim_model::hash::{checksum, fnv1a_hash, DeterministicHasher};
//! use std::hash::{Hash, Hasher};
//!
//! let mut hasher = DeterministicHasher::new();
//! 42u32.hash(&mut hasher);
//! assert_eq!(hasher.finish(), fnv1a_hash(&42u32));
//!
//! assert_eq!(checksum(&(1u8, 2u16)).unwrap(), checksum(&(1u8, 2u16)).unwrap());
//! ```

use serde::Serialize;
use std::hash::{Hash, Hasher};

use crate::network::codec::{self, CodecResult};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// A [`Hasher`] implementing 64-bit FNV-1a with the standard offset basis.
#[derive(Debug, Clone)]
pub struct DeterministicHasher {
    state: u64,
}

impl DeterministicHasher {
    /// Creates a hasher in its initial state.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: FNV_OFFSET_BASIS,
        }
    }
}

impl Default for DeterministicHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for DeterministicHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.state
    }

    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= u64::from(byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }
}

/// FNV-1a hash of a [`Hash`] value.
#[inline]
pub fn fnv1a_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DeterministicHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// FNV-1a hash of raw bytes, without the length prefix `Hash for [u8]` adds.
#[inline]
#[must_use]
pub fn fnv1a_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = DeterministicHasher::new();
    hasher.write(bytes);
    hasher.finish()
}

/// Checksum of a serializable value: FNV-1a over its codec bytes.
///
/// Works for state types that do not implement [`Hash`] (e.g. contain floats).
///
/// # Errors
/// Returns the codec error if `value` cannot be encoded.
pub fn checksum<T: Serialize>(value: &T) -> CodecResult<u64> {
    codec::encode(value).map(|bytes| fnv1a_bytes(&bytes))
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_offset_basis() {
        assert_eq!(fnv1a_bytes(&[]), FNV_OFFSET_BASIS);
    }

    #[test]
    fn known_fnv1a_vector() {
        // FNV-1a 64 of "a"
        assert_eq!(fnv1a_bytes(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn checksum_distinguishes_float_states() {
        let a = checksum(&(1.0f32, 2.0f32)).unwrap();
        let b = checksum(&(1.0f32, 2.000_001f32)).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, checksum(&(1.0f32, 2.0f32)).unwrap());
    }

    #[test]
    fn hasher_matches_helper() {
        let mut hasher = DeterministicHasher::default();
        "pawn".hash(&mut hasher);
        assert_eq!(hasher.finish(), fnv1a_hash("pawn"));
    }
}

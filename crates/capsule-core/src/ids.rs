//! Random identifier generation.
//!
//! Capsule ids, fabric nonces, and service keys are all "random bytes,
//! hex-encoded" under the hood; this module is the single place that
//! touches an RNG so every id in the platform has the same shape and
//! entropy guarantee.

use rand::RngCore;

/// Generate a random, URL-safe, lowercase-hex id with at least
/// `min_bits` of entropy (rounded up to a whole byte).
///
/// Capsule ids (`spec.md` §3) require at least 32 bits; 16 bytes (128
/// bits) is used everywhere in practice since hex-encoded ids are cheap
/// and collisions must never be relied upon as a uniqueness mechanism
/// on their own (see [`crate::error`] for how callers should react to a
/// duplicate).
pub fn random_hex_id(min_bits: u32) -> String {
    let bytes = (min_bits as usize).div_ceil(8).max(16);
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex_encode(&buf)
}

/// Generate a fresh 32-byte symmetric key, e.g. for a service's fabric
/// encryption key (`spec.md` §3, §4.5).
pub fn random_key_32() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

fn hex_encode(bytes: &[u8]) -> String {
    const CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(CHARS[(b >> 4) as usize] as char);
        out.push(CHARS[(b & 0xf) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_meet_minimum_length() {
        let id = random_hex_id(32);
        assert!(id.len() >= 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_are_not_trivially_repeated() {
        let a = random_hex_id(128);
        let b = random_hex_id(128);
        assert_ne!(a, b);
    }
}

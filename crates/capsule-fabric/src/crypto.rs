//! Per-service message encryption (`spec.md` §3, §4.5, §6).
//!
//! Node-to-node transport security is handled by QUIC/TLS
//! ([`crate::identity`]); this layer encrypts application message
//! bodies with the *destination service's* 32-byte symmetric key, so a
//! message addressed to service `A` cannot be read by a node that only
//! holds service `B`'s key even if it can see the QUIC stream.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

use crate::error::{Error, Result};

pub const NONCE_LEN: usize = 12;

/// Encrypt `plaintext` under `key`, returning `(nonce, ciphertext)` —
/// the shape of `spec.md` §6's `{dest-service, nonce, ciphertext}`
/// application message, minus the routing field.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| Error::EncryptionFailed(e.to_string()))?;
    Ok((nonce_bytes, ciphertext))
}

pub fn decrypt(key: &[u8; 32], nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| Error::EncryptionFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let key = capsule_core::ids::random_key_32();
        let (nonce, ciphertext) = encrypt(&key, b"hello service").unwrap();
        let plaintext = decrypt(&key, &nonce, &ciphertext).unwrap();
        assert_eq!(plaintext, b"hello service");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let key_a = capsule_core::ids::random_key_32();
        let key_b = capsule_core::ids::random_key_32();
        let (nonce, ciphertext) = encrypt(&key_a, b"secret").unwrap();
        assert!(decrypt(&key_b, &nonce, &ciphertext).is_err());
    }
}

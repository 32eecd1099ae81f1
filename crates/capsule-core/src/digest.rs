//! Content digests.
//!
//! A [`Digest`] is the printable canonical form of a cryptographic hash
//! identifying a blob or manifest anywhere in the platform: CAS objects,
//! image layers, build-cache fingerprints, snapshot blobs. Only SHA-256
//! is supported at the moment, but the algorithm tag is carried
//! explicitly so a second algorithm can be added without breaking the
//! printable form.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// Number of raw bytes in a SHA-256 digest.
pub const DIGEST_BYTES: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestParseError {
    #[error("digest is missing the 'algo:' prefix: {0:?}")]
    MissingAlgorithm(String),
    #[error("unsupported digest algorithm {0:?}, only 'sha256' is supported")]
    UnsupportedAlgorithm(String),
    #[error("digest hex payload has {actual} bytes, expected {DIGEST_BYTES}")]
    WrongLength { actual: usize },
    #[error("digest contains invalid hex: {0}")]
    InvalidHex(String),
}

/// A fixed-width cryptographic digest with a declared algorithm tag.
///
/// Printable as `algo:hex`, e.g.
/// `sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824`.
/// Ordered totally by byte value so digests can key sorted structures
/// (e.g. the canonical build-spec fingerprint of `capsule-build`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest {
    bytes: [u8; DIGEST_BYTES],
}

impl Digest {
    /// Hash `content` under SHA-256 and return its digest.
    pub fn of(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        let result = hasher.finalize();
        let mut bytes = [0u8; DIGEST_BYTES];
        bytes.copy_from_slice(&result);
        Self { bytes }
    }

    /// Construct a digest from already-computed raw bytes (e.g. read back
    /// from a manifest) without re-hashing anything.
    pub fn from_bytes(bytes: [u8; DIGEST_BYTES]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_BYTES] {
        &self.bytes
    }

    /// Lowercase hex of the raw bytes, with no algorithm prefix. This is
    /// the fragment used to shard the CAS object tree
    /// (`objects/<first-2-hex>/<remaining-hex>`).
    pub fn hex(&self) -> String {
        hex_encode(&self.bytes)
    }

    /// Verify that `content` hashes to this digest.
    pub fn verify(&self, content: &[u8]) -> bool {
        Self::of(content) == *self
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algo, hex) = s
            .split_once(':')
            .ok_or_else(|| DigestParseError::MissingAlgorithm(s.to_owned()))?;
        if algo != "sha256" {
            return Err(DigestParseError::UnsupportedAlgorithm(algo.to_owned()));
        }
        let bytes = hex_decode(hex).map_err(|_| DigestParseError::InvalidHex(hex.to_owned()))?;
        if bytes.len() != DIGEST_BYTES {
            return Err(DigestParseError::WrongLength {
                actual: bytes.len(),
            });
        }
        let mut fixed = [0u8; DIGEST_BYTES];
        fixed.copy_from_slice(&bytes);
        Ok(Self { bytes: fixed })
    }
}

impl serde::Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
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

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let hi = hex_val(bytes[i]).ok_or(())?;
        let lo = hex_val(bytes[i + 1]).ok_or(())?;
        out.push((hi << 4) | lo);
        i += 2;
    }
    Ok(out)
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let digest = Digest::of(b"hello");
        let printed = digest.to_string();
        assert!(printed.starts_with("sha256:"));
        let parsed: Digest = printed.parse().unwrap();
        assert_eq!(digest, parsed);
    }

    #[test]
    fn verify_detects_corruption() {
        let digest = Digest::of(b"hello");
        assert!(digest.verify(b"hello"));
        assert!(!digest.verify(b"goodbye"));
    }

    #[test]
    fn rejects_wrong_algorithm() {
        let err = "md5:abcd".parse::<Digest>().unwrap_err();
        assert_eq!(
            err,
            DigestParseError::UnsupportedAlgorithm("md5".to_owned())
        );
    }

    #[test]
    fn orders_by_byte_value() {
        let a = Digest::of(b"a");
        let b = Digest::of(b"b");
        let mut v = vec![b, a];
        v.sort();
        assert_eq!(v[0].to_string() <= v[1].to_string(), true);
    }
}

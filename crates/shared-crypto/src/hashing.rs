//! # SHA-256 Hashing and Content Addressing
//!
//! One-shot digests over canonical bytes, and the opaque content identifier
//! scheme used to address bytes in the external content store.

use crate::canonical::canonicalize;
use crate::errors::CryptoError;
use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};
use shared_types::Value;

/// A 256-bit digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Returns the digest as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex rendering of the digest.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hashes raw bytes with SHA-256.
#[must_use]
pub fn hash(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&out);
    Digest(digest)
}

/// Hashes a typed value via its canonical byte form.
///
/// This is the hash behind every cache key: equal values hash equal on
/// every node because canonicalization is deterministic.
#[must_use]
pub fn hash_value(value: &Value) -> Digest {
    hash(&canonicalize(value))
}

/// Version prefix for content identifiers. Bumped if the addressing
/// algorithm ever changes.
const CONTENT_ID_PREFIX: &str = "fm1";

/// An opaque handle by which bytes are addressed in the external store.
///
/// The current scheme is `fm1` + hex(SHA-256(bytes)). Consumers treat the
/// string as opaque; only this crate parses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId(String);

impl ContentId {
    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses and validates an identifier produced by [`content_address`].
    pub fn parse(s: &str) -> Result<Self, CryptoError> {
        let hex_part = s
            .strip_prefix(CONTENT_ID_PREFIX)
            .ok_or_else(|| CryptoError::InvalidContentId(s.to_string()))?;
        if hex_part.len() != 64 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CryptoError::InvalidContentId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes the content identifier for a byte string.
///
/// Identical bytes address identically, so duplicate writes coalesce in
/// the store.
#[must_use]
pub fn content_address(data: &[u8]) -> ContentId {
    ContentId(format!("{}{}", CONTENT_ID_PREFIX, hash(data).to_hex()))
}

//! # Cache Keys and Entries
//!
//! A key is `(layer, SHA-256(canonical input), policy version)` — input
//! bytes never live in the cache, only their digest. An entry carries the
//! verdict plus the integrity envelope: a checksum over the canonical
//! verdict and an HMAC signature binding verdict to key and policy
//! version.

use serde::{Deserialize, Serialize};
use shared_crypto::{canonicalize, hash, hash_value, Digest, SignatureBytes, Signer};
use shared_types::{PolicyVersion, Value};

/// The cache key: layer, input digest, policy version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// The validation layer this verdict belongs to.
    pub layer: String,
    /// SHA-256 over the canonical input value.
    pub input_hash: Digest,
    /// Policy version the verdict was computed under.
    pub policy_version: PolicyVersion,
}

impl CacheKey {
    /// Builds the key for a layer and input value.
    ///
    /// Canonicalization happens here, so structurally equal inputs key
    /// identically on every node.
    #[must_use]
    pub fn for_input(layer: &str, input: &Value, policy_version: PolicyVersion) -> Self {
        Self {
            layer: layer.to_string(),
            input_hash: hash_value(input),
            policy_version,
        }
    }

    /// Stable byte form of the key, bound into the entry signature.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.layer.len() + 48);
        out.extend_from_slice(&(self.layer.len() as u64).to_be_bytes());
        out.extend_from_slice(self.layer.as_bytes());
        out.extend_from_slice(self.input_hash.as_bytes());
        out.extend_from_slice(&self.policy_version.0.to_be_bytes());
        out
    }

    /// Short fingerprint for events and logs.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        format!("{}:{}", self.layer, &self.input_hash.to_hex()[..16])
    }
}

/// A layer's verdict: whether it passed, and the structured payload the
/// layer produced (details, risk score, warnings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerOutcome {
    /// Whether the layer passed.
    pub passed: bool,
    /// Layer-specific result payload.
    pub payload: Value,
}

impl LayerOutcome {
    /// A passing verdict with a payload.
    #[must_use]
    pub fn pass(payload: Value) -> Self {
        Self {
            passed: true,
            payload,
        }
    }

    /// A failing verdict with a payload.
    #[must_use]
    pub fn fail(payload: Value) -> Self {
        Self {
            passed: false,
            payload,
        }
    }

    /// Canonical value form, the basis of checksum and signature.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::from([
            ("passed", Value::Bool(self.passed)),
            ("payload", self.payload.clone()),
        ])
    }
}

/// One stored entry: verdict plus integrity envelope and usage counters.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached verdict.
    pub outcome: LayerOutcome,
    /// Time-to-live in milliseconds.
    pub ttl_ms: u64,
    /// Creation time, epoch milliseconds.
    pub created_at_ms: u64,
    /// Last access time, epoch milliseconds. Updated on every hit.
    pub last_accessed_ms: u64,
    /// Number of hits.
    pub access_count: u64,
    /// SHA-256 over the canonical verdict.
    pub checksum: Digest,
    /// Signature over `key bytes || canonical verdict || policy version`.
    pub signature: SignatureBytes,
}

impl CacheEntry {
    /// Builds a signed entry for a key and verdict.
    #[must_use]
    pub fn seal(
        key: &CacheKey,
        outcome: LayerOutcome,
        ttl_ms: u64,
        now_ms: u64,
        signer: &dyn Signer,
    ) -> Self {
        let canonical = canonicalize(&outcome.to_value());
        let checksum = hash(&canonical);
        let signature = signer.sign(&signing_input(key, &canonical));
        Self {
            outcome,
            ttl_ms,
            created_at_ms: now_ms,
            last_accessed_ms: now_ms,
            access_count: 0,
            checksum,
            signature,
        }
    }

    /// Whether the entry is still within its TTL.
    #[must_use]
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        now_ms < self.created_at_ms.saturating_add(self.ttl_ms)
    }

    /// Milliseconds until expiry (zero when already expired).
    #[must_use]
    pub fn remaining_ttl_ms(&self, now_ms: u64) -> u64 {
        (self.created_at_ms + self.ttl_ms).saturating_sub(now_ms)
    }

    /// Re-derives checksum and verifies the signature. Both must hold or
    /// the entry is discarded by the store.
    #[must_use]
    pub fn verify(&self, key: &CacheKey, signer: &dyn Signer) -> bool {
        let canonical = canonicalize(&self.outcome.to_value());
        if hash(&canonical) != self.checksum {
            return false;
        }
        signer.verify(&signing_input(key, &canonical), &self.signature)
    }
}

fn signing_input(key: &CacheKey, canonical_outcome: &[u8]) -> Vec<u8> {
    let mut input = key.to_bytes();
    input.extend_from_slice(canonical_outcome);
    input.extend_from_slice(&key.policy_version.0.to_be_bytes());
    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::HmacSigner;

    fn signer() -> HmacSigner {
        HmacSigner::new(b"cache-secret".to_vec(), "cache-test")
    }

    fn key() -> CacheKey {
        CacheKey::for_input("consent", &Value::from([("a", Value::Int(1))]), PolicyVersion(1))
    }

    #[test]
    fn test_equal_inputs_key_equal() {
        let v1 = Value::from([("x", Value::Int(1)), ("y", Value::Int(2))]);
        let v2 = Value::from([("y", Value::Int(2)), ("x", Value::Int(1))]);
        assert_eq!(
            CacheKey::for_input("l", &v1, PolicyVersion(3)),
            CacheKey::for_input("l", &v2, PolicyVersion(3))
        );
    }

    #[test]
    fn test_policy_version_distinguishes_keys() {
        let v = Value::Int(1);
        assert_ne!(
            CacheKey::for_input("l", &v, PolicyVersion(1)),
            CacheKey::for_input("l", &v, PolicyVersion(2))
        );
    }

    #[test]
    fn test_seal_and_verify() {
        let s = signer();
        let entry = CacheEntry::seal(&key(), LayerOutcome::pass(Value::Null), 1000, 50, &s);
        assert!(entry.verify(&key(), &s));
    }

    #[test]
    fn test_tampered_outcome_fails_verify() {
        let s = signer();
        let mut entry = CacheEntry::seal(&key(), LayerOutcome::pass(Value::Null), 1000, 50, &s);
        entry.outcome.passed = false;
        assert!(!entry.verify(&key(), &s));
    }

    #[test]
    fn test_wrong_key_fails_verify() {
        let s = signer();
        let entry = CacheEntry::seal(&key(), LayerOutcome::pass(Value::Null), 1000, 50, &s);
        let other = CacheKey::for_input("other-layer", &Value::Int(1), PolicyVersion(1));
        assert!(!entry.verify(&other, &s));
    }

    #[test]
    fn test_freshness_window() {
        let s = signer();
        let entry = CacheEntry::seal(&key(), LayerOutcome::pass(Value::Null), 1000, 500, &s);
        assert!(entry.is_fresh(500));
        assert!(entry.is_fresh(1499));
        assert!(!entry.is_fresh(1500));
        assert_eq!(entry.remaining_ttl_ms(1400), 100);
        assert_eq!(entry.remaining_ttl_ms(2000), 0);
    }
}

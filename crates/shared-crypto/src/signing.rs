//! # Signing Primitives
//!
//! The [`Signer`] trait is the single seam every component signs and
//! verifies through. HMAC-SHA256 is the default (node-local keys for cache
//! entries and checkpoints); Ed25519 is available where an asymmetric key
//! is required (owner and node identity keys).
//!
//! ## Security Properties
//!
//! - Verification is constant-time (`Mac::verify_slice`, dalek `verify`)
//! - Key material is zeroized on drop
//! - Key management is a deployment concern: signers are constructed from
//!   config-supplied key material at runtime init and never reloaded

use crate::errors::CryptoError;
use ed25519_dalek::{Signer as DalekSigner, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Signature bytes, opaque to callers. Length depends on the algorithm
/// (32 for HMAC-SHA256, 64 for Ed25519).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBytes(pub Vec<u8>);

impl SignatureBytes {
    /// Returns the raw signature bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// The signing seam. All components hold an `Arc<dyn Signer>` and never
/// touch key material or algorithm names directly.
pub trait Signer: Send + Sync {
    /// Signs a message.
    fn sign(&self, message: &[u8]) -> SignatureBytes;

    /// Verifies a signature over a message. Must be constant-time in the
    /// signature comparison.
    fn verify(&self, message: &[u8], signature: &SignatureBytes) -> bool;

    /// Identifies the key this signer uses, for logs and rotation audits.
    fn key_id(&self) -> &str;

    /// Algorithm tag recorded alongside signatures.
    fn algorithm(&self) -> &'static str;
}

// =============================================================================
// HMAC-SHA256 (default)
// =============================================================================

/// HMAC-SHA256 signer. The default for cache entries and checkpoints,
/// where signer and verifier share a node-local secret.
pub struct HmacSigner {
    key: Vec<u8>,
    key_id: String,
}

impl HmacSigner {
    /// Creates a signer from raw key material.
    pub fn new(key: impl Into<Vec<u8>>, key_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            key_id: key_id.into(),
        }
    }
}

impl Signer for HmacSigner {
    fn sign(&self, message: &[u8]) -> SignatureBytes {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(message);
        SignatureBytes(mac.finalize().into_bytes().to_vec())
    }

    fn verify(&self, message: &[u8], signature: &SignatureBytes) -> bool {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            return false;
        };
        mac.update(message);
        // Constant-time comparison
        mac.verify_slice(signature.as_bytes()).is_ok()
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn algorithm(&self) -> &'static str {
        "hmac-sha256"
    }
}

impl Drop for HmacSigner {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

// =============================================================================
// Ed25519
// =============================================================================

/// Ed25519 signer for asymmetric keys (owner identity, node identity).
/// Deterministic nonces, no RNG dependency at signing time.
pub struct Ed25519Signer {
    signing_key: SigningKey,
    key_id: String,
}

impl Ed25519Signer {
    /// Generates a fresh random keypair.
    #[must_use]
    pub fn generate(key_id: impl Into<String>) -> Self {
        Self {
            signing_key: SigningKey::generate(&mut rand::thread_rng()),
            key_id: key_id.into(),
        }
    }

    /// Restores a signer from a 32-byte seed.
    #[must_use]
    pub fn from_seed(seed: [u8; 32], key_id: impl Into<String>) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
            key_id: key_id.into(),
        }
    }

    /// The 32-byte public verification key.
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Verifies a signature against a bare public key, for peers that
    /// hold no signing half.
    pub fn verify_with_public_key(
        public_key: &[u8; 32],
        message: &[u8],
        signature: &SignatureBytes,
    ) -> Result<(), CryptoError> {
        let verifying_key =
            VerifyingKey::from_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig_bytes: [u8; 64] = signature
            .as_bytes()
            .try_into()
            .map_err(|_| CryptoError::InvalidSignatureFormat)?;
        let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes(self.signing_key.sign(message).to_bytes().to_vec())
    }

    fn verify(&self, message: &[u8], signature: &SignatureBytes) -> bool {
        Self::verify_with_public_key(&self.public_key(), message, signature).is_ok()
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn algorithm(&self) -> &'static str {
        "ed25519"
    }
}

impl Drop for Ed25519Signer {
    fn drop(&mut self) {
        let mut bytes = self.signing_key.to_bytes();
        bytes.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_sign_verify() {
        let signer = HmacSigner::new(b"secret".to_vec(), "cache-key-1");
        let sig = signer.sign(b"message");
        assert!(signer.verify(b"message", &sig));
        assert!(!signer.verify(b"Message", &sig));
    }

    #[test]
    fn test_hmac_wrong_key_fails() {
        let a = HmacSigner::new(b"key-a".to_vec(), "a");
        let b = HmacSigner::new(b"key-b".to_vec(), "b");
        let sig = a.sign(b"message");
        assert!(!b.verify(b"message", &sig));
    }

    #[test]
    fn test_ed25519_sign_verify() {
        let signer = Ed25519Signer::generate("owner-1");
        let sig = signer.sign(b"checkpoint bytes");
        assert!(signer.verify(b"checkpoint bytes", &sig));
        assert!(!signer.verify(b"other bytes", &sig));
    }

    #[test]
    fn test_ed25519_public_verify() {
        let signer = Ed25519Signer::from_seed([7u8; 32], "seeded");
        let sig = signer.sign(b"msg");
        assert!(
            Ed25519Signer::verify_with_public_key(&signer.public_key(), b"msg", &sig).is_ok()
        );
        assert!(
            Ed25519Signer::verify_with_public_key(&signer.public_key(), b"tampered", &sig)
                .is_err()
        );
    }

    #[test]
    fn test_ed25519_deterministic() {
        let signer = Ed25519Signer::from_seed([1u8; 32], "seeded");
        assert_eq!(signer.sign(b"m"), signer.sign(b"m"));
    }

    #[test]
    fn test_algorithm_tags() {
        assert_eq!(
            HmacSigner::new(b"k".to_vec(), "k1").algorithm(),
            "hmac-sha256"
        );
        assert_eq!(Ed25519Signer::generate("k2").algorithm(), "ed25519");
    }

    #[test]
    fn test_malformed_signature_rejected() {
        let signer = Ed25519Signer::generate("k");
        let short = SignatureBytes(vec![0u8; 12]);
        assert!(!signer.verify(b"msg", &short));
    }
}

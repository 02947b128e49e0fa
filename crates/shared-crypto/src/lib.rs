//! # Shared Crypto - Content Addressing and Signing Primitives
//!
//! Every signature, hash, and content identifier in the system is produced
//! by this crate. Centralizing them means an algorithm upgrade touches one
//! place, and every node computes identical cache keys from identical
//! values.
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `canonical` | tagged binary encoding | Stable bytes for hashing/signing |
//! | `hashing` | SHA-256 | Digests, cache keys, content ids |
//! | `signing` | HMAC-SHA256 (default), Ed25519 | Cache entries, checkpoints |
//!
//! ## Invariants
//!
//! | ID | Invariant | Enforcement Location |
//! |----|-----------|---------------------|
//! | INVARIANT-1 | Structurally equal values canonicalize to equal bytes | `canonical.rs` - sorted map keys, normalized floats |
//! | INVARIANT-2 | Verification is constant-time | `signing.rs` - `Mac::verify_slice` / dalek verify |
//! | INVARIANT-3 | Content ids round-trip through the store | `hashing.rs` - `ContentId::parse` |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonical;
pub mod errors;
pub mod hashing;
pub mod signing;

// Re-exports
pub use canonical::canonicalize;
pub use errors::CryptoError;
pub use hashing::{content_address, hash, hash_value, ContentId, Digest};
pub use signing::{Ed25519Signer, HmacSigner, SignatureBytes, Signer};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

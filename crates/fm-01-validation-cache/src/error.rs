//! Cache error types.
//!
//! These stay internal: the cache fails open, so callers observe a miss
//! rather than an error. The enum exists for logging and tests.

use thiserror::Error;

/// Internal cache faults.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The store lock was poisoned by a panicking writer.
    #[error("Cache store lock poisoned")]
    LockPoisoned,

    /// A stored entry failed checksum or signature verification.
    #[error("Entry integrity failure for {key}: {reason}")]
    IntegrityFailure {
        /// Fingerprint of the offending key.
        key: String,
        /// What failed: checksum or signature.
        reason: String,
    },

    /// A layer producer exceeded its timeout during streaming validation.
    #[error("Producer for layer {layer} timed out after {timeout_ms}ms")]
    ProducerTimeout {
        /// The layer whose producer timed out.
        layer: String,
        /// The configured per-layer timeout.
        timeout_ms: u64,
    },
}

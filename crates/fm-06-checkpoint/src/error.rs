//! Checkpoint error types.

use shared_crypto::ContentId;
use thiserror::Error;

/// Checkpoint subsystem errors.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The content store rejected or lost a write.
    #[error("Content store unavailable: {0}")]
    StoreUnavailable(String),

    /// Stored bytes failed to decode into a checkpoint.
    #[error("Checkpoint {content_id} is undecodable")]
    Undecodable {
        /// The offending content id.
        content_id: ContentId,
    },

    /// No checkpoint for this execution verified.
    #[error("No verifying checkpoint within fallback depth")]
    NoVerifyingCheckpoint,
}

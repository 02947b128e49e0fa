//! # Content Store Port
//!
//! The external content-addressed store the core writes checkpoints to.
//! Opaque key/value by content id; the core assumes eventual
//! availability and retries reads with exponential backoff.

use async_trait::async_trait;
use shared_crypto::{content_address, ContentId};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

/// Content store faults.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContentStoreError {
    /// The store is temporarily unreachable; retry later.
    #[error("Content store unavailable: {0}")]
    Unavailable(String),
}

/// Opaque content-addressed byte storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Stores bytes, returning their content id. Idempotent: identical
    /// bytes yield the identical id.
    async fn put(&self, bytes: &[u8]) -> Result<ContentId, ContentStoreError>;

    /// Reads bytes back, `None` when the id is unknown.
    async fn get(&self, content_id: &ContentId) -> Result<Option<Vec<u8>>, ContentStoreError>;
}

/// In-process store for single-node deployments and tests.
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    blobs: RwLock<HashMap<ContentId, Vec<u8>>>,
}

impl InMemoryContentStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn put(&self, bytes: &[u8]) -> Result<ContentId, ContentStoreError> {
        let content_id = content_address(bytes);
        if let Ok(mut blobs) = self.blobs.write() {
            blobs.insert(content_id.clone(), bytes.to_vec());
        }
        Ok(content_id)
    }

    async fn get(&self, content_id: &ContentId) -> Result<Option<Vec<u8>>, ContentStoreError> {
        Ok(self
            .blobs
            .read()
            .ok()
            .and_then(|blobs| blobs.get(content_id).cloned()))
    }
}

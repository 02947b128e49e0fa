//! # Outbound Ports
//!
//! Traits for the sibling services the layers consult. The pipeline owns
//! no policy data itself; these seams keep it testable and let the
//! runtime wire real adapters in.

use async_trait::async_trait;
use shared_types::{Identity, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Errors a port implementation may surface. Layers treat these as
/// internal failures and fail closed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortError {
    /// The backing service was unreachable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The backing service rejected the call.
    #[error("Service rejected call: {0}")]
    Rejected(String),
}

/// Supplies the shared secret a caller signs requests with.
pub trait CallerKeyProvider: Send + Sync {
    /// Returns the caller's shared secret, or `None` for unknown callers
    /// (which rejects the request).
    fn caller_secret(&self, identity: &Identity) -> Option<Vec<u8>>;
}

/// A fixed identity→secret table. Production deployments back this with
/// the identity service; tests and single-tenant nodes use it directly.
#[derive(Debug, Default)]
pub struct StaticKeyProvider {
    secrets: HashMap<Identity, Vec<u8>>,
}

impl StaticKeyProvider {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a caller secret.
    #[must_use]
    pub fn with_secret(mut self, identity: impl Into<Identity>, secret: impl Into<Vec<u8>>) -> Self {
        self.secrets.insert(identity.into(), secret.into());
        self
    }
}

impl CallerKeyProvider for StaticKeyProvider {
    fn caller_secret(&self, identity: &Identity) -> Option<Vec<u8>> {
        self.secrets.get(identity).cloned()
    }
}

/// Consent lookups: does `identity` hold `permission` on `resource`?
/// Absent token means no; the layer default-denies.
#[async_trait]
pub trait ConsentStore: Send + Sync {
    /// Checks a consent token.
    async fn has_consent(
        &self,
        identity: &Identity,
        resource: &str,
        permission: &str,
    ) -> Result<bool, PortError>;
}

/// Metadata indexing sink. Failures here are warnings, not rejections.
#[async_trait]
pub trait MetadataIndex: Send + Sync {
    /// Records payload metadata for later search.
    async fn index(&self, resource: &str, metadata: &Value) -> Result<(), PortError>;
}

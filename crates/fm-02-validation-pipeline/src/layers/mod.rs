//! # Validation Layers
//!
//! The reference layer set, in priority order: signature, consent,
//! metadata, security. Each is independently constructed and wired by the
//! runtime; the pipeline only knows layer ids.

mod consent;
mod metadata;
mod security;
mod signature;

pub use consent::ConsentLayer;
pub use metadata::{DocumentSchema, FieldConstraint, MetadataLayer, SchemaKind};
pub use security::{SecurityLayer, SecurityLayerConfig};
pub use signature::SignatureLayer;

use crate::report::LayerReport;
use crate::request::ValidationRequest;
use async_trait::async_trait;

/// One validation layer. Implementations fail **closed**: internal errors
/// produce a failing report, never a silent pass.
#[async_trait]
pub trait ValidationLayer: Send + Sync {
    /// Stable layer id, referenced by pipeline configuration and cache
    /// keys.
    fn id(&self) -> &str;

    /// Validates one request.
    async fn validate(&self, request: &ValidationRequest) -> LayerReport;
}

//! # Validation Pipeline Subsystem
//!
//! The ordered composition of validation layers every externally triggered
//! operation traverses before it reaches the execution engine:
//!
//! ```text
//! request ──▶ [signature] ──▶ [consent] ──▶ [metadata] ──▶ [security] ──▶ verdict
//!                 │               │              │              │
//!                 └───────────────┴──── signed cache ───────────┘
//! ```
//!
//! Each layer has exogenous cost (a network hop to a sibling service), so
//! verdicts are cached per layer and the walk short-circuits on the first
//! failure. Because different operations exercise different subsets, the
//! layer list is a first-class configuration input, not hard-wired.
//!
//! ## Failure semantics
//!
//! Layers fail **closed**: a layer's internal error blocks the request.
//! The cache in front of them fails **open**: a cache fault falls through
//! to the authoritative layer.
//!
//! ## Module Structure
//!
//! ```text
//! pipeline.rs    - ValidationPipeline: ordering, caching, events
//! report.rs      - LayerReport / PipelineVerdict wire shapes
//! request.rs     - ValidationRequest (canonical cache-key input)
//! ports.rs       - ConsentStore, CallerKeyProvider, MetadataIndex seams
//! layers/        - the four reference layers
//! ```

pub mod config;
pub mod layers;
pub mod pipeline;
pub mod ports;
pub mod report;
pub mod request;

pub use config::PipelineConfig;
pub use layers::{
    ConsentLayer, DocumentSchema, FieldConstraint, MetadataLayer, SchemaKind, SecurityLayer,
    SecurityLayerConfig, SignatureLayer, ValidationLayer,
};
pub use pipeline::ValidationPipeline;
pub use ports::{CallerKeyProvider, ConsentStore, MetadataIndex, StaticKeyProvider};
pub use report::{LayerReport, LayerStatus, PipelineVerdict, RiskLevel};
pub use request::ValidationRequest;

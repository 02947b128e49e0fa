//! # Node Runtime Library
//!
//! Bootstraps a FlowMesh node: loads one configuration document, builds
//! every subsystem with an explicit lifecycle (`init` → handle →
//! `shutdown`), and wires observation streams between components. No
//! component reaches into another's state; everything flows through the
//! handles this crate owns.

pub mod config;
pub mod deprecation;
pub mod runtime;

pub use config::RuntimeConfig;
pub use deprecation::{DeprecationNotice, DeprecationRegistry};
pub use runtime::{
    local_collaborators, Collaborators, FlowMeshRuntime, LoopbackExecutor, OpenConsentStore,
};

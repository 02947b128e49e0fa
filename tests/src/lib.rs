//! # FlowMesh Test Suite
//!
//! Cross-subsystem integration scenarios: full trigger-to-completion
//! choreography through admission, validation, scheduling, and
//! checkpointing. Per-subsystem unit tests live with their crates; this
//! crate only exercises the seams between them.

pub mod integration;

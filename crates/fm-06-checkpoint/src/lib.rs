//! # Checkpoint & Recovery Subsystem
//!
//! After each step transition the scheduler writes a signed checkpoint to
//! the external content-addressed store and appends its content id to the
//! execution's ordered list. Recovery reads the newest checkpoint whose
//! signature verifies and resumes from the first unfinished step.
//!
//! ## Domain Invariants
//!
//! | ID | Invariant | Enforcement Location |
//! |----|-----------|---------------------|
//! | INVARIANT-1 | Checkpoints are totally ordered per execution | `store.rs` - monotonic sequence |
//! | INVARIANT-2 | A checkpoint is used only if its signature verifies | `store.rs` - `latest_verified()` |
//! | INVARIANT-3 | Duplicate snapshots coalesce by content id | `store.rs` - `append()` |
//!
//! A failed signature during recovery emits `checkpoint.integrity.failed`
//! and falls back to the previous verifying checkpoint (bounded by
//! `fallback_depth`; strict mode refuses fallback entirely).

pub mod config;
pub mod content_store;
pub mod error;
pub mod model;
pub mod store;

pub use config::RecoveryConfig;
pub use content_store::{ContentStore, InMemoryContentStore};
pub use error::CheckpointError;
pub use model::{Checkpoint, ExecutionSnapshot};
pub use store::CheckpointStore;

//! # Flow Model Subsystem
//!
//! The typed representation of flows — versioned, immutable DAGs of steps
//! — plus the parser from the self-identifying document format and the
//! structural validator.
//!
//! ## Domain Invariants
//!
//! | ID | Invariant | Enforcement Location |
//! |----|-----------|---------------------|
//! | INVARIANT-1 | Step ids are unique within a flow | `validate.rs` - duplicate scan |
//! | INVARIANT-2 | Every transition target exists | `validate.rs` - target scan |
//! | INVARIANT-3 | The step graph is acyclic | `validate.rs` - three-color DFS |
//! | INVARIANT-4 | A flow has at least one step | `validate.rs` |
//! | INVARIANT-5 | `parse(serialize(f)) == f` for valid flows | `parse.rs` round trip |
//!
//! Flows are immutable values: an update produces a new flow. The step
//! graph is stored as a node list plus id-typed edges — traversal is by
//! identifier lookup, never interior pointers, so ownership cycles cannot
//! arise.

pub mod model;
pub mod parse;
pub mod predicate;
pub mod validate;
pub mod version;

pub use model::{
    BackoffKind, Flow, FlowMetadata, ResourceLimits, RetryPolicy, Step, StepKind, Visibility,
    MAX_STEP_TIMEOUT_MS, MIN_STEP_TIMEOUT_MS,
};
pub use parse::{parse_flow, serialize_flow, ParseIssue, ParseOutcome, FLOW_FORMAT};
pub use predicate::{CompareOp, Predicate};
pub use validate::validate_flow;
pub use version::Version;

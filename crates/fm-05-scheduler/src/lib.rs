//! # Execution Scheduler Subsystem
//!
//! The heart of the engine: one state machine per execution, step
//! dispatch across the worker pool, and the control-flow semantics of
//! flows (sequential, conditional, parallel, event-triggered).
//!
//! ## Execution state machine
//!
//! ```text
//! pending ──start──▶ running ──complete──▶ completed
//! running ──pause──▶ paused ──resume──▶ running
//! running ──fail (non-retryable)──▶ failed
//! running ──abort──▶ aborted
//! paused ──abort──▶ aborted
//! ```
//!
//! `completed`, `failed`, and `aborted` are terminal and monotonic.
//!
//! ## Domain Invariants
//!
//! | ID | Invariant | Enforcement Location |
//! |----|-----------|---------------------|
//! | INVARIANT-1 | Guarded transitions; terminal is forever | `state.rs` - `transition()` |
//! | INVARIANT-2 | `completed ∩ failed = ∅` | `state.rs` - `record_*` |
//! | INVARIANT-3 | A step completes at most once | `runner.rs` - completed-set guard before checkpoint |
//! | INVARIANT-4 | Late/duplicate worker replies are discarded | `runner.rs` - dispatch future dropped on timeout/abort |
//! | INVARIANT-5 | Per-execution step effects apply in completion order | `runner.rs` - single owner loop per execution |
//!
//! ## Backpressure
//!
//! Per-tenant in-flight ceilings; excess executions queue in a bounded
//! weighted-fair queue (FIFO per tenant, tier-weighted across tenants).
//! Overflow rejects with a stable code.

pub mod config;
pub mod engine;
pub mod error;
pub mod ports;
pub mod queue;
pub mod runner;
pub mod state;

pub use config::SchedulerConfig;
pub use engine::Scheduler;
pub use error::SchedulerError;
pub use ports::{DispatchError, StepExecutor, StepInvocation, StepOutcome};
pub use queue::WeightedFairQueue;
pub use state::{ExecutionState, ExecutionStatus};

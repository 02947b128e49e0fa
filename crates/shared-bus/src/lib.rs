//! # Shared Bus - The Event Log
//!
//! A single-writer-per-event bus with versioned event schemas. Every
//! observable fact in the system — cache hits, admission decisions, breaker
//! transitions, execution progress — is an [`EventRecord`] emitted here.
//!
//! ## Rules
//!
//! - All inter-subsystem observation happens via the bus; components never
//!   reach into each other's state.
//! - Every event type is registered with a payload schema (`domain.action`
//!   plus a version). Unknown types are rejected at `emit`.
//! - Delivery to subscribers is at-least-once; handlers must be idempotent.
//!
//! ## Failure policy
//!
//! Schema validation failure is a programmer error: it panics through
//! `debug_assert` in development builds and is counted and logged in
//! release builds. Either way the event is not delivered.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
pub mod record;
pub mod schema;
pub mod subscriber;

// Re-export main types
pub use bus::EventBus;
pub use record::EventRecord;
pub use schema::{core_schemas, FieldType, PayloadSchema, SchemaRegistry};
pub use subscriber::{EventStream, Subscription, SubscriptionError};

/// Maximum events to buffer per subscriber before lagging subscribers
/// start skipping.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

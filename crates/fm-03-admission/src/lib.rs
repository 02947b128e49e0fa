//! # Admission Subsystem
//!
//! The gatekeeper in front of the execution engine. Every triggered
//! operation passes here before it touches the validation pipeline or
//! the scheduler:
//!
//! ```text
//! trigger ──▶ [circuit breaker] ──▶ [rate limiter] ──▶ [cost/quota] ──▶ admitted
//!                   │                     │                  │
//!                   └── CIRCUIT_BREAKER_OPEN                 └── COST_LIMIT_EXCEEDED
//!                                         └── RATE_LIMIT_EXCEEDED
//! ```
//!
//! ## Domain Invariants
//!
//! | ID | Invariant | Enforcement Location |
//! |----|-----------|---------------------|
//! | INVARIANT-1 | Window counters never decrease mid-window | `rate_limit.rs` - `check()` |
//! | INVARIANT-2 | Window expiry resets the counter atomically to 1 | `rate_limit.rs` - fresh-window branch |
//! | INVARIANT-3 | Violations decay by exactly one per fresh window | `rate_limit.rs` - fresh-window branch |
//! | INVARIANT-4 | Breaker transitions follow closed→open→half-open→closed | `breaker.rs` - `record_*()` |
//!
//! ## Failure policy
//!
//! Admission fails **open**: an internal fault (poisoned lock) admits the
//! request and logs the incident. Rejections are cheap and side-effect
//! free beyond the admission event itself.

pub mod breaker;
pub mod config;
pub mod controller;
pub mod cost;
pub mod rate_limit;

pub use breaker::{BreakerState, BreakerTransition, CircuitBreaker};
pub use config::{AdmissionConfig, BreakerConfig, TierLimits};
pub use controller::{AdmissionController, AdmissionDecision, AdmissionRequest};
pub use cost::{CostDecision, CostTracker, UsageCharge};
pub use rate_limit::{AdmissionKey, RateDecision, RateLimiter};

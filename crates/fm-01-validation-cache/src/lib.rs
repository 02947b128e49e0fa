//! # Validation Cache Subsystem
//!
//! A signed, TTL'd cache in front of the validation pipeline. Every
//! externally triggered operation traverses the same validation layers;
//! each layer's verdict has exogenous cost (a network hop to a sibling
//! service), so verdicts are cached per
//! `(layer, SHA-256(canonical input), policy version)`.
//!
//! ## Domain Invariants
//!
//! | ID | Invariant | Enforcement Location |
//! |----|-----------|---------------------|
//! | INVARIANT-1 | A hit is fresh: `now < created_at + ttl` | `store.rs` - `get()` |
//! | INVARIANT-2 | A hit verifies: checksum and signature match | `store.rs` - `verify_entry()` |
//! | INVARIANT-3 | Policy bump invalidates every entry under the old version | `store.rs` - `invalidate()` |
//! | INVARIANT-4 | Cache faults never fail the request | all public APIs fall through on error |
//!
//! ## Eviction
//!
//! Configurable among LRU, LFU, TTL-soonest, and hybrid. The hybrid score
//! is `alpha * recency + beta * frequency + gamma * (1 / remaining_ttl)`;
//! the entry with the lowest score is evicted when the cache is full.
//!
//! ## Streaming validation
//!
//! [`ValidationCache::stream`] walks an ordered layer list, consulting the
//! cache per layer and invoking the supplied producer on miss, storing the
//! signed verdict, and short-circuiting on the first failure by default.

pub mod config;
pub mod entry;
pub mod error;
pub mod store;
pub mod stream;

pub use config::{CacheConfig, EvictionPolicy};
pub use entry::{CacheKey, LayerOutcome};
pub use error::CacheError;
pub use store::{CacheStatsSnapshot, ValidationCache};
pub use stream::{LayerRun, StreamOptions, StreamOutcome};

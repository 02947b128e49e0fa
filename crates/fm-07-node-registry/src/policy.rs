//! # Tenant Policy
//!
//! Per-tenant execution policy: resource ceilings, scheduling weights,
//! and the validator set that governs proposals. Versioned so the
//! scheduler can snapshot a policy at execution start.

use serde::{Deserialize, Serialize};
use shared_types::{NodeId, Tier};
use std::collections::BTreeSet;

/// Policy governing one tenant's executions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantPolicy {
    /// Ceiling applied to every step timeout.
    pub max_step_timeout_ms: u64,
    /// In-flight step ceiling for backpressure.
    pub max_in_flight: usize,
    /// Subscription tier (quota limits, fair-share weight).
    pub tier: Tier,
    /// Nodes allowed to vote on this tenant's proposals.
    pub validators: BTreeSet<NodeId>,
    /// Bumped on every update; executions snapshot the version they
    /// started under.
    pub version: u64,
}

impl Default for TenantPolicy {
    fn default() -> Self {
        Self {
            max_step_timeout_ms: 5 * 60 * 1000,
            max_in_flight: 32,
            tier: Tier::Free,
            validators: BTreeSet::new(),
            version: 0,
        }
    }
}

impl TenantPolicy {
    /// The votes needed for a proposal to pass: a strict majority of the
    /// validator set.
    #[must_use]
    pub fn quorum(&self) -> usize {
        self.validators.len() / 2 + 1
    }
}

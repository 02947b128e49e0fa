//! Configuration types for admission control.

use serde::Deserialize;
use shared_types::Tier;

/// Runtime configuration for the admission controller.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Sliding window length.
    pub window_ms: u64,

    /// Requests per window keyed by tenant.
    pub per_tenant_limit: u32,

    /// Requests per window keyed by tenant + sub-identity.
    pub per_sub_identity_limit: u32,

    /// Requests per window aggregated over a tenant subnet.
    pub per_subnet_limit: u32,

    /// Fraction of the tenant limit granted to anonymous sources.
    pub anonymous_fraction: f64,

    /// Scale limits by per-tenant reputation.
    pub adaptive_limits: bool,

    /// Compute `retry-after` as `window * 2^min(violations, 10)`.
    pub exponential_backoff: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            per_tenant_limit: 100,
            per_sub_identity_limit: 50,
            per_subnet_limit: 200,
            anonymous_fraction: 0.5,
            adaptive_limits: true,
            exponential_backoff: true,
        }
    }
}

impl AdmissionConfig {
    /// The anonymous limit derived from the tenant limit.
    #[must_use]
    pub fn anonymous_limit(&self) -> u32 {
        ((self.per_tenant_limit as f64) * self.anonymous_fraction).floor() as u32
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive server-class failures before the circuit opens.
    pub failure_threshold: u32,

    /// How long an open circuit rejects before probing.
    pub cool_off_ms: u64,

    /// Probe requests (and required successes) in half-open.
    pub half_open_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_off_ms: 30_000,
            half_open_probes: 3,
        }
    }
}

/// Monthly quota limits for one tier.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TierLimits {
    /// Flow invocations per period.
    pub invocations: u64,
    /// Step compute time per period, milliseconds.
    pub compute_ms: u64,
    /// Stored bytes.
    pub storage_bytes: u64,
    /// Outbound network calls per period.
    pub network_calls: u64,
}

impl TierLimits {
    /// The quota table. Tiers trade money for headroom.
    #[must_use]
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Free => Self {
                invocations: 1_000,
                compute_ms: 60 * 60 * 1000,
                storage_bytes: 100 * 1024 * 1024,
                network_calls: 5_000,
            },
            Tier::Basic => Self {
                invocations: 20_000,
                compute_ms: 24 * 60 * 60 * 1000,
                storage_bytes: 2 * 1024 * 1024 * 1024,
                network_calls: 100_000,
            },
            Tier::Premium => Self {
                invocations: 200_000,
                compute_ms: 7 * 24 * 60 * 60 * 1000,
                storage_bytes: 20 * 1024 * 1024 * 1024,
                network_calls: 1_000_000,
            },
            Tier::Enterprise => Self {
                invocations: 5_000_000,
                compute_ms: 30 * 24 * 60 * 60 * 1000,
                storage_bytes: 500 * 1024 * 1024 * 1024,
                network_calls: 50_000_000,
            },
        }
    }
}

/// Fraction of a hard limit at which the soft alert fires.
pub const SOFT_THRESHOLD: f64 = 0.8;

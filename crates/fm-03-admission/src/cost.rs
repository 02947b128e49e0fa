//! # Cost and Quota Tracking
//!
//! Per-tenant usage counters with a tier-derived limit table. Counters
//! roll over every billing period (30 days). Crossing the soft threshold
//! raises an alert; crossing a hard limit rejects with
//! `COST_LIMIT_EXCEEDED`.

use crate::config::{TierLimits, SOFT_THRESHOLD};
use shared_types::{Clock, TenantId, Tier};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Billing period length. Usage counters reset when the period index
/// advances.
pub const PERIOD_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// A usage charge applied after work completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageCharge {
    /// Step compute time consumed, milliseconds.
    pub compute_ms: u64,
    /// Bytes written to storage.
    pub storage_bytes: u64,
    /// Outbound network calls made.
    pub network_calls: u64,
}

/// Current usage within the period.
#[derive(Debug, Clone, Copy, Default)]
struct TenantUsage {
    period_index: u64,
    invocations: u64,
    compute_ms: u64,
    storage_bytes: u64,
    network_calls: u64,
}

impl TenantUsage {
    fn roll_if_stale(&mut self, period_index: u64) {
        if self.period_index != period_index {
            *self = TenantUsage {
                period_index,
                ..TenantUsage::default()
            };
        }
    }
}

/// The answer to "may this tenant invoke another flow?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CostDecision {
    /// Within limits.
    Within,
    /// Over a soft threshold; proceed but alert. Carries `(metric, used,
    /// limit)` for the alert payload.
    SoftExceeded(&'static str, u64, u64),
    /// Over a hard limit; reject. Carries `(metric, used, limit)`.
    HardExceeded(&'static str, u64, u64),
}

/// Per-tenant cost tracker.
pub struct CostTracker {
    usage: RwLock<HashMap<TenantId, TenantUsage>>,
    tiers: RwLock<HashMap<TenantId, Tier>>,
    clock: Arc<dyn Clock>,
}

impl CostTracker {
    /// Creates a tracker.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            usage: RwLock::new(HashMap::new()),
            tiers: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Sets a tenant's tier. Unset tenants are `Free`.
    pub fn set_tier(&self, tenant: &TenantId, tier: Tier) {
        if let Ok(mut tiers) = self.tiers.write() {
            tiers.insert(tenant.clone(), tier);
        }
    }

    /// A tenant's tier.
    #[must_use]
    pub fn tier(&self, tenant: &TenantId) -> Tier {
        self.tiers
            .read()
            .ok()
            .and_then(|tiers| tiers.get(tenant).copied())
            .unwrap_or_default()
    }

    /// Counts an invocation and checks the tenant against its limits.
    pub fn charge_invocation(&self, tenant: &TenantId) -> CostDecision {
        let period_index = self.clock.now_ms() / PERIOD_MS;
        let limits = TierLimits::for_tier(self.tier(tenant));

        let mut usage = match self.usage.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Cost tracker lock poisoned; recovering");
                poisoned.into_inner()
            }
        };
        let record = usage.entry(tenant.clone()).or_default();
        record.roll_if_stale(period_index);
        record.invocations += 1;

        Self::evaluate(record, &limits)
    }

    /// Applies a post-completion usage charge (compute, storage, network).
    pub fn charge_usage(&self, tenant: &TenantId, charge: UsageCharge) -> CostDecision {
        let period_index = self.clock.now_ms() / PERIOD_MS;
        let limits = TierLimits::for_tier(self.tier(tenant));

        let mut usage = match self.usage.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let record = usage.entry(tenant.clone()).or_default();
        record.roll_if_stale(period_index);
        record.compute_ms += charge.compute_ms;
        record.storage_bytes += charge.storage_bytes;
        record.network_calls += charge.network_calls;

        Self::evaluate(record, &limits)
    }

    fn evaluate(record: &TenantUsage, limits: &TierLimits) -> CostDecision {
        let metrics: [(&'static str, u64, u64); 4] = [
            ("invocations", record.invocations, limits.invocations),
            ("compute_ms", record.compute_ms, limits.compute_ms),
            ("storage_bytes", record.storage_bytes, limits.storage_bytes),
            ("network_calls", record.network_calls, limits.network_calls),
        ];

        for (metric, used, limit) in metrics {
            if used > limit {
                return CostDecision::HardExceeded(metric, used, limit);
            }
        }
        for (metric, used, limit) in metrics {
            if (used as f64) > (limit as f64) * SOFT_THRESHOLD {
                return CostDecision::SoftExceeded(metric, used, limit);
            }
        }
        CostDecision::Within
    }

    /// Current invocation count for a tenant (testing and dashboards).
    #[must_use]
    pub fn invocations(&self, tenant: &TenantId) -> u64 {
        self.usage
            .read()
            .ok()
            .and_then(|usage| usage.get(tenant).map(|r| r.invocations))
            .unwrap_or(0)
    }
}

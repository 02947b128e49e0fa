//! # Sliding-Window Rate Limiter
//!
//! Per-key request windows with violation tracking. Key precedence:
//! `tenant + sub-identity` over `tenant` over anonymous source address;
//! a tenant subnet carries its own aggregate window on top.
//!
//! Window semantics: the counter never decreases mid-window; on expiry it
//! resets atomically to 1 (counting the request that opened the fresh
//! window) and the violation counter decays by one.

use crate::config::AdmissionConfig;
use shared_types::{Clock, Identity, SubnetId, TenantId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// The admission key a request is counted under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AdmissionKey {
    /// Most specific: a sub-identity within a tenant.
    TenantSub(TenantId, Identity),
    /// A tenant.
    Tenant(TenantId),
    /// Aggregate over a tenant subnet.
    Subnet(SubnetId),
    /// Anonymous traffic, keyed by source address.
    Anonymous(String),
}

impl AdmissionKey {
    /// Stable string form for events and logs.
    #[must_use]
    pub fn to_label(&self) -> String {
        match self {
            AdmissionKey::TenantSub(tenant, sub) => format!("{tenant}/{sub}"),
            AdmissionKey::Tenant(tenant) => tenant.to_string(),
            AdmissionKey::Subnet(subnet) => format!("subnet:{subnet}"),
            AdmissionKey::Anonymous(source) => format!("anon:{source}"),
        }
    }
}

/// One key's window state.
#[derive(Debug, Clone)]
struct WindowRecord {
    window_start_ms: u64,
    count: u32,
    violations: u32,
}

/// Outcome of one rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request fits the window.
    pub allowed: bool,
    /// Requests left in the current window (0 when rejected).
    pub remaining: u32,
    /// Advisory wait before retrying, set on rejection.
    pub retry_after_ms: u64,
    /// Violations currently recorded against the key.
    pub violations: u32,
}

/// The sliding-window limiter. Node-local: each node enforces its own
/// windows; correctness does not depend on shared counter state.
pub struct RateLimiter {
    records: RwLock<HashMap<AdmissionKey, WindowRecord>>,
    config: AdmissionConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Creates a limiter.
    #[must_use]
    pub fn new(config: AdmissionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            config,
            clock,
        }
    }

    /// Counts a request against `key` with an effective `limit`.
    ///
    /// The reputation multiplier (clamped to `[0.5, 2.0]`) scales the
    /// limit when adaptive limits are enabled.
    pub fn check(&self, key: &AdmissionKey, limit: u32, reputation: f64) -> RateDecision {
        let effective_limit = if self.config.adaptive_limits {
            let multiplier = reputation.clamp(0.5, 2.0);
            ((limit as f64) * multiplier).floor().max(1.0) as u32
        } else {
            limit
        };

        let now = self.clock.now_ms();
        let mut records = match self.records.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Rate limiter lock poisoned; recovering");
                poisoned.into_inner()
            }
        };

        let record = records.entry(key.clone()).or_insert(WindowRecord {
            window_start_ms: now,
            count: 0,
            violations: 0,
        });

        if now.saturating_sub(record.window_start_ms) >= self.config.window_ms {
            // Fresh window: counter resets to 1 (this request), violations
            // decay by one.
            record.window_start_ms = now;
            record.count = 1;
            record.violations = record.violations.saturating_sub(1);
        } else {
            record.count += 1;
        }

        if record.count <= effective_limit {
            RateDecision {
                allowed: true,
                remaining: effective_limit - record.count,
                retry_after_ms: 0,
                violations: record.violations,
            }
        } else {
            record.violations += 1;
            let retry_after_ms = if self.config.exponential_backoff {
                self.config.window_ms * (1u64 << record.violations.min(10))
            } else {
                (record.window_start_ms + self.config.window_ms).saturating_sub(now)
            };
            RateDecision {
                allowed: false,
                remaining: 0,
                retry_after_ms,
                violations: record.violations,
            }
        }
    }

    /// Violations currently recorded against a key.
    #[must_use]
    pub fn violations(&self, key: &AdmissionKey) -> u32 {
        self.records
            .read()
            .ok()
            .and_then(|records| records.get(key).map(|r| r.violations))
            .unwrap_or(0)
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// The configuration this limiter runs under.
    #[must_use]
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }
}

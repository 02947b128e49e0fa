//! # Admission Controller
//!
//! Composes breaker, rate limiter, and cost tracker into the single
//! gate every trigger passes. Ordering matters: the breaker is cheapest
//! and protects everything downstream; the limiter protects fairness;
//! cost is checked last because it mutates the billing counters.
//!
//! On allow, the remaining window budget is attached to the decision for
//! the scheduler's backpressure. On deny, a stable code and a
//! `retry_after_ms` hint are returned and the admission event is the only
//! side effect.

use crate::breaker::{BreakerTransition, CircuitBreaker};
use crate::config::{AdmissionConfig, BreakerConfig};
use crate::cost::{CostDecision, CostTracker, UsageCharge};
use crate::rate_limit::{AdmissionKey, RateLimiter};
use shared_bus::EventBus;
use shared_types::{Clock, ErrorCode, Identity, SubnetId, TenantId, Tier, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// One operation asking to be admitted.
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    /// Tenant the operation bills against.
    pub tenant: TenantId,
    /// Sub-identity (service account, API key) within the tenant.
    pub sub_identity: Option<Identity>,
    /// Tenant subnet, if the trigger is scoped to one.
    pub subnet: Option<SubnetId>,
    /// Source address for anonymous traffic.
    pub source_address: Option<String>,
    /// Whether the caller is unauthenticated.
    pub anonymous: bool,
    /// The endpoint/operation being admitted (breaker granularity).
    pub endpoint: String,
}

/// The controller's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    /// Whether the operation may proceed.
    pub allowed: bool,
    /// Stable rejection code.
    pub code: Option<ErrorCode>,
    /// Advisory wait before retrying.
    pub retry_after_ms: u64,
    /// Requests left in the governing window; the scheduler consumes
    /// this as its backpressure budget.
    pub remaining_budget: u32,
}

impl AdmissionDecision {
    fn allow(remaining_budget: u32) -> Self {
        Self {
            allowed: true,
            code: None,
            retry_after_ms: 0,
            remaining_budget,
        }
    }

    fn deny(code: ErrorCode, retry_after_ms: u64) -> Self {
        Self {
            allowed: false,
            code: Some(code),
            retry_after_ms,
            remaining_budget: 0,
        }
    }
}

/// The admission controller.
pub struct AdmissionController {
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    cost: CostTracker,
    reputation: RwLock<HashMap<TenantId, f64>>,
    bus: Arc<EventBus>,
    actor: Identity,
}

impl AdmissionController {
    /// Creates the controller and its components.
    #[must_use]
    pub fn new(
        config: AdmissionConfig,
        breaker_config: BreakerConfig,
        clock: Arc<dyn Clock>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(config, Arc::clone(&clock)),
            breaker: CircuitBreaker::new(breaker_config, Arc::clone(&clock)),
            cost: CostTracker::new(clock),
            reputation: RwLock::new(HashMap::new()),
            bus,
            actor: Identity::from("admission"),
        }
    }

    /// Gate one operation. See the module docs for ordering.
    pub fn admit(&self, request: &AdmissionRequest) -> AdmissionDecision {
        // 1. Circuit breaker: fail fast while the endpoint is unhealthy.
        if !self.breaker.should_allow(&request.endpoint) {
            let retry_after = self.breaker.retry_after_ms(&request.endpoint);
            let decision = AdmissionDecision::deny(ErrorCode::CircuitBreakerOpen, retry_after);
            self.emit_denied(request, &decision);
            return decision;
        }

        // 2. Rate limit on the most specific key, plus the subnet
        //    aggregate when present.
        let reputation = self.reputation_of(&request.tenant);
        let (key, limit) = self.primary_key(request);
        let rate = self.limiter.check(&key, limit, reputation);
        if !rate.allowed {
            self.bus.emit_best_effort(
                "rate-limit.violated",
                &self.actor,
                Value::from([
                    ("key", Value::from(key.to_label())),
                    ("violations", Value::Int(rate.violations as i64)),
                ]),
            );
            let decision =
                AdmissionDecision::deny(ErrorCode::RateLimitExceeded, rate.retry_after_ms);
            self.emit_denied(request, &decision);
            return decision;
        }

        let mut remaining = rate.remaining;
        if let Some(subnet) = &request.subnet {
            let subnet_key = AdmissionKey::Subnet(subnet.clone());
            let subnet_rate = self.limiter.check(
                &subnet_key,
                self.limiter.config().per_subnet_limit,
                reputation,
            );
            if !subnet_rate.allowed {
                let decision = AdmissionDecision::deny(
                    ErrorCode::RateLimitExceeded,
                    subnet_rate.retry_after_ms,
                );
                self.emit_denied(request, &decision);
                return decision;
            }
            remaining = remaining.min(subnet_rate.remaining);
        }

        // 3. Cost/quota.
        match self.cost.charge_invocation(&request.tenant) {
            CostDecision::Within => {}
            CostDecision::SoftExceeded(metric, used, limit) => {
                self.bus.emit_best_effort(
                    "cost.alert",
                    &self.actor,
                    Value::from([
                        ("tenant", Value::from(request.tenant.as_str())),
                        ("metric", Value::from(metric)),
                        ("used", Value::Int(used as i64)),
                        ("limit", Value::Int(limit as i64)),
                    ]),
                );
            }
            CostDecision::HardExceeded(..) => {
                let decision = AdmissionDecision::deny(ErrorCode::CostLimitExceeded, 0);
                self.emit_denied(request, &decision);
                return decision;
            }
        }

        let decision = AdmissionDecision::allow(remaining);
        self.bus.emit_best_effort(
            "admission.allowed",
            &self.actor,
            Value::from([
                ("tenant", Value::from(request.tenant.as_str())),
                ("endpoint", Value::from(request.endpoint.as_str())),
                ("remaining", Value::Int(remaining as i64)),
            ]),
        );
        decision
    }

    /// Reports a downstream success for breaker accounting.
    pub fn report_success(&self, endpoint: &str) {
        if let Some(transition) = self.breaker.record_success(endpoint) {
            self.emit_transition(transition);
        }
    }

    /// Reports a downstream server-class failure for breaker accounting.
    pub fn report_failure(&self, endpoint: &str) {
        if let Some(transition) = self.breaker.record_failure(endpoint) {
            self.emit_transition(transition);
        }
    }

    /// Applies a post-completion usage charge; a hard overrun here only
    /// affects the next admission.
    pub fn charge_usage(&self, tenant: &TenantId, charge: UsageCharge) {
        match self.cost.charge_usage(tenant, charge) {
            CostDecision::SoftExceeded(metric, used, limit)
            | CostDecision::HardExceeded(metric, used, limit) => {
                self.bus.emit_best_effort(
                    "cost.alert",
                    &self.actor,
                    Value::from([
                        ("tenant", Value::from(tenant.as_str())),
                        ("metric", Value::from(metric)),
                        ("used", Value::Int(used as i64)),
                        ("limit", Value::Int(limit as i64)),
                    ]),
                );
            }
            CostDecision::Within => {}
        }
    }

    /// Sets a tenant's reputation multiplier (clamped on use).
    pub fn set_reputation(&self, tenant: &TenantId, reputation: f64) {
        match self.reputation.write() {
            Ok(mut map) => {
                map.insert(tenant.clone(), reputation);
            }
            Err(_) => warn!("Reputation lock poisoned; update dropped"),
        }
    }

    /// Sets a tenant's tier for quota limits.
    pub fn set_tier(&self, tenant: &TenantId, tier: Tier) {
        self.cost.set_tier(tenant, tier);
    }

    /// The tier currently assigned to a tenant.
    #[must_use]
    pub fn tier(&self, tenant: &TenantId) -> Tier {
        self.cost.tier(tenant)
    }

    /// Direct access to the breaker for the scheduler's dispatch path.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn reputation_of(&self, tenant: &TenantId) -> f64 {
        self.reputation
            .read()
            .ok()
            .and_then(|map| map.get(tenant).copied())
            .unwrap_or(1.0)
    }

    fn primary_key(&self, request: &AdmissionRequest) -> (AdmissionKey, u32) {
        let config = self.limiter.config();
        if request.anonymous {
            let source = request
                .source_address
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            (AdmissionKey::Anonymous(source), config.anonymous_limit())
        } else if let Some(sub) = &request.sub_identity {
            (
                AdmissionKey::TenantSub(request.tenant.clone(), sub.clone()),
                config.per_sub_identity_limit,
            )
        } else {
            (
                AdmissionKey::Tenant(request.tenant.clone()),
                config.per_tenant_limit,
            )
        }
    }

    fn emit_denied(&self, request: &AdmissionRequest, decision: &AdmissionDecision) {
        let code = decision.code.unwrap_or(ErrorCode::Internal);
        self.bus.emit_best_effort(
            "admission.denied",
            &self.actor,
            Value::from([
                ("tenant", Value::from(request.tenant.as_str())),
                ("endpoint", Value::from(request.endpoint.as_str())),
                ("code", Value::from(code.as_str())),
                (
                    "retry_after_ms",
                    Value::Int(decision.retry_after_ms as i64),
                ),
            ]),
        );
    }

    fn emit_transition(&self, transition: BreakerTransition) {
        match transition {
            BreakerTransition::Opened { endpoint, failures } => {
                self.bus.emit_best_effort(
                    "breaker.opened",
                    &self.actor,
                    Value::from([
                        ("endpoint", Value::from(endpoint.as_str())),
                        ("failures", Value::Int(failures as i64)),
                    ]),
                );
            }
            BreakerTransition::Closed { endpoint } => {
                self.bus.emit_best_effort(
                    "breaker.closed",
                    &self.actor,
                    Value::from([("endpoint", Value::from(endpoint.as_str()))]),
                );
            }
        }
    }
}

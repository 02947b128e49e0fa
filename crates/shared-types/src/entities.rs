//! # Core Domain Entities
//!
//! Identity, scope, and trigger types shared across subsystems.
//!
//! ## Clusters
//!
//! - **Identity & Scope**: `Identity`, `TenantId`, `SubnetId`, `NodeId`
//! - **Flow & Execution handles**: `FlowId`, `StepId`, `ExecutionId`
//! - **Triggers**: `TriggerKind`, `TriggerContext`
//! - **Policy**: `PolicyVersion`, `Tier`

use crate::value::Value;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// CLUSTER A: IDENTITY & SCOPE
// =============================================================================

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub String);

        impl $name {
            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id! {
    /// An external identity string (the caller, a flow owner, an event actor).
    /// Opaque to the core; issued and verified by the identity layer.
    Identity
}

string_id! {
    /// A tenant: the unit of isolation for rate limits, quotas, and node sets.
    TenantId
}

string_id! {
    /// A tenant subnet: an isolation scope grouping identities, nodes,
    /// and policies within a tenant.
    SubnetId
}

string_id! {
    /// A worker node in the peer pool.
    NodeId
}

string_id! {
    /// A published flow. Stable across versions of the same flow.
    FlowId
}

string_id! {
    /// A step within a flow. Unique within its flow only.
    StepId
}

/// One running or terminated instance of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    /// Generates a fresh execution identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// CLUSTER B: TRIGGERS
// =============================================================================

/// How an execution was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// HTTP-shaped inbound payload.
    Webhook,
    /// An event observed on the event log.
    Event,
    /// A cron-like schedule fired.
    Schedule,
    /// A caller started the execution directly.
    Manual,
}

impl TriggerKind {
    /// Stable tag used in events and admission keys.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Webhook => "webhook",
            TriggerKind::Event => "event",
            TriggerKind::Schedule => "schedule",
            TriggerKind::Manual => "manual",
        }
    }
}

/// The ingress adapter's contract to the core: a validated identity,
/// a trigger-kind tag, the input value, and an optional tenant subnet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerContext {
    /// The triggering identity. Already authenticated by the ingress adapter.
    pub identity: Identity,
    /// The tenant this trigger belongs to.
    pub tenant: TenantId,
    /// How the execution was triggered.
    pub kind: TriggerKind,
    /// Input mapping handed to the entry step.
    pub input: Value,
    /// Optional tenant subnet scoping nodes and policies.
    pub subnet: Option<SubnetId>,
    /// Permissions granted to this trigger by the consent layer.
    pub granted_permissions: Vec<String>,
}

impl TriggerContext {
    /// A manual trigger with empty input, for tests and tooling.
    #[must_use]
    pub fn manual(identity: impl Into<Identity>, tenant: impl Into<TenantId>) -> Self {
        Self {
            identity: identity.into(),
            tenant: tenant.into(),
            kind: TriggerKind::Manual,
            input: Value::empty_map(),
            subnet: None,
            granted_permissions: Vec::new(),
        }
    }
}

// =============================================================================
// CLUSTER C: POLICY
// =============================================================================

/// Monotonic tag identifying the active set of validation/admission rules.
///
/// Cache keys include the policy version, so bumping it invalidates every
/// stale entry wholesale.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct PolicyVersion(pub u64);

impl std::fmt::Display for PolicyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pv{}", self.0)
    }
}

/// Tenant subscription tier. Yields quota limits and fair-share weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Entry tier.
    #[default]
    Free,
    /// Paid baseline.
    Basic,
    /// Elevated limits.
    Premium,
    /// Contractual limits.
    Enterprise,
}

impl Tier {
    /// Weight used by the scheduler's weighted-fair queue.
    #[must_use]
    pub fn fair_share_weight(&self) -> u32 {
        match self {
            Tier::Free => 1,
            Tier::Basic => 2,
            Tier::Premium => 4,
            Tier::Enterprise => 8,
        }
    }
}

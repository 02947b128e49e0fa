//! # Node Pool and Selection
//!
//! The per-tenant worker pool: capability advertisements, heartbeats,
//! and outstanding-load counters, plus the ranked selection the
//! scheduler dispatches through.

use crate::policy::TenantPolicy;
use crate::proposal::{Proposal, ProposalId, ProposalStatus};
use serde::{Deserialize, Serialize};
use shared_bus::EventBus;
use shared_crypto::hash;
use shared_types::{Clock, Identity, NodeId, StepId, TenantId, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Registry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// A node is live if it heartbeated within this window.
    pub liveness_window_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            liveness_window_ms: 15_000,
        }
    }
}

/// One worker node's advertisement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// The node.
    pub node_id: NodeId,
    /// Tenant whose work it accepts.
    pub tenant: TenantId,
    /// Advertised capabilities (action families it can run).
    pub capabilities: BTreeSet<String>,
    /// Last heartbeat, epoch milliseconds.
    pub last_heartbeat_ms: u64,
    /// Steps currently assigned.
    pub outstanding_load: u32,
    /// Reputation in `[0, 2]`; feeds admission's adaptive limits.
    pub reputation: f64,
}

impl NodeRecord {
    /// Whether the node heartbeated within the liveness window.
    #[must_use]
    pub fn is_live(&self, now_ms: u64, window_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_heartbeat_ms) <= window_ms
    }

    /// Whether the node advertises every required capability.
    #[must_use]
    pub fn has_capabilities(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }
}

/// The registry. Node-local view; peers converge through gossip outside
/// the core.
pub struct NodeRegistry {
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
    actor: Identity,
    nodes: RwLock<HashMap<NodeId, NodeRecord>>,
    policies: RwLock<HashMap<TenantId, TenantPolicy>>,
    proposals: RwLock<HashMap<ProposalId, Proposal>>,
}

impl NodeRegistry {
    /// Creates a registry.
    #[must_use]
    pub fn new(config: RegistryConfig, clock: Arc<dyn Clock>, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            clock,
            bus,
            actor: Identity::from("node-registry"),
            nodes: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
            proposals: RwLock::new(HashMap::new()),
        }
    }

    // =========================================================================
    // NODES
    // =========================================================================

    /// Registers (or re-registers) a node with its capabilities.
    pub fn join(&self, node_id: NodeId, tenant: TenantId, capabilities: BTreeSet<String>) {
        let now = self.clock.now_ms();
        let record = NodeRecord {
            node_id: node_id.clone(),
            tenant: tenant.clone(),
            capabilities,
            last_heartbeat_ms: now,
            outstanding_load: 0,
            reputation: 1.0,
        };
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.insert(node_id.clone(), record);
        }
        self.bus.emit_best_effort(
            "registry.node.joined",
            &self.actor,
            Value::from([
                ("node_id", Value::from(node_id.as_str())),
                ("tenant", Value::from(tenant.as_str())),
            ]),
        );
    }

    /// Removes a node from the pool.
    pub fn leave(&self, node_id: &NodeId) {
        let tenant = match self.nodes.write() {
            Ok(mut nodes) => nodes.remove(node_id).map(|r| r.tenant),
            Err(poisoned) => poisoned.into_inner().remove(node_id).map(|r| r.tenant),
        };
        if let Some(tenant) = tenant {
            self.bus.emit_best_effort(
                "registry.node.left",
                &self.actor,
                Value::from([
                    ("node_id", Value::from(node_id.as_str())),
                    ("tenant", Value::from(tenant.as_str())),
                ]),
            );
        }
    }

    /// Records a heartbeat with the node's current load.
    pub fn heartbeat(&self, node_id: &NodeId, outstanding_load: u32) {
        let now = self.clock.now_ms();
        if let Ok(mut nodes) = self.nodes.write() {
            if let Some(record) = nodes.get_mut(node_id) {
                record.last_heartbeat_ms = now;
                record.outstanding_load = outstanding_load;
            } else {
                debug!(node = %node_id, "Heartbeat from unknown node ignored");
            }
        }
    }

    /// Adjusts a node's outstanding load by a delta (dispatch +1,
    /// completion -1).
    pub fn adjust_load(&self, node_id: &NodeId, delta: i32) {
        if let Ok(mut nodes) = self.nodes.write() {
            if let Some(record) = nodes.get_mut(node_id) {
                record.outstanding_load =
                    record.outstanding_load.saturating_add_signed(delta);
            }
        }
    }

    /// Ranked candidates for a tenant and capability set: live nodes
    /// with every capability, lowest load first.
    #[must_use]
    pub fn nodes(&self, tenant: &TenantId, capabilities: &BTreeSet<String>) -> Vec<NodeRecord> {
        let now = self.clock.now_ms();
        let nodes = match self.nodes.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Registry lock poisoned; recovering");
                poisoned.into_inner()
            }
        };
        let mut candidates: Vec<NodeRecord> = nodes
            .values()
            .filter(|record| &record.tenant == tenant)
            .filter(|record| record.is_live(now, self.config.liveness_window_ms))
            .filter(|record| record.has_capabilities(capabilities))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            a.outstanding_load
                .cmp(&b.outstanding_load)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        candidates
    }

    /// Selects the dispatch target for a step: the ranked candidates
    /// with load ties broken by a stable hash of `(step, node)`, so
    /// concurrent schedulers spread rather than herd. `exclude` removes
    /// nodes that already failed this step.
    #[must_use]
    pub fn select_node(
        &self,
        tenant: &TenantId,
        capabilities: &BTreeSet<String>,
        step: &StepId,
        exclude: &[NodeId],
    ) -> Option<NodeRecord> {
        let mut candidates = self.nodes(tenant, capabilities);
        candidates.retain(|record| !exclude.contains(&record.node_id));

        candidates
            .into_iter()
            .min_by_key(|record| (record.outstanding_load, stable_tie_break(step, &record.node_id)))
    }

    // =========================================================================
    // POLICY
    // =========================================================================

    /// The tenant's policy (default if never set). Cloned: callers hold
    /// a snapshot, and later updates only affect future executions.
    #[must_use]
    pub fn policy(&self, tenant: &TenantId) -> TenantPolicy {
        self.policies
            .read()
            .ok()
            .and_then(|policies| policies.get(tenant).cloned())
            .unwrap_or_default()
    }

    /// Replaces the tenant's policy, bumping its version. Takes effect
    /// at the next execution boundary.
    pub fn update_policy(&self, tenant: &TenantId, mut policy: TenantPolicy) {
        if let Ok(mut policies) = self.policies.write() {
            let current_version = policies.get(tenant).map(|p| p.version).unwrap_or(0);
            policy.version = current_version + 1;
            policies.insert(tenant.clone(), policy);
        }
    }

    /// Adds a validator to the tenant's set.
    pub fn add_validator(&self, tenant: &TenantId, node: NodeId) {
        let mut policy = self.policy(tenant);
        policy.validators.insert(node);
        self.update_policy(tenant, policy);
    }

    /// Removes a validator from the tenant's set.
    pub fn remove_validator(&self, tenant: &TenantId, node: &NodeId) {
        let mut policy = self.policy(tenant);
        policy.validators.remove(node);
        self.update_policy(tenant, policy);
    }

    // =========================================================================
    // PROPOSALS
    // =========================================================================

    /// Creates a proposal against a tenant's policy.
    pub fn create_proposal(
        &self,
        tenant: &TenantId,
        kind: impl Into<String>,
        payload: Value,
    ) -> ProposalId {
        let kind = kind.into();
        let proposal = Proposal {
            id: ProposalId::generate(),
            tenant: tenant.clone(),
            kind: kind.clone(),
            payload,
            votes: Default::default(),
            status: ProposalStatus::Open,
            created_at_ms: self.clock.now_ms(),
        };
        let id = proposal.id;
        if let Ok(mut proposals) = self.proposals.write() {
            proposals.insert(id, proposal);
        }
        self.bus.emit_best_effort(
            "registry.proposal.created",
            &self.actor,
            Value::from([
                ("proposal_id", Value::from(id.to_string())),
                ("tenant", Value::from(tenant.as_str())),
                ("kind", Value::from(kind)),
            ]),
        );
        id
    }

    /// Records a validator's vote. Non-validators are ignored.
    pub fn vote(&self, proposal_id: &ProposalId, node: &NodeId, approve: bool) {
        let Some(tenant) = self
            .proposals
            .read()
            .ok()
            .and_then(|proposals| proposals.get(proposal_id).map(|p| p.tenant.clone()))
        else {
            return;
        };
        let policy = self.policy(&tenant);
        if !policy.validators.contains(node) {
            debug!(node = %node, "Vote from non-validator ignored");
            return;
        }

        if let Ok(mut proposals) = self.proposals.write() {
            if let Some(proposal) = proposals.get_mut(proposal_id) {
                proposal.record_vote(
                    node.clone(),
                    approve,
                    policy.quorum(),
                    policy.validators.len(),
                );
            }
        }
        self.bus.emit_best_effort(
            "registry.proposal.voted",
            &self.actor,
            Value::from([
                ("proposal_id", Value::from(proposal_id.to_string())),
                ("node_id", Value::from(node.as_str())),
                ("approve", Value::Bool(approve)),
            ]),
        );
    }

    /// Looks up a proposal (history included).
    #[must_use]
    pub fn proposal(&self, proposal_id: &ProposalId) -> Option<Proposal> {
        self.proposals
            .read()
            .ok()
            .and_then(|proposals| proposals.get(proposal_id).cloned())
    }
}

/// Stable tie break: first eight bytes of `SHA-256(step || node)`.
fn stable_tie_break(step: &StepId, node: &NodeId) -> u64 {
    let mut input = Vec::with_capacity(step.as_str().len() + node.as_str().len() + 1);
    input.extend_from_slice(step.as_str().as_bytes());
    input.push(0);
    input.extend_from_slice(node.as_str().as_bytes());
    let digest = hash(&input);
    u64::from_be_bytes(digest.as_bytes()[..8].try_into().expect("8 bytes"))
}

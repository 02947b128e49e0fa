//! # Node/Tenant Registry Subsystem
//!
//! Maintains the per-tenant pool of worker nodes — advertised
//! capabilities, recent liveness, outstanding load — plus tenant policy
//! and the proposal/vote records that change it.
//!
//! ## Selection contract
//!
//! `select_node(tenant, capabilities, step)` ranks candidates by, in
//! order: capability match, liveness (recent heartbeat), lowest
//! outstanding load, and a stable hash of `(step, node)` as the tie
//! break so concurrent schedulers don't herd onto one node.
//!
//! ## Policy boundaries
//!
//! Policy updates bump a version counter and take effect at the next
//! execution boundary: the scheduler snapshots the policy when an
//! execution starts, and running steps continue under their start-time
//! policy.

pub mod nodes;
pub mod policy;
pub mod proposal;

pub use nodes::{NodeRecord, NodeRegistry, RegistryConfig};
pub use policy::TenantPolicy;
pub use proposal::{Proposal, ProposalId, ProposalStatus};

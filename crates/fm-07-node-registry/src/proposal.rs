//! # Proposals and Votes
//!
//! Tenant policy changes travel as proposals voted on by the tenant's
//! validator set. A strict majority accepts; history is retained for
//! audit.

use serde::{Deserialize, Serialize};
use shared_types::{NodeId, TenantId, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Identifies a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProposalId(pub Uuid);

impl ProposalId {
    /// Generates a fresh id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ProposalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a proposal stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
    /// Collecting votes.
    Open,
    /// Reached quorum approval.
    Accepted,
    /// A majority cannot be reached anymore, or rejections reached
    /// quorum.
    Rejected,
}

/// One governance proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    /// Identifier.
    pub id: ProposalId,
    /// Tenant whose policy the proposal touches.
    pub tenant: TenantId,
    /// Proposal kind tag (`add-validator`, `set-limits`, ...). Opaque to
    /// the registry.
    pub kind: String,
    /// Proposal payload.
    pub payload: Value,
    /// Recorded votes.
    pub votes: BTreeMap<NodeId, bool>,
    /// Current status.
    pub status: ProposalStatus,
    /// Creation time, epoch milliseconds.
    pub created_at_ms: u64,
}

impl Proposal {
    /// Applies a vote and re-evaluates status against the quorum.
    ///
    /// A node voting twice overwrites its earlier vote while the
    /// proposal is open; votes after resolution are ignored.
    pub fn record_vote(&mut self, node: NodeId, approve: bool, quorum: usize, electorate: usize) {
        if self.status != ProposalStatus::Open {
            return;
        }
        self.votes.insert(node, approve);

        let approvals = self.votes.values().filter(|v| **v).count();
        let rejections = self.votes.len() - approvals;

        if approvals >= quorum {
            self.status = ProposalStatus::Accepted;
        } else if rejections > electorate.saturating_sub(quorum) {
            // Approval can no longer reach quorum.
            self.status = ProposalStatus::Rejected;
        }
    }
}

//! # Execution State
//!
//! One record per execution, mutated only through `transition()` and the
//! `record_*` methods so the invariants have a single enforcement point.

use crate::error::SchedulerError;
use shared_types::{
    ExecutionId, FlowId, NodeId, PolicyVersion, StepId, TriggerContext, Value,
};
use std::collections::HashMap;

/// Execution lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Created, not yet running (possibly queued).
    Pending,
    /// The owner loop is advancing steps.
    Running,
    /// Suspended by the caller; resumable.
    Paused,
    /// All steps done. Terminal.
    Completed,
    /// A step failed with no fallback. Terminal.
    Failed,
    /// Caller aborted. Terminal.
    Aborted,
}

impl ExecutionStatus {
    /// Whether this status can never change again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Aborted
        )
    }

    /// Stable tag for events and checkpoints.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Aborted => "aborted",
        }
    }

    /// Parses a checkpoint tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "pending" => Some(ExecutionStatus::Pending),
            "running" => Some(ExecutionStatus::Running),
            "paused" => Some(ExecutionStatus::Paused),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            "aborted" => Some(ExecutionStatus::Aborted),
            _ => None,
        }
    }
}

/// The full state of one execution.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    /// Execution identifier.
    pub id: ExecutionId,
    /// The flow being executed.
    pub flow_id: FlowId,
    /// Lifecycle status.
    pub status: ExecutionStatus,
    /// The step the owner loop will run next; `None` once done.
    pub current_step: Option<StepId>,
    /// Steps completed, in completion order.
    pub completed: Vec<StepId>,
    /// Steps that failed terminally (their retries exhausted).
    pub failed: Vec<StepId>,
    /// Execution variables (trigger input merged with step outputs).
    pub variables: Value,
    /// The trigger that started this execution.
    pub trigger: TriggerContext,
    /// Start time, epoch milliseconds.
    pub started_at_ms: u64,
    /// End time once terminal.
    pub ended_at_ms: Option<u64>,
    /// Last error message, if any.
    pub last_error: Option<String>,
    /// Which node ran (or is running) each step.
    pub assignments: HashMap<StepId, NodeId>,
    /// Policy version snapshotted at start; steps keep it for life.
    pub policy_version: PolicyVersion,
    /// Tenant policy version snapshotted at start.
    pub tenant_policy_version: u64,
    /// Tenant step-timeout ceiling snapshotted at start. Running steps
    /// continue under their start-time policy.
    pub tenant_max_step_timeout_ms: u64,
}

impl ExecutionState {
    /// Creates a pending execution for a trigger.
    #[must_use]
    pub fn new(
        flow_id: FlowId,
        entry_step: StepId,
        trigger: TriggerContext,
        policy_version: PolicyVersion,
        tenant_policy_version: u64,
        tenant_max_step_timeout_ms: u64,
        now_ms: u64,
    ) -> Self {
        let variables = match &trigger.input {
            Value::Map(_) => trigger.input.clone(),
            other => Value::from([("input", other.clone())]),
        };
        Self {
            id: ExecutionId::generate(),
            flow_id,
            status: ExecutionStatus::Pending,
            current_step: Some(entry_step),
            completed: Vec::new(),
            failed: Vec::new(),
            variables,
            trigger,
            started_at_ms: now_ms,
            ended_at_ms: None,
            last_error: None,
            assignments: HashMap::new(),
            policy_version,
            tenant_policy_version,
            tenant_max_step_timeout_ms,
        }
    }

    /// The single mutation point for status. Guards every edge of the
    /// state diagram; terminal statuses never transition out.
    pub fn transition(&mut self, to: ExecutionStatus) -> Result<(), SchedulerError> {
        use ExecutionStatus::*;
        let legal = match (self.status, to) {
            (Pending, Running) => true,
            (Pending, Aborted) => true,
            (Running, Paused) => true,
            (Running, Completed) => true,
            (Running, Failed) => true,
            (Running, Aborted) => true,
            (Paused, Running) => true,
            (Paused, Aborted) => true,
            _ => false,
        };
        if !legal {
            return Err(SchedulerError::InvalidTransition {
                execution_id: self.id,
                from: self.status.as_str(),
                requested: to.as_str(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Records a step completion, upholding `completed ∩ failed = ∅`.
    /// Returns false if the step already completed (duplicate reply).
    pub fn record_completed(&mut self, step: StepId) -> bool {
        if self.completed.contains(&step) {
            return false;
        }
        self.failed.retain(|s| s != &step);
        self.completed.push(step);
        true
    }

    /// Records a terminal step failure.
    pub fn record_failed(&mut self, step: StepId) {
        if !self.failed.contains(&step) && !self.completed.contains(&step) {
            self.failed.push(step);
        }
    }

    /// Whether a step already completed (at-most-once guard).
    #[must_use]
    pub fn is_completed(&self, step: &StepId) -> bool {
        self.completed.contains(step)
    }
}

//! # Worker Ports
//!
//! The step execution interface between the scheduler and untrusted
//! worker nodes. Workers reply success, failure (with a retryable flag),
//! or nothing at all — timeout-by-omission is handled by the scheduler's
//! deadline, not by the worker.

use async_trait::async_trait;
use shared_types::{ExecutionId, NodeId, StepId, Value};
use thiserror::Error;
use uuid::Uuid;

/// Transport-level dispatch faults (distinct from the step failing).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The node could not be reached; transient, retry elsewhere.
    #[error("Node unreachable: {0}")]
    Unreachable(String),
}

/// Everything a worker needs to run one step.
#[derive(Debug, Clone)]
pub struct StepInvocation {
    /// The execution this step belongs to.
    pub execution_id: ExecutionId,
    /// The step.
    pub step_id: StepId,
    /// Opaque action name the worker resolves.
    pub action: String,
    /// Step parameters from the flow definition.
    pub params: Value,
    /// Current execution variables.
    pub variables: Value,
    /// Absolute deadline, epoch milliseconds.
    pub deadline_ms: u64,
    /// Correlates worker-side logs with core events.
    pub correlation_id: Uuid,
    /// Zero-based attempt number (retries increment).
    pub attempt: u32,
}

/// A worker's reply.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The step produced an output mapping to merge into variables.
    Success {
        /// Output mapping.
        output: Value,
    },
    /// The step failed.
    Failure {
        /// Failure kind tag, matched against the retry policy's
        /// retryable set.
        kind: String,
        /// Whether the worker considers the failure transient.
        retryable: bool,
        /// Human-readable message.
        message: String,
    },
}

impl StepOutcome {
    /// A retryable failure with a kind tag.
    #[must_use]
    pub fn retryable_failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        StepOutcome::Failure {
            kind: kind.into(),
            retryable: true,
            message: message.into(),
        }
    }

    /// A permanent failure with a kind tag.
    #[must_use]
    pub fn permanent_failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        StepOutcome::Failure {
            kind: kind.into(),
            retryable: false,
            message: message.into(),
        }
    }
}

/// The scheduler's view of the worker pool transport.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Dispatches a step to a node and awaits its reply. The scheduler
    /// wraps this in the step deadline; implementations need not enforce
    /// it themselves.
    async fn execute(
        &self,
        node: &NodeId,
        invocation: StepInvocation,
    ) -> Result<StepOutcome, DispatchError>;

    /// Best-effort cancellation of an in-flight step after an abort.
    /// Fire and forget: a node that misses the cancel will have its late
    /// reply discarded anyway.
    async fn cancel(&self, node: &NodeId, execution_id: ExecutionId, step_id: StepId);
}

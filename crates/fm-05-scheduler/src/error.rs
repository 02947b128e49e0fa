//! Scheduler error types.

use shared_types::{ErrorCode, ExecutionId, FlowId};
use thiserror::Error;

/// Errors surfaced by the scheduler's public API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Referenced flow is not registered.
    #[error("Flow not found: {0}")]
    FlowNotFound(FlowId),

    /// Flow still has non-terminal executions.
    #[error("Flow {0} is referenced by non-terminal executions")]
    FlowInUse(FlowId),

    /// Referenced execution does not exist.
    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    /// The requested transition is not legal from the current status.
    #[error("Invalid transition for {execution_id}: {from} -> {requested}")]
    InvalidTransition {
        /// The execution.
        execution_id: ExecutionId,
        /// Current status tag.
        from: &'static str,
        /// Requested status tag.
        requested: &'static str,
    },

    /// The backpressure queue is full.
    #[error("Backpressure queue full")]
    QueueFull,

    /// Admission denied the trigger.
    #[error("Admission denied: {code}")]
    AdmissionDenied {
        /// The stable admission code.
        code: ErrorCode,
        /// Advisory retry hint.
        retry_after_ms: u64,
    },

    /// Recovery found no verifying checkpoint.
    #[error("Recovery failed for {0}: no verifying checkpoint")]
    RecoveryFailed(ExecutionId),
}

impl SchedulerError {
    /// Maps onto the stable wire code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            SchedulerError::FlowNotFound(_) => ErrorCode::FlowNotFound,
            SchedulerError::FlowInUse(_) => ErrorCode::FlowInUse,
            SchedulerError::ExecutionNotFound(_) => ErrorCode::ExecutionNotFound,
            SchedulerError::InvalidTransition { .. } => ErrorCode::Internal,
            SchedulerError::QueueFull => ErrorCode::RateLimitExceeded,
            SchedulerError::AdmissionDenied { code, .. } => *code,
            SchedulerError::RecoveryFailed(_) => ErrorCode::CheckpointIntegrityFailed,
        }
    }
}

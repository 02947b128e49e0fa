//! # Stable Error Codes
//!
//! Machine-readable error codes surfaced to callers and adjacent modules.
//! Internal error enums (per subsystem, `thiserror`) map onto these at the
//! API boundary; raw internals never leak past it.

use serde::{Deserialize, Serialize};

/// The closed set of stable, machine-readable error codes.
///
/// Adjacent modules match on these strings without coupling to the core's
/// internal error types. The set only grows; codes are never renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Caller signature over the canonical request failed to verify.
    AuthFail,
    /// A signature was structurally malformed or did not verify.
    SignatureInvalid,
    /// No consent token grants the required permission on the resource.
    ConsentDenied,
    /// Payload failed schema validation.
    SchemaInvalid,
    /// Per-key sliding window limit exceeded.
    RateLimitExceeded,
    /// The endpoint's circuit breaker is open.
    CircuitBreakerOpen,
    /// Tenant exceeded a hard cost/quota threshold.
    CostLimitExceeded,
    /// The security layer scored the request high/critical risk.
    AbuseDetected,
    /// Referenced flow does not exist.
    FlowNotFound,
    /// Flow document failed structural validation.
    FlowValidationFailed,
    /// Flow cannot be deleted while executions reference it.
    FlowInUse,
    /// Referenced execution does not exist.
    ExecutionNotFound,
    /// A dispatched step exceeded its deadline.
    StepTimeout,
    /// A checkpoint's signature failed to verify during recovery.
    CheckpointIntegrityFailed,
    /// Internal error; details are in the event log under the correlation id.
    Internal,
}

impl ErrorCode {
    /// The stable wire string for this code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthFail => "AUTH_FAIL",
            ErrorCode::SignatureInvalid => "SIGNATURE_INVALID",
            ErrorCode::ConsentDenied => "CONSENT_DENIED",
            ErrorCode::SchemaInvalid => "SCHEMA_INVALID",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            ErrorCode::CostLimitExceeded => "COST_LIMIT_EXCEEDED",
            ErrorCode::AbuseDetected => "ABUSE_DETECTED",
            ErrorCode::FlowNotFound => "FLOW_NOT_FOUND",
            ErrorCode::FlowValidationFailed => "FLOW_VALIDATION_FAILED",
            ErrorCode::FlowInUse => "FLOW_IN_USE",
            ErrorCode::ExecutionNotFound => "EXECUTION_NOT_FOUND",
            ErrorCode::StepTimeout => "STEP_TIMEOUT",
            ErrorCode::CheckpointIntegrityFailed => "CHECKPOINT_INTEGRITY_FAILED",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// Whether a failure with this code may be retried by the caller.
    ///
    /// Admission codes are retryable after the advisory `retry-after`;
    /// input errors are not.
    #[must_use]
    pub fn caller_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimitExceeded
                | ErrorCode::CircuitBreakerOpen
                | ErrorCode::StepTimeout
                | ErrorCode::Internal
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTH_FAIL" => Ok(ErrorCode::AuthFail),
            "SIGNATURE_INVALID" => Ok(ErrorCode::SignatureInvalid),
            "CONSENT_DENIED" => Ok(ErrorCode::ConsentDenied),
            "SCHEMA_INVALID" => Ok(ErrorCode::SchemaInvalid),
            "RATE_LIMIT_EXCEEDED" => Ok(ErrorCode::RateLimitExceeded),
            "CIRCUIT_BREAKER_OPEN" => Ok(ErrorCode::CircuitBreakerOpen),
            "COST_LIMIT_EXCEEDED" => Ok(ErrorCode::CostLimitExceeded),
            "ABUSE_DETECTED" => Ok(ErrorCode::AbuseDetected),
            "FLOW_NOT_FOUND" => Ok(ErrorCode::FlowNotFound),
            "FLOW_VALIDATION_FAILED" => Ok(ErrorCode::FlowValidationFailed),
            "FLOW_IN_USE" => Ok(ErrorCode::FlowInUse),
            "EXECUTION_NOT_FOUND" => Ok(ErrorCode::ExecutionNotFound),
            "STEP_TIMEOUT" => Ok(ErrorCode::StepTimeout),
            "CHECKPOINT_INTEGRITY_FAILED" => Ok(ErrorCode::CheckpointIntegrityFailed),
            "INTERNAL" => Ok(ErrorCode::Internal),
            _ => Err(()),
        }
    }
}

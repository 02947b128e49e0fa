//! # Checkpoint Shapes
//!
//! A checkpoint captures the execution's observable state at a step
//! boundary. The signature covers every field (plus the policy version),
//! so a tampered snapshot cannot steer recovery.

use serde::{Deserialize, Serialize};
use shared_crypto::{SignatureBytes, Signer};
use shared_types::{ExecutionId, PolicyVersion, StepId, Value};
use uuid::Uuid;

/// The state snapshot inside a checkpoint. Status is carried as its
/// stable tag so this crate stays below the scheduler in the dependency
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    /// The flow the execution runs, so recovery can re-resolve it.
    pub flow: String,
    /// Tenant the execution bills against.
    pub tenant: String,
    /// The identity that triggered the execution.
    pub identity: String,
    /// Execution status tag (`running`, `paused`, ...).
    pub status: String,
    /// Variables after the step's output merge.
    pub variables: Value,
    /// Steps completed so far, in completion order.
    pub completed: Vec<StepId>,
    /// Steps that failed (terminally) so far.
    pub failed: Vec<StepId>,
    /// The step the execution will run next, if any.
    pub next_step: Option<StepId>,
}

/// One signed checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint identifier.
    pub id: Uuid,
    /// The execution this belongs to.
    pub execution_id: ExecutionId,
    /// The step whose completion produced this checkpoint.
    pub step_id: StepId,
    /// Monotonic per-execution sequence number.
    pub sequence: u64,
    /// Captured state.
    pub snapshot: ExecutionSnapshot,
    /// Creation time, epoch milliseconds.
    pub timestamp_ms: u64,
    /// Policy version the execution ran under.
    pub policy_version: PolicyVersion,
    /// Signature over every prior field.
    pub signature: SignatureBytes,
}

impl Checkpoint {
    /// Builds and signs a checkpoint.
    #[must_use]
    pub fn seal(
        execution_id: ExecutionId,
        step_id: StepId,
        sequence: u64,
        snapshot: ExecutionSnapshot,
        timestamp_ms: u64,
        policy_version: PolicyVersion,
        signer: &dyn Signer,
    ) -> Self {
        let mut checkpoint = Self {
            id: Uuid::new_v4(),
            execution_id,
            step_id,
            sequence,
            snapshot,
            timestamp_ms,
            policy_version,
            signature: SignatureBytes(Vec::new()),
        };
        checkpoint.signature = signer.sign(&checkpoint.signable_bytes());
        checkpoint
    }

    /// Verifies the signature under the given signer.
    #[must_use]
    pub fn verify(&self, signer: &dyn Signer) -> bool {
        signer.verify(&self.signable_bytes(), &self.signature)
    }

    /// The bytes the signature covers: the checkpoint with an empty
    /// signature field, in its canonical binary encoding.
    fn signable_bytes(&self) -> Vec<u8> {
        let unsigned = Self {
            signature: SignatureBytes(Vec::new()),
            ..self.clone()
        };
        bincode::serialize(&unsigned).unwrap_or_default()
    }

    /// Binary encoding written to the content store.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    /// Decodes a checkpoint read back from the store.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::HmacSigner;

    fn snapshot() -> ExecutionSnapshot {
        ExecutionSnapshot {
            flow: "f-demo".into(),
            tenant: "acme".into(),
            identity: "alice".into(),
            status: "running".into(),
            variables: Value::from([("x", Value::Int(1))]),
            completed: vec![StepId::from("A")],
            failed: vec![],
            next_step: Some(StepId::from("B")),
        }
    }

    fn signer() -> HmacSigner {
        HmacSigner::new(b"ckpt-key".to_vec(), "ckpt")
    }

    #[test]
    fn test_seal_and_verify() {
        let s = signer();
        let checkpoint = Checkpoint::seal(
            ExecutionId::generate(),
            StepId::from("A"),
            0,
            snapshot(),
            1_000,
            shared_types::PolicyVersion(1),
            &s,
        );
        assert!(checkpoint.verify(&s));
    }

    #[test]
    fn test_tamper_detected() {
        let s = signer();
        let mut checkpoint = Checkpoint::seal(
            ExecutionId::generate(),
            StepId::from("A"),
            0,
            snapshot(),
            1_000,
            shared_types::PolicyVersion(1),
            &s,
        );
        checkpoint.snapshot.completed.push(StepId::from("FORGED"));
        assert!(!checkpoint.verify(&s));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let checkpoint = Checkpoint::seal(
            ExecutionId::generate(),
            StepId::from("A"),
            0,
            snapshot(),
            1_000,
            shared_types::PolicyVersion(1),
            &signer(),
        );
        let other = HmacSigner::new(b"other-key".to_vec(), "other");
        assert!(!checkpoint.verify(&other));
    }

    #[test]
    fn test_binary_round_trip() {
        let checkpoint = Checkpoint::seal(
            ExecutionId::generate(),
            StepId::from("A"),
            7,
            snapshot(),
            1_000,
            shared_types::PolicyVersion(2),
            &signer(),
        );
        let decoded = Checkpoint::from_bytes(&checkpoint.to_bytes()).unwrap();
        assert_eq!(decoded, checkpoint);
        assert!(decoded.verify(&signer()));
    }
}

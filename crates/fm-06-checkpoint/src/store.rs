//! # Checkpoint Store
//!
//! Signs, content-addresses, and indexes checkpoints per execution;
//! walks them back (newest first) for recovery. Checkpoint writes
//! serialize per execution id via the per-execution index entry; no lock
//! is held across a store await.

use crate::config::RecoveryConfig;
use crate::content_store::{ContentStore, ContentStoreError};
use crate::error::CheckpointError;
use crate::model::{Checkpoint, ExecutionSnapshot};
use shared_bus::EventBus;
use shared_crypto::{ContentId, Signer};
use shared_types::{Clock, ExecutionId, Identity, PolicyVersion, StepId, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Base delay for content-store read retries; doubles per attempt.
const RETRY_BASE_MS: u64 = 50;

/// The checkpoint store.
pub struct CheckpointStore {
    content: Arc<dyn ContentStore>,
    signer: Arc<dyn Signer>,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
    config: RecoveryConfig,
    actor: Identity,

    /// Per-execution ordered content-id list plus next sequence number.
    index: RwLock<HashMap<ExecutionId, (Vec<ContentId>, u64)>>,
}

impl CheckpointStore {
    /// Creates a checkpoint store.
    #[must_use]
    pub fn new(
        content: Arc<dyn ContentStore>,
        signer: Arc<dyn Signer>,
        clock: Arc<dyn Clock>,
        bus: Arc<EventBus>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            content,
            signer,
            clock,
            bus,
            config,
            actor: Identity::from("checkpoint"),
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Signs a snapshot and writes it durably. A step is considered
    /// complete only once this returns.
    ///
    /// Identical snapshots coalesce: if the content id equals the
    /// newest indexed one, the list is unchanged.
    pub async fn append(
        &self,
        execution_id: ExecutionId,
        step_id: StepId,
        snapshot: ExecutionSnapshot,
        policy_version: PolicyVersion,
    ) -> Result<(Checkpoint, ContentId), CheckpointError> {
        let sequence = {
            let mut index = self.write_index();
            let entry = index.entry(execution_id).or_insert_with(|| (Vec::new(), 0));
            let sequence = entry.1;
            entry.1 += 1;
            sequence
        };

        let checkpoint = Checkpoint::seal(
            execution_id,
            step_id.clone(),
            sequence,
            snapshot,
            self.clock.now_ms(),
            policy_version,
            self.signer.as_ref(),
        );

        let bytes = checkpoint.to_bytes();
        let content_id = self
            .content
            .put(&bytes)
            .await
            .map_err(|e| CheckpointError::StoreUnavailable(e.to_string()))?;

        {
            let mut index = self.write_index();
            let entry = index.entry(execution_id).or_insert_with(|| (Vec::new(), 0));
            if entry.0.last() != Some(&content_id) {
                entry.0.push(content_id.clone());
            }
        }

        self.bus.emit_best_effort(
            "execution.checkpointed",
            &self.actor,
            Value::from([
                ("execution_id", Value::from(execution_id.to_string())),
                ("step_id", Value::from(step_id.as_str())),
                ("content_id", Value::from(content_id.as_str())),
                ("sequence", Value::Int(sequence as i64)),
            ]),
        );

        Ok((checkpoint, content_id))
    }

    /// The ordered content-id list for an execution.
    #[must_use]
    pub fn checkpoint_ids(&self, execution_id: &ExecutionId) -> Vec<ContentId> {
        self.index
            .read()
            .ok()
            .and_then(|index| index.get(execution_id).map(|(ids, _)| ids.clone()))
            .unwrap_or_default()
    }

    /// Whether any checkpoint exists for `(execution, step)`. The
    /// scheduler's at-most-once guard.
    #[must_use]
    pub fn next_sequence(&self, execution_id: &ExecutionId) -> u64 {
        self.index
            .read()
            .ok()
            .and_then(|index| index.get(execution_id).map(|(_, seq)| *seq))
            .unwrap_or(0)
    }

    /// Reads the newest checkpoint whose signature verifies.
    ///
    /// A verification failure emits `checkpoint.integrity.failed` and —
    /// unless strict mode is on — falls back to the previous checkpoint,
    /// at most `fallback_depth` steps.
    pub async fn latest_verified(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Checkpoint, CheckpointError> {
        let ids = self.checkpoint_ids(execution_id);
        let mut inspected = 0usize;

        for content_id in ids.iter().rev() {
            if inspected > self.config.fallback_depth {
                break;
            }
            inspected += 1;

            let bytes = match self.get_with_retry(content_id, 3).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) | Err(_) => {
                    warn!(%content_id, "Checkpoint unreadable during recovery");
                    continue;
                }
            };
            let Some(checkpoint) = Checkpoint::from_bytes(&bytes) else {
                warn!(%content_id, "Checkpoint undecodable during recovery");
                continue;
            };

            if checkpoint.verify(self.signer.as_ref()) {
                return Ok(checkpoint);
            }

            self.bus.emit_best_effort(
                "checkpoint.integrity.failed",
                &self.actor,
                Value::from([
                    ("execution_id", Value::from(execution_id.to_string())),
                    ("content_id", Value::from(content_id.as_str())),
                ]),
            );
            if self.config.checkpoint_verify_strict {
                return Err(CheckpointError::NoVerifyingCheckpoint);
            }
        }

        Err(CheckpointError::NoVerifyingCheckpoint)
    }

    /// Drops an execution's checkpoint index (after retirement; blobs
    /// stay archived in the content store by id).
    pub fn retire(&self, execution_id: &ExecutionId) {
        self.write_index().remove(execution_id);
        debug!(%execution_id, "Checkpoint index retired");
    }

    /// Reads with exponential backoff for transient store faults.
    async fn get_with_retry(
        &self,
        content_id: &ContentId,
        max_attempts: u32,
    ) -> Result<Option<Vec<u8>>, ContentStoreError> {
        let mut attempt = 0;
        loop {
            match self.content.get(content_id).await {
                Ok(found) => return Ok(found),
                Err(e) if attempt + 1 < max_attempts => {
                    let delay = RETRY_BASE_MS << attempt;
                    debug!(%content_id, attempt, error = %e, "Content read failed; retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn write_index(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<ExecutionId, (Vec<ContentId>, u64)>> {
        match self.index.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

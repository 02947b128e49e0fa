//! # Runtime Configuration
//!
//! One document configures the whole node. Every section is optional and
//! falls back to the subsystem's defaults, so a bare `{}` is a valid
//! single-node configuration.

use fm_01_validation_cache::CacheConfig;
use fm_02_validation_pipeline::PipelineConfig;
use fm_03_admission::{AdmissionConfig, BreakerConfig};
use fm_05_scheduler::SchedulerConfig;
use fm_06_checkpoint::RecoveryConfig;
use fm_07_node_registry::RegistryConfig;
use serde::Deserialize;
use std::path::Path;

/// The whole node's configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Validation pipeline section.
    pub pipeline: PipelineConfig,
    /// Validation cache section.
    pub cache: CacheConfig,
    /// Admission section.
    pub admission: AdmissionConfig,
    /// Circuit breaker section.
    pub breaker: BreakerConfig,
    /// Scheduler section.
    pub scheduler: SchedulerConfig,
    /// Checkpoint recovery section.
    pub recovery: RecoveryConfig,
    /// Node registry section.
    pub registry: RegistryConfig,
    /// Signing key material (hex or raw UTF-8), fed to the HMAC signer.
    pub signing_key: String,
    /// Active policy version for cache keys and checkpoints.
    pub policy_version: u64,
}

impl RuntimeConfig {
    /// Loads configuration from a JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

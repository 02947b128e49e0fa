//! Configuration types for the validation pipeline.

use serde::Deserialize;

/// Runtime configuration for the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Ordered layer ids to run. The layer set is a first-class input:
    /// different operations exercise different subsets.
    pub layers: Vec<String>,

    /// Stop at the first failing layer.
    pub short_circuit_on_failure: bool,

    /// Budget per cache-missing layer.
    pub per_layer_timeout_ms: u64,

    /// Concurrent requests the pipeline admits; excess waits.
    pub max_concurrency: usize,

    /// Re-run a layer that failed with an internal error.
    pub retry_failed_layers: bool,

    /// Attempts per layer when retrying.
    pub retry_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            layers: vec![
                "signature".to_string(),
                "consent".to_string(),
                "metadata".to_string(),
                "security".to_string(),
            ],
            short_circuit_on_failure: true,
            per_layer_timeout_ms: 10_000,
            max_concurrency: 64,
            retry_failed_layers: false,
            retry_attempts: 1,
        }
    }
}

//! Recovery configuration.

use serde::Deserialize;

/// How recovery treats checkpoint verification.
#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    /// Strict: only the newest checkpoint is acceptable; a verification
    /// failure aborts recovery instead of falling back.
    pub checkpoint_verify_strict: bool,

    /// How many checkpoints back recovery may fall when signatures fail.
    pub fallback_depth: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            checkpoint_verify_strict: false,
            fallback_depth: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RecoveryConfig::default();
        assert!(!config.checkpoint_verify_strict);
        assert_eq!(config.fallback_depth, 3);
    }
}

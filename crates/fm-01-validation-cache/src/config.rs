//! Configuration types for the validation cache.

use serde::Deserialize;

/// Eviction policy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently used.
    Lru,
    /// Least frequently used.
    Lfu,
    /// Soonest to expire.
    Ttl,
    /// Weighted blend of recency, frequency, and remaining TTL.
    #[default]
    Hybrid,
}

/// Runtime configuration for the validation cache.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries before eviction kicks in.
    pub max_entries: usize,

    /// TTL applied when `put` is called without one.
    pub default_ttl_ms: u64,

    /// Upper bound any requested TTL is clamped to.
    pub max_ttl_ms: u64,

    /// Interval of the background sweep removing expired entries.
    pub cleanup_interval_ms: u64,

    /// Eviction policy under capacity pressure.
    pub eviction: EvictionPolicy,

    /// Identifies the signing key; recorded for rotation audits.
    pub signing_key_id: String,

    /// Hybrid eviction weight on recency.
    pub hybrid_alpha: f64,

    /// Hybrid eviction weight on frequency.
    pub hybrid_beta: f64,

    /// Hybrid eviction weight on inverse remaining TTL.
    pub hybrid_gamma: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            default_ttl_ms: 5 * 60 * 1000,
            max_ttl_ms: 60 * 60 * 1000,
            cleanup_interval_ms: 60 * 1000,
            eviction: EvictionPolicy::Hybrid,
            signing_key_id: "cache-default".to_string(),
            hybrid_alpha: 0.5,
            hybrid_beta: 0.3,
            hybrid_gamma: 0.2,
        }
    }
}

impl CacheConfig {
    /// Clamps a requested TTL into `(0, max_ttl_ms]`, substituting the
    /// default when absent.
    #[must_use]
    pub fn effective_ttl(&self, requested_ms: Option<u64>) -> u64 {
        requested_ms
            .unwrap_or(self.default_ttl_ms)
            .clamp(1, self.max_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 10_000);
        assert_eq!(config.default_ttl_ms, 300_000);
        assert_eq!(config.max_ttl_ms, 3_600_000);
        assert_eq!(config.eviction, EvictionPolicy::Hybrid);
    }

    #[test]
    fn test_effective_ttl_clamps() {
        let config = CacheConfig::default();
        assert_eq!(config.effective_ttl(None), 300_000);
        assert_eq!(config.effective_ttl(Some(10_000)), 10_000);
        assert_eq!(config.effective_ttl(Some(86_400_000)), 3_600_000);
        assert_eq!(config.effective_ttl(Some(0)), 1);
    }
}

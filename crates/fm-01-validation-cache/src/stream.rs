//! # Streaming Validation
//!
//! Walks an ordered list of layers, consulting the cache per layer and
//! invoking the caller's producer on miss. Returns as soon as an early
//! layer's decision is conclusive (short-circuit on failure, the default).
//!
//! Producer timeouts count as layer failures but are NOT cached: a
//! timeout says nothing about the input, only about the sibling service's
//! health at that moment.

use crate::entry::LayerOutcome;
use crate::store::ValidationCache;
use shared_types::{PolicyVersion, Value};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Options for one streaming run.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Stop at the first failing layer.
    pub short_circuit_on_failure: bool,
    /// Budget for each cache-missing layer's producer.
    pub per_layer_timeout_ms: u64,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            short_circuit_on_failure: true,
            per_layer_timeout_ms: 10_000,
        }
    }
}

/// One layer's contribution to a streaming run.
#[derive(Debug, Clone)]
pub struct LayerRun {
    /// The layer id.
    pub layer: String,
    /// The layer's verdict.
    pub outcome: LayerOutcome,
    /// Whether the verdict came from the cache.
    pub from_cache: bool,
    /// Wall time spent on this layer.
    pub duration_ms: u64,
}

/// The overall result of a streaming run.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    /// True iff every executed layer passed.
    pub passed: bool,
    /// Per-layer results, in execution order. Short-circuited layers are
    /// absent.
    pub runs: Vec<LayerRun>,
    /// The first failing layer, if any.
    pub failed_layer: Option<String>,
}

impl ValidationCache {
    /// Streaming validation over an ordered layer list.
    ///
    /// For each layer: consult the cache; on miss, invoke `produce` under
    /// the per-layer timeout and store the signed verdict. With
    /// short-circuit enabled (the default) the walk stops at the first
    /// failure.
    pub async fn stream<F, Fut>(
        &self,
        layers: &[String],
        input: &Value,
        policy_version: PolicyVersion,
        mut produce: F,
        opts: &StreamOptions,
    ) -> StreamOutcome
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = LayerOutcome>,
    {
        let mut runs = Vec::with_capacity(layers.len());
        let mut failed_layer = None;

        for layer in layers {
            let started = std::time::Instant::now();

            let (outcome, from_cache) = match self.get(layer, input, policy_version) {
                Some(cached) => (cached, true),
                None => {
                    let produced = tokio::time::timeout(
                        Duration::from_millis(opts.per_layer_timeout_ms),
                        produce(layer.clone()),
                    )
                    .await;

                    match produced {
                        Ok(outcome) => {
                            self.put(layer, input, policy_version, outcome.clone(), None);
                            (outcome, false)
                        }
                        Err(_) => {
                            warn!(
                                layer,
                                timeout_ms = opts.per_layer_timeout_ms,
                                "Layer producer timed out"
                            );
                            // Transient: fail the layer, skip the cache.
                            let outcome = LayerOutcome::fail(Value::from([
                                ("error", Value::from("producer timeout")),
                                (
                                    "timeout_ms",
                                    Value::Int(opts.per_layer_timeout_ms as i64),
                                ),
                            ]));
                            (outcome, false)
                        }
                    }
                }
            };

            let passed = outcome.passed;
            runs.push(LayerRun {
                layer: layer.clone(),
                outcome,
                from_cache,
                duration_ms: started.elapsed().as_millis() as u64,
            });

            if !passed {
                failed_layer = Some(layer.clone());
                if opts.short_circuit_on_failure {
                    break;
                }
            }
        }

        StreamOutcome {
            passed: failed_layer.is_none(),
            runs,
            failed_layer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use shared_bus::{core_schemas, EventBus};
    use shared_crypto::HmacSigner;
    use shared_types::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn cache() -> Arc<ValidationCache> {
        Arc::new(ValidationCache::new(
            CacheConfig::default(),
            Arc::new(HmacSigner::new(b"stream-key".to_vec(), "stream-test")),
            ManualClock::starting_at(1_000_000),
            Arc::new(EventBus::new(core_schemas())),
        ))
    }

    fn layers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_all_layers_pass() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = cache
            .stream(
                &layers(&["sig", "consent", "schema"]),
                &Value::Int(1),
                PolicyVersion(1),
                move |_layer| {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                    async { LayerOutcome::pass(Value::Null) }
                },
                &StreamOptions::default(),
            )
            .await;

        assert!(result.passed);
        assert_eq!(result.runs.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(result.failed_layer.is_none());
    }

    #[tokio::test]
    async fn test_short_circuit_skips_later_layers() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = cache
            .stream(
                &layers(&["sig", "consent", "schema"]),
                &Value::Int(2),
                PolicyVersion(1),
                move |layer| {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if layer == "consent" {
                            LayerOutcome::fail(Value::from([("code", Value::from("CONSENT_DENIED"))]))
                        } else {
                            LayerOutcome::pass(Value::Null)
                        }
                    }
                },
                &StreamOptions::default(),
            )
            .await;

        assert!(!result.passed);
        assert_eq!(result.failed_layer.as_deref(), Some("consent"));
        // "schema" never ran.
        assert_eq!(result.runs.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_run_served_from_cache() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        for expected_calls in [1, 1] {
            let calls_clone = calls.clone();
            let result = cache
                .stream(
                    &layers(&["sig"]),
                    &Value::Int(3),
                    PolicyVersion(1),
                    move |_| {
                        calls_clone.fetch_add(1, Ordering::SeqCst);
                        async { LayerOutcome::pass(Value::Null) }
                    },
                    &StreamOptions::default(),
                )
                .await;
            assert!(result.passed);
            assert_eq!(calls.load(Ordering::SeqCst), expected_calls);
        }
        assert!(cache.stats().hits >= 1);
    }

    #[tokio::test]
    async fn test_producer_timeout_is_layer_failure() {
        let cache = cache();
        let opts = StreamOptions {
            per_layer_timeout_ms: 20,
            ..StreamOptions::default()
        };

        let result = cache
            .stream(
                &layers(&["slow"]),
                &Value::Int(4),
                PolicyVersion(1),
                |_| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    LayerOutcome::pass(Value::Null)
                },
                &opts,
            )
            .await;

        assert!(!result.passed);
        assert_eq!(result.failed_layer.as_deref(), Some("slow"));
        // Timeouts are not cached: a rerun consults the producer again.
        assert!(cache.get("slow", &Value::Int(4), PolicyVersion(1)).is_none());
    }

    #[tokio::test]
    async fn test_no_short_circuit_runs_all() {
        let cache = cache();
        let opts = StreamOptions {
            short_circuit_on_failure: false,
            ..StreamOptions::default()
        };

        let result = cache
            .stream(
                &layers(&["a", "b", "c"]),
                &Value::Int(5),
                PolicyVersion(1),
                |layer| async move {
                    if layer == "a" {
                        LayerOutcome::fail(Value::Null)
                    } else {
                        LayerOutcome::pass(Value::Null)
                    }
                },
                &opts,
            )
            .await;

        assert!(!result.passed);
        assert_eq!(result.runs.len(), 3);
        assert_eq!(result.failed_layer.as_deref(), Some("a"));
    }
}

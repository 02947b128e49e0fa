//! # Pipeline Orchestration
//!
//! Runs the configured layer ordering through the signed cache's
//! streaming walk, emits per-layer and per-pipeline events, and produces
//! the verdict the admission/scheduler path consumes.

use crate::config::PipelineConfig;
use crate::layers::ValidationLayer;
use crate::report::{LayerReport, LayerStatus, PipelineVerdict};
use crate::request::ValidationRequest;
use fm_01_validation_cache::{LayerOutcome, StreamOptions, ValidationCache};
use shared_bus::EventBus;
use shared_types::{Clock, ErrorCode, Identity, PolicyVersion, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// The ordered composition of validation layers.
pub struct ValidationPipeline {
    layers: HashMap<String, Arc<dyn ValidationLayer>>,
    config: PipelineConfig,
    cache: Arc<ValidationCache>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    concurrency: Semaphore,
    actor: Identity,
}

impl ValidationPipeline {
    /// Creates a pipeline. Layers are registered separately so the
    /// runtime controls exactly which are live.
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        cache: Arc<ValidationCache>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let permits = config.max_concurrency.max(1);
        Self {
            layers: HashMap::new(),
            config,
            cache,
            bus,
            clock,
            concurrency: Semaphore::new(permits),
            actor: Identity::from("validation-pipeline"),
        }
    }

    /// Registers a layer implementation under its id.
    #[must_use]
    pub fn with_layer(mut self, layer: Arc<dyn ValidationLayer>) -> Self {
        self.layers.insert(layer.id().to_string(), layer);
        self
    }

    /// The configured layer ordering.
    #[must_use]
    pub fn layer_order(&self) -> &[String] {
        &self.config.layers
    }

    /// Validates one request under the given policy version.
    ///
    /// The overall verdict is `passed` iff every required layer passed;
    /// otherwise the first failing layer's report is propagated.
    pub async fn run(
        &self,
        request: &ValidationRequest,
        policy_version: PolicyVersion,
    ) -> PipelineVerdict {
        let _permit = self.concurrency.acquire().await.expect("semaphore open");

        let opts = StreamOptions {
            short_circuit_on_failure: self.config.short_circuit_on_failure,
            per_layer_timeout_ms: self.config.per_layer_timeout_ms,
        };

        let layers = &self.layers;
        let clock = &self.clock;
        let retry_attempts = if self.config.retry_failed_layers {
            self.config.retry_attempts.max(1)
        } else {
            1
        };

        let producer = |layer_id: String| {
            let layer = layers.get(&layer_id).cloned();
            let request = request.clone();
            let clock = Arc::clone(clock);
            async move {
                let Some(layer) = layer else {
                    warn!(layer = %layer_id, "Configured layer has no implementation");
                    let report = LayerReport::failed(
                        &layer_id,
                        ErrorCode::Internal,
                        "layer not registered",
                    );
                    return LayerOutcome::fail(report.to_value());
                };

                let started = std::time::Instant::now();
                let mut report = layer.validate(&request).await;
                let mut attempt = 1;
                while !report.is_passing()
                    && report.code == Some(ErrorCode::Internal)
                    && attempt < retry_attempts
                {
                    attempt += 1;
                    report = layer.validate(&request).await;
                }
                report.duration_ms = started.elapsed().as_millis() as u64;
                report.timestamp_ms = clock.now_ms();

                if report.is_passing() {
                    LayerOutcome::pass(report.to_value())
                } else {
                    LayerOutcome::fail(report.to_value())
                }
            }
        };

        let input = request.cache_input();
        let stream_outcome = self
            .cache
            .stream(&self.config.layers, &input, policy_version, producer, &opts)
            .await;

        let mut reports = Vec::with_capacity(stream_outcome.runs.len());
        for run in &stream_outcome.runs {
            let report = LayerReport::from_value(&run.outcome.payload).unwrap_or_else(|| {
                // Timeout outcomes carry no report shape.
                LayerReport::failed(&run.layer, ErrorCode::Internal, "layer timed out")
            });

            self.bus.emit_best_effort(
                "validation.layer.completed",
                &self.actor,
                Value::from([
                    ("layer", Value::from(run.layer.as_str())),
                    ("status", Value::from(report.status.as_str())),
                    ("duration_ms", Value::Int(run.duration_ms as i64)),
                ]),
            );
            reports.push(report);
        }

        let failed = reports
            .iter()
            .find(|report| report.status == LayerStatus::Failed)
            .cloned();

        if let Some(failing) = &failed {
            self.bus.emit_best_effort(
                "validation.pipeline.failed",
                &self.actor,
                Value::from([
                    ("failed_layer", Value::from(failing.layer_id.as_str())),
                    (
                        "code",
                        Value::from(failing.code.unwrap_or(ErrorCode::Internal).as_str()),
                    ),
                ]),
            );
            debug!(layer = %failing.layer_id, "Pipeline rejected request");
        } else {
            self.bus.emit_best_effort(
                "validation.pipeline.passed",
                &self.actor,
                Value::from([("layers", Value::Int(reports.len() as i64))]),
            );
        }

        PipelineVerdict {
            passed: failed.is_none(),
            reports,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::LayerStatus;
    use async_trait::async_trait;
    use fm_01_validation_cache::CacheConfig;
    use shared_bus::core_schemas;
    use shared_crypto::HmacSigner;
    use shared_types::{ManualClock, TenantId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct ScriptedLayer {
        id: String,
        pass: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ValidationLayer for ScriptedLayer {
        fn id(&self) -> &str {
            &self.id
        }

        async fn validate(&self, _request: &ValidationRequest) -> LayerReport {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.pass {
                LayerReport::passed(&self.id, "ok")
            } else {
                LayerReport::failed(&self.id, ErrorCode::ConsentDenied, "denied")
            }
        }
    }

    fn request() -> ValidationRequest {
        ValidationRequest {
            method: "POST".into(),
            path: "/trigger".into(),
            identity: Identity::from("alice"),
            tenant: TenantId::from("acme"),
            timestamp_ms: 1_000_000,
            signature: None,
            payload: Value::from([("x", Value::Int(1))]),
            resource: "flow:f".into(),
            required_permission: "execute".into(),
            correlation_id: Uuid::new_v4(),
        }
    }

    fn pipeline_with(
        layer_specs: &[(&str, bool)],
    ) -> (ValidationPipeline, Vec<Arc<AtomicUsize>>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new(core_schemas()));
        let clock = ManualClock::starting_at(1_000_000);
        let cache = Arc::new(ValidationCache::new(
            CacheConfig::default(),
            Arc::new(HmacSigner::new(b"pipe-key".to_vec(), "pipe")),
            clock.clone(),
            bus.clone(),
        ));
        let config = PipelineConfig {
            layers: layer_specs.iter().map(|(id, _)| id.to_string()).collect(),
            ..PipelineConfig::default()
        };

        let mut pipeline = ValidationPipeline::new(config, cache, bus.clone(), clock);
        let mut counters = Vec::new();
        for (id, pass) in layer_specs {
            let calls = Arc::new(AtomicUsize::new(0));
            counters.push(calls.clone());
            pipeline = pipeline.with_layer(Arc::new(ScriptedLayer {
                id: id.to_string(),
                pass: *pass,
                calls,
            }));
        }
        (pipeline, counters, bus)
    }

    #[tokio::test]
    async fn test_all_pass() {
        let (pipeline, _, _) = pipeline_with(&[("signature", true), ("consent", true)]);
        let verdict = pipeline.run(&request(), PolicyVersion(1)).await;
        assert!(verdict.passed);
        assert_eq!(verdict.reports.len(), 2);
        assert!(verdict.failed.is_none());
    }

    #[tokio::test]
    async fn test_short_circuit_on_failure() {
        let (pipeline, counters, _) =
            pipeline_with(&[("signature", true), ("consent", false), ("security", true)]);
        let verdict = pipeline.run(&request(), PolicyVersion(1)).await;

        assert!(!verdict.passed);
        assert_eq!(verdict.error_code(), Some(ErrorCode::ConsentDenied));
        // The layer after the failure never ran.
        assert_eq!(counters[2].load(Ordering::SeqCst), 0);
        assert_eq!(verdict.reports.len(), 2);
    }

    #[tokio::test]
    async fn test_second_run_hits_cache() {
        let (pipeline, counters, _) = pipeline_with(&[("signature", true)]);
        let req = request();

        let first = pipeline.run(&req, PolicyVersion(1)).await;
        let second = pipeline.run(&req, PolicyVersion(1)).await;

        assert!(first.passed && second.passed);
        // Authoritative layer consulted exactly once.
        assert_eq!(counters[0].load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_policy_version_busts_cache() {
        let (pipeline, counters, _) = pipeline_with(&[("signature", true)]);
        let req = request();

        let _ = pipeline.run(&req, PolicyVersion(1)).await;
        let _ = pipeline.run(&req, PolicyVersion(2)).await;
        assert_eq!(counters[0].load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unregistered_layer_fails_closed() {
        let (pipeline, _, _) = pipeline_with(&[("signature", true)]);
        // Reconfigure with a layer nobody registered.
        let mut config = PipelineConfig::default();
        config.layers = vec!["ghost".to_string()];
        let verdict = ValidationPipeline {
            config,
            ..pipeline
        }
        .run(&request(), PolicyVersion(1))
        .await;
        assert!(!verdict.passed);
        assert_eq!(verdict.error_code(), Some(ErrorCode::Internal));
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let (pipeline, _, bus) = pipeline_with(&[("signature", true)]);
        let mut sub = bus.subscribe("validation.*");

        let _ = pipeline.run(&request(), PolicyVersion(1)).await;

        let layer_event = sub.try_recv().unwrap().unwrap();
        assert_eq!(layer_event.event_type, "validation.layer.completed");
        let verdict_event = sub.try_recv().unwrap().unwrap();
        assert_eq!(verdict_event.event_type, "validation.pipeline.passed");
    }

    #[tokio::test]
    async fn test_warning_does_not_fail_pipeline() {
        struct WarningLayer;
        #[async_trait]
        impl ValidationLayer for WarningLayer {
            fn id(&self) -> &str {
                "metadata"
            }
            async fn validate(&self, _request: &ValidationRequest) -> LayerReport {
                LayerReport::warning("metadata", "index write failed")
            }
        }

        let (pipeline, _, _) = pipeline_with(&[]);
        let mut config = PipelineConfig::default();
        config.layers = vec!["metadata".to_string()];
        let pipeline = ValidationPipeline {
            config,
            ..pipeline
        }
        .with_layer(Arc::new(WarningLayer));

        let verdict = pipeline.run(&request(), PolicyVersion(1)).await;
        assert!(verdict.passed);
        assert_eq!(verdict.reports[0].status, LayerStatus::Warning);
    }
}

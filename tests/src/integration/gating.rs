//! # Admission and Cache Gating Scenarios
//!
//! Rate-limit rejection with retry-after hints, and the cache event
//! sequence for repeated identical inputs.

#[cfg(test)]
mod tests {
    use crate::integration::{await_terminal, Harness};
    use fm_01_validation_cache::{CacheConfig, LayerOutcome, ValidationCache};
    use fm_03_admission::AdmissionConfig;
    use fm_05_scheduler::{ExecutionStatus, SchedulerConfig, SchedulerError};
    use shared_bus::{core_schemas, EventBus};
    use shared_crypto::HmacSigner;
    use shared_types::{ErrorCode, FlowId, PolicyVersion, SystemClock, TriggerContext, Value};
    use std::sync::Arc;

    const ONE_STEP: &str = r#"{
        "format": "flowmesh.flow/v1",
        "id": "f-one", "name": "one", "version": "1.0.0", "owner": "alice",
        "steps": [{"id": "A", "kind": "task", "action": "echo"}]
    }"#;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rate_limit_two_per_window() {
        let harness = Harness::with_configs(
            AdmissionConfig {
                per_tenant_limit: 2,
                ..AdmissionConfig::default()
            },
            SchedulerConfig::default(),
        );
        harness.join_node("n1", &["echo"]);
        harness.register_flow(ONE_STEP);
        let mut violations = harness.bus.subscribe("rate-limit.violated");

        let first = harness
            .scheduler
            .start(&FlowId::from("f-one"), TriggerContext::manual("alice", "acme"))
            .unwrap();
        let second = harness
            .scheduler
            .start(&FlowId::from("f-one"), TriggerContext::manual("alice", "acme"))
            .unwrap();

        let third = harness
            .scheduler
            .start(&FlowId::from("f-one"), TriggerContext::manual("alice", "acme"));
        match third {
            Err(SchedulerError::AdmissionDenied {
                code,
                retry_after_ms,
            }) => {
                assert_eq!(code, ErrorCode::RateLimitExceeded);
                // At least the window remainder.
                assert!(retry_after_ms >= 60_000, "{retry_after_ms}");
            }
            other => panic!("expected rate-limit denial, got {other:?}"),
        }

        // Violation counter is exactly one.
        let violation = violations.try_recv().unwrap().unwrap();
        assert_eq!(violation.payload.get_path("violations"), Some(&Value::Int(1)));

        // The admitted pair still completes.
        assert_eq!(
            await_terminal(&harness.scheduler, &first).await,
            ExecutionStatus::Completed
        );
        assert_eq!(
            await_terminal(&harness.scheduler, &second).await,
            ExecutionStatus::Completed
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cache_miss_set_then_hit_sequence() {
        let bus = Arc::new(EventBus::new(core_schemas()));
        let cache = ValidationCache::new(
            CacheConfig::default(),
            Arc::new(HmacSigner::new(b"gating-key".to_vec(), "gating")),
            Arc::new(SystemClock),
            bus.clone(),
        );
        let mut events = bus.subscribe("cache.*");

        let input = Value::from([("payload", Value::from("same bytes"))]);
        let result = LayerOutcome::pass(Value::from([("verdict", Value::from("ok"))]));

        // First submission: miss, producer runs, verdict stored.
        assert!(cache.get("security", &input, PolicyVersion(3)).is_none());
        cache.put("security", &input, PolicyVersion(3), result.clone(), None);

        // Second submission within TTL: hit with the identical result.
        let hit = cache.get("security", &input, PolicyVersion(3)).unwrap();
        assert_eq!(hit, result);

        let sequence: Vec<String> = std::iter::from_fn(|| events.try_recv().unwrap())
            .map(|record| record.event_type)
            .collect();
        assert_eq!(sequence, vec!["cache.miss", "cache.set", "cache.hit"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_breaker_rejects_after_failures() {
        let harness = Harness::new();
        harness.join_node("n1", &["echo"]);
        harness.register_flow(ONE_STEP);

        // Trip the breaker on the flow endpoint's action.
        for _ in 0..5 {
            harness.admission.report_failure("flow:f-one");
        }

        let denied = harness
            .scheduler
            .start(&FlowId::from("f-one"), TriggerContext::manual("alice", "acme"));
        match denied {
            Err(SchedulerError::AdmissionDenied { code, .. }) => {
                assert_eq!(code, ErrorCode::CircuitBreakerOpen);
            }
            other => panic!("expected breaker denial, got {other:?}"),
        }
    }
}

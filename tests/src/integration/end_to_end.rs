//! # End-to-End Execution Scenarios
//!
//! Trigger-to-completion choreography: sequential flows, retry
//! schedules, failure fallbacks, and aborts, observed through the event
//! log exactly as an adjacent module would see them.

#[cfg(test)]
mod tests {
    use crate::integration::{await_terminal, Harness, Reply};
    use fm_05_scheduler::{ExecutionStatus, StepOutcome};
    use shared_types::{FlowId, Identity, StepId, TriggerContext, Value};
    use std::time::Duration;

    const TWO_STEP: &str = r#"{
        "format": "flowmesh.flow/v1",
        "id": "f-seq", "name": "sequential", "version": "1.0.0", "owner": "alice",
        "steps": [
            {"id": "A", "kind": "task", "action": "echo", "params": {"x": 1}, "on_success": "B"},
            {"id": "B", "kind": "task", "action": "add", "params": {"y": 2}}
        ]
    }"#;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_two_step_sequential_flow() {
        let harness = Harness::new();
        harness.join_node("n1", &["echo", "add"]);
        harness.register_flow(TWO_STEP);

        // The worker applies the step's arithmetic: echo x=1, add y=x+2.
        harness.worker.script(
            "A",
            vec![Reply::Outcome(Ok(StepOutcome::Success {
                output: Value::from([("x", Value::Int(1))]),
            }))],
        );
        harness.worker.script(
            "B",
            vec![Reply::Outcome(Ok(StepOutcome::Success {
                output: Value::from([("y", Value::Int(3))]),
            }))],
        );

        let mut step_events = harness.bus.subscribe("execution.step.completed");
        let id = harness
            .scheduler
            .start(&FlowId::from("f-seq"), TriggerContext::manual("alice", "acme"))
            .unwrap();

        assert_eq!(
            await_terminal(&harness.scheduler, &id).await,
            ExecutionStatus::Completed
        );

        let state = harness.scheduler.execution(&id).unwrap();
        assert_eq!(state.completed, vec![StepId::from("A"), StepId::from("B")]);
        assert_eq!(state.variables.get_path("x"), Some(&Value::Int(1)));
        assert_eq!(state.variables.get_path("y"), Some(&Value::Int(3)));

        // Exactly two step-completed events, in order.
        let first = step_events.try_recv().unwrap().unwrap();
        let second = step_events.try_recv().unwrap().unwrap();
        assert_eq!(
            first.payload.get_path("step_id").and_then(Value::as_str),
            Some("A")
        );
        assert_eq!(
            second.payload.get_path("step_id").and_then(Value::as_str),
            Some("B")
        );
        assert!(step_events.try_recv().unwrap().is_none());

        // Two checkpoints, one per step.
        assert_eq!(harness.checkpoints.checkpoint_ids(&id).len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retryable_failure_backoff_schedule() {
        let harness = Harness::new();
        harness.join_node("n1", &["flaky"]);
        harness.join_node("n2", &["flaky"]);
        harness.register_flow(
            r#"{
            "format": "flowmesh.flow/v1",
            "id": "f-retry", "name": "retry", "version": "1.0.0", "owner": "alice",
            "steps": [
                {"id": "A", "kind": "task", "action": "flaky",
                 "retry": {"max_attempts": 3, "backoff": "exponential",
                           "initial_delay_ms": 100, "max_delay_ms": 1000,
                           "multiplier": 2.0}}
            ]
        }"#,
        );
        harness.worker.script(
            "A",
            vec![
                Reply::Outcome(Ok(StepOutcome::retryable_failure("transient", "one"))),
                Reply::Outcome(Ok(StepOutcome::retryable_failure("transient", "two"))),
                Reply::Outcome(Ok(StepOutcome::Success {
                    output: Value::empty_map(),
                })),
            ],
        );

        let id = harness
            .scheduler
            .start(&FlowId::from("f-retry"), TriggerContext::manual("alice", "acme"))
            .unwrap();
        assert_eq!(
            await_terminal(&harness.scheduler, &id).await,
            ExecutionStatus::Completed
        );

        // Three dispatches with ~100ms then ~200ms between them.
        let dispatches = harness.worker.dispatches_of("A");
        assert_eq!(dispatches.len(), 3);
        let first_gap = dispatches[1].duration_since(dispatches[0]);
        let second_gap = dispatches[2].duration_since(dispatches[1]);
        assert!(first_gap >= Duration::from_millis(90), "{first_gap:?}");
        assert!(second_gap >= Duration::from_millis(180), "{second_gap:?}");
        assert!(second_gap > first_gap);

        // One checkpoint: A completed once.
        assert_eq!(harness.checkpoints.checkpoint_ids(&id).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_non_retryable_failure_takes_fallback() {
        let harness = Harness::new();
        harness.join_node("n1", &["risky", "cleanup"]);
        harness.register_flow(
            r#"{
            "format": "flowmesh.flow/v1",
            "id": "f-fb", "name": "fallback", "version": "1.0.0", "owner": "alice",
            "steps": [
                {"id": "A", "kind": "task", "action": "risky", "on_failure": "B"},
                {"id": "B", "kind": "task", "action": "cleanup"}
            ]
        }"#,
        );
        harness.worker.script(
            "A",
            vec![Reply::Outcome(Ok(StepOutcome::permanent_failure(
                "invalid-input",
                "rejected by action",
            )))],
        );

        let id = harness
            .scheduler
            .start(&FlowId::from("f-fb"), TriggerContext::manual("alice", "acme"))
            .unwrap();
        assert_eq!(
            await_terminal(&harness.scheduler, &id).await,
            ExecutionStatus::Completed
        );

        let state = harness.scheduler.execution(&id).unwrap();
        assert_eq!(state.failed, vec![StepId::from("A")]);
        assert_eq!(state.completed, vec![StepId::from("B")]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_abort_during_event_wait_drops_late_signals() {
        let harness = Harness::new();
        harness.register_flow(
            r#"{
            "format": "flowmesh.flow/v1",
            "id": "f-wait", "name": "waiter", "version": "1.0.0", "owner": "alice",
            "steps": [
                {"id": "W", "kind": "event_trigger", "wait_event": "external.ping",
                 "timeout_ms": 60000, "on_success": "done-step"},
                {"id": "done-step", "kind": "task", "action": "noop"}
            ]
        }"#,
        );

        let mut lifecycle = harness.bus.subscribe("execution.aborted");
        let id = harness
            .scheduler
            .start(&FlowId::from("f-wait"), TriggerContext::manual("alice", "acme"))
            .unwrap();

        // Let the owner loop reach the wait, then abort.
        tokio::time::sleep(Duration::from_millis(25)).await;
        harness.scheduler.abort(&id).unwrap();
        assert_eq!(
            await_terminal(&harness.scheduler, &id).await,
            ExecutionStatus::Aborted
        );
        assert!(lifecycle.try_recv().unwrap().is_some());

        // The awaited event arrives late; the execution must not move.
        harness
            .bus
            .emit("external.ping", &Identity::from("peer"), Value::empty_map())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        let state = harness.scheduler.execution(&id).unwrap();
        assert_eq!(state.status, ExecutionStatus::Aborted);
        assert!(state.completed.is_empty());
        assert_eq!(harness.worker.dispatch_count("done-step"), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_event_trigger_consumes_event_payload() {
        let harness = Harness::new();
        harness.register_flow(
            r#"{
            "format": "flowmesh.flow/v1",
            "id": "f-evt", "name": "event", "version": "1.0.0", "owner": "alice",
            "steps": [
                {"id": "W", "kind": "event_trigger", "wait_event": "external.ping",
                 "timeout_ms": 60000}
            ]
        }"#,
        );

        let id = harness
            .scheduler
            .start(&FlowId::from("f-evt"), TriggerContext::manual("alice", "acme"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        harness
            .bus
            .emit(
                "external.ping",
                &Identity::from("peer"),
                Value::from([("ping", Value::Int(7))]),
            )
            .unwrap();

        assert_eq!(
            await_terminal(&harness.scheduler, &id).await,
            ExecutionStatus::Completed
        );
        let state = harness.scheduler.execution(&id).unwrap();
        // The event payload merged into variables.
        assert_eq!(state.variables.get_path("ping"), Some(&Value::Int(7)));
    }
}

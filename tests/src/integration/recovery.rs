//! # Crash Recovery Scenarios
//!
//! A scheduler instance "crashes" between steps; a fresh instance over
//! the same checkpoint store resumes with the identical completed set
//! and variables, and finished steps never re-dispatch.

#[cfg(test)]
mod tests {
    use crate::integration::{await_terminal, Harness, Reply};
    use fm_05_scheduler::{
        ExecutionStatus, Scheduler, SchedulerConfig, StepOutcome,
    };
    use shared_types::{FlowId, PolicyVersion, StepId, SystemClock, TriggerContext, Value};
    use std::sync::Arc;
    use std::time::Duration;

    const TWO_STEP: &str = r#"{
        "format": "flowmesh.flow/v1",
        "id": "f-rec", "name": "recoverable", "version": "1.0.0", "owner": "alice",
        "steps": [
            {"id": "A", "kind": "task", "action": "prepare", "on_success": "B"},
            {"id": "B", "kind": "task", "action": "commit"}
        ]
    }"#;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_recovery_between_steps_preserves_state() {
        let harness = Harness::new();
        harness.join_node("n1", &["prepare", "commit"]);
        let flow = harness.register_flow(TWO_STEP);

        // A completes; B hangs, simulating the node crashing mid-step.
        harness.worker.script(
            "A",
            vec![Reply::Outcome(Ok(StepOutcome::Success {
                output: Value::from([("prepared", Value::Bool(true))]),
            }))],
        );
        harness.worker.script(
            "B",
            vec![
                Reply::Hang,
                Reply::Outcome(Ok(StepOutcome::Success {
                    output: Value::from([("committed", Value::Bool(true))]),
                })),
            ],
        );

        let id = harness
            .scheduler
            .start(&FlowId::from("f-rec"), TriggerContext::manual("alice", "acme"))
            .unwrap();

        // Wait for A's checkpoint to land while B hangs.
        for _ in 0..500 {
            if !harness.checkpoints.checkpoint_ids(&id).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(harness.checkpoints.checkpoint_ids(&id).len(), 1);
        let pre_crash = harness.scheduler.execution(&id).unwrap();
        assert_eq!(pre_crash.completed, vec![StepId::from("A")]);

        // "Crash": a fresh scheduler over the same checkpoint store and
        // worker pool. The old owner loop still hangs on B's first
        // dispatch and never observes the second reply.
        let recovered_scheduler = Scheduler::new(
            SchedulerConfig::default(),
            Arc::new(SystemClock),
            Arc::clone(&harness.bus),
            harness.worker.clone(),
            Arc::clone(&harness.registry),
            Arc::clone(&harness.checkpoints),
            PolicyVersion(1),
        );
        recovered_scheduler.register_flow(flow);
        recovered_scheduler.recover(id).await.unwrap();

        assert_eq!(
            await_terminal(&recovered_scheduler, &id).await,
            ExecutionStatus::Completed
        );

        let recovered = recovered_scheduler.execution(&id).unwrap();
        // Identical up to the crash point, then finished.
        assert_eq!(
            recovered.completed,
            vec![StepId::from("A"), StepId::from("B")]
        );
        assert_eq!(
            recovered.variables.get_path("prepared"),
            pre_crash.variables.get_path("prepared")
        );
        assert_eq!(
            recovered.variables.get_path("committed"),
            Some(&Value::Bool(true))
        );
        // A ran exactly once across both lifetimes.
        assert_eq!(harness.worker.dispatch_count("A"), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_recovery_of_finished_execution_is_idempotent() {
        let harness = Harness::new();
        harness.join_node("n1", &["prepare", "commit"]);
        let flow = harness.register_flow(TWO_STEP);

        let id = harness
            .scheduler
            .start(&FlowId::from("f-rec"), TriggerContext::manual("alice", "acme"))
            .unwrap();
        assert_eq!(
            await_terminal(&harness.scheduler, &id).await,
            ExecutionStatus::Completed
        );
        let dispatches_before = harness.worker.dispatch_count("A");

        let recovered_scheduler = Scheduler::new(
            SchedulerConfig::default(),
            Arc::new(SystemClock),
            Arc::clone(&harness.bus),
            harness.worker.clone(),
            Arc::clone(&harness.registry),
            Arc::clone(&harness.checkpoints),
            PolicyVersion(1),
        );
        recovered_scheduler.register_flow(flow);
        recovered_scheduler.recover(id).await.unwrap();

        assert_eq!(
            await_terminal(&recovered_scheduler, &id).await,
            ExecutionStatus::Completed
        );
        // Nothing re-dispatched: the checkpoint already said "done".
        assert_eq!(harness.worker.dispatch_count("A"), dispatches_before);
    }
}

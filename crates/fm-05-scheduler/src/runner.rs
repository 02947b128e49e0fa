//! # Execution Owner Loop
//!
//! Each execution is bound to one spawned task that advances its state
//! machine step by step. Between two observable states no checkpoint is
//! partially written: results are applied under the state lock, then the
//! checkpoint write awaits outside it, then the completion event fires.
//!
//! Abort and pause are observed at suspension points (dispatch awaits,
//! retry sleeps, event waits) via the handle's control channel; the
//! dispatch future is dropped on abort, which is what structurally
//! discards late replies.

use crate::engine::{snapshot_of, ExecutionHandle, SchedulerInner};
use crate::ports::{DispatchError, StepInvocation, StepOutcome};
use crate::state::ExecutionStatus;
use fm_02_validation_pipeline::ValidationRequest;
use fm_04_flow_model::{Flow, Step, StepKind};
use shared_types::{ExecutionId, StepId, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of running one step, as seen by the owner loop.
enum StepResult {
    /// The step completed; merge `output`, follow `next`.
    Success {
        output: Value,
        next: Option<StepId>,
        /// Child steps completed inside a parallel step.
        extra_completed: Vec<StepId>,
    },
    /// The step failed terminally (retries exhausted or non-retryable).
    Fail {
        message: String,
        /// Children that still completed inside a partial parallel run.
        extra_completed: Vec<StepId>,
        /// Children that failed inside a parallel run.
        failed_children: Vec<StepId>,
    },
    /// The execution was aborted while the step was in flight.
    Aborted,
}

/// Drives one execution to a terminal state.
pub(crate) async fn run_execution(
    inner: Arc<SchedulerInner>,
    handle: Arc<ExecutionHandle>,
    flow: Arc<Flow>,
) {
    let mut control = handle.control.subscribe();

    let (execution_id, started) = handle.with_state(|state| {
        let id = state.id;
        match state.status {
            ExecutionStatus::Pending => {
                let ok = state.transition(ExecutionStatus::Running).is_ok();
                (id, ok)
            }
            // Recovery re-enters with status already set.
            ExecutionStatus::Running => (id, true),
            _ => (id, false),
        }
    });
    if !started {
        return;
    }

    let (flow_id, tenant) = handle.with_state(|state| {
        (
            state.flow_id.to_string(),
            state.trigger.tenant.to_string(),
        )
    });
    inner.bus.emit_best_effort(
        "execution.started",
        &inner.actor,
        Value::from([
            ("execution_id", Value::from(execution_id.to_string())),
            ("flow_id", Value::from(flow_id)),
            ("tenant", Value::from(tenant)),
        ]),
    );

    loop {
        enum Gate {
            Run(StepId),
            WaitControl,
            Finished,
            Stopped,
        }
        let gate = handle.with_state(|state| match state.status {
            ExecutionStatus::Paused => Gate::WaitControl,
            ExecutionStatus::Running => match &state.current_step {
                Some(step) => Gate::Run(step.clone()),
                None => Gate::Finished,
            },
            _ => Gate::Stopped,
        });

        let step_id = match gate {
            Gate::WaitControl => {
                if control.changed().await.is_err() {
                    return;
                }
                continue;
            }
            Gate::Stopped => return,
            Gate::Finished => {
                complete_execution(&inner, &handle, execution_id).await;
                return;
            }
            Gate::Run(step_id) => step_id,
        };

        let Some(step) = flow.step(&step_id).cloned() else {
            fail_execution(
                &inner,
                &handle,
                execution_id,
                format!("step `{step_id}` vanished from flow"),
            )
            .await;
            return;
        };

        let result = run_step(&inner, &handle, &flow, &step).await;

        match result {
            StepResult::Aborted => return,
            StepResult::Success {
                output,
                next,
                extra_completed,
            } => {
                let fresh = handle.with_state(|state| {
                    if !state.record_completed(step_id.clone()) {
                        // Duplicate completion: discard the late result.
                        return false;
                    }
                    for child in extra_completed {
                        state.record_completed(child);
                    }
                    state.variables.merge(output);
                    state.current_step = next;
                    true
                });
                if !fresh {
                    warn!(%execution_id, step = %step_id, "Duplicate step completion discarded");
                    continue;
                }
                write_checkpoint(&inner, &handle, execution_id, &step_id).await;
                emit_step_completed(&inner, execution_id, &step_id, "completed");
            }
            StepResult::Fail {
                message,
                extra_completed,
                failed_children,
            } => {
                let fallback = step.on_failure.clone();
                handle.with_state(|state| {
                    for child in extra_completed {
                        state.record_completed(child);
                    }
                    for child in failed_children {
                        state.record_failed(child);
                    }
                    state.record_failed(step_id.clone());
                    state.last_error = Some(message.clone());
                    state.current_step = fallback.clone();
                });
                write_checkpoint(&inner, &handle, execution_id, &step_id).await;
                emit_step_completed(&inner, execution_id, &step_id, "failed");

                if fallback.is_none() {
                    fail_execution(&inner, &handle, execution_id, message).await;
                    return;
                }
            }
        }
    }
}

// =============================================================================
// STEP EXECUTION
// =============================================================================

async fn run_step(
    inner: &Arc<SchedulerInner>,
    handle: &Arc<ExecutionHandle>,
    flow: &Arc<Flow>,
    step: &Step,
) -> StepResult {
    match step.kind {
        StepKind::Condition => {
            let passed = step
                .predicate
                .as_ref()
                .map(|predicate| handle.with_state(|state| predicate.evaluate(&state.variables)))
                .unwrap_or(false);
            let next = if passed {
                step.on_success.clone()
            } else {
                step.on_failure.clone()
            };
            StepResult::Success {
                output: Value::empty_map(),
                next,
                extra_completed: Vec::new(),
            }
        }
        StepKind::EventTrigger => wait_for_event(inner, handle, step).await,
        StepKind::Task | StepKind::ModuleCall => {
            dispatch_with_retries(Arc::clone(inner), Arc::clone(handle), step.clone()).await
        }
        StepKind::Parallel => run_parallel(inner, handle, flow, step).await,
    }
}

/// Suspends until the named event arrives, the deadline passes, or the
/// execution is aborted.
async fn wait_for_event(
    inner: &Arc<SchedulerInner>,
    handle: &Arc<ExecutionHandle>,
    step: &Step,
) -> StepResult {
    let event_name = step.wait_event.clone().unwrap_or_default();
    let mut subscription = inner.bus.subscribe(&event_name);
    let timeout = step_timeout(inner, handle, step);
    let mut control = handle.control.subscribe();

    tokio::select! {
        _ = wait_abort(handle, &mut control) => StepResult::Aborted,
        received = subscription.recv() => match received {
            Some(record) => StepResult::Success {
                output: record.payload,
                next: step.on_success.clone(),
                extra_completed: Vec::new(),
            },
            None => StepResult::Fail {
                message: "event bus closed while waiting".to_string(),
                extra_completed: Vec::new(),
                failed_children: Vec::new(),
            },
        },
        _ = tokio::time::sleep(timeout) => StepResult::Fail {
            message: format!("timed out waiting for event `{event_name}`"),
            extra_completed: Vec::new(),
            failed_children: Vec::new(),
        },
    }
}

/// Dispatches an enumerated set of child steps concurrently and merges
/// their outputs. Failure of any child fails the parallel step unless
/// the step allows partial success.
async fn run_parallel(
    inner: &Arc<SchedulerInner>,
    handle: &Arc<ExecutionHandle>,
    flow: &Arc<Flow>,
    step: &Step,
) -> StepResult {
    let mut join = JoinSet::new();
    for branch_id in &step.branches {
        let Some(child) = flow.step(branch_id).cloned() else {
            return StepResult::Fail {
                message: format!("parallel branch `{branch_id}` vanished from flow"),
                extra_completed: Vec::new(),
                failed_children: Vec::new(),
            };
        };
        let inner = Arc::clone(inner);
        let handle = Arc::clone(handle);
        join.spawn(async move {
            let child_id = child.id.clone();
            let result = dispatch_with_retries(inner, handle, child).await;
            (child_id, result)
        });
    }

    let mut merged = Value::empty_map();
    let mut completed_children = Vec::new();
    let mut failed_children = Vec::new();
    let mut first_failure: Option<String> = None;
    let mut aborted = false;

    while let Some(joined) = join.join_next().await {
        let Ok((child_id, result)) = joined else {
            first_failure.get_or_insert_with(|| "parallel branch task panicked".to_string());
            continue;
        };
        match result {
            StepResult::Success { output, .. } => {
                // Outputs merge in completion order.
                merged.merge(output);
                completed_children.push(child_id);
            }
            StepResult::Fail { message, .. } => {
                first_failure.get_or_insert(format!("branch `{child_id}` failed: {message}"));
                failed_children.push(child_id);
            }
            StepResult::Aborted => aborted = true,
        }
    }

    if aborted {
        return StepResult::Aborted;
    }
    match first_failure {
        Some(message) if !step.allow_partial => StepResult::Fail {
            message,
            extra_completed: completed_children,
            failed_children,
        },
        _ => StepResult::Success {
            output: merged,
            next: step.on_success.clone(),
            extra_completed: completed_children,
        },
    }
}

/// Dispatches a single step to the worker pool with the step's retry
/// schedule, choosing a different node per attempt when the pool allows.
async fn dispatch_with_retries(
    inner: Arc<SchedulerInner>,
    handle: Arc<ExecutionHandle>,
    step: Step,
) -> StepResult {
    let mut control = handle.control.subscribe();
    let (execution_id, tenant, policy_version) = handle.with_state(|state| {
        (
            state.id,
            state.trigger.tenant.clone(),
            state.policy_version,
        )
    });

    let max_attempts = step.retry.as_ref().map(|r| r.max_attempts).unwrap_or(1).max(1);
    let mut attempt: u32 = 0;
    let mut excluded = Vec::new();
    let required_caps: BTreeSet<String> = [step.action.clone()].into_iter().collect();

    loop {
        // Per-step validation gate (cache-keyed by canonical input +
        // policy version). Validation failures are not retryable.
        if let Some(pipeline) = &inner.pipeline {
            let request = step_validation_request(&inner, &handle, &step);
            let verdict = pipeline.run(&request, policy_version).await;
            if !verdict.passed {
                let code = verdict
                    .error_code()
                    .map(|c| c.as_str())
                    .unwrap_or("INTERNAL");
                return StepResult::Fail {
                    message: format!("step input rejected by validation ({code})"),
                    extra_completed: Vec::new(),
                    failed_children: Vec::new(),
                };
            }
        }

        // The action endpoint's circuit breaker fails fast before any
        // node is bothered.
        let breaker_open = inner
            .admission
            .as_ref()
            .is_some_and(|admission| !admission.breaker().should_allow(&step.action));

        let failure: (String, bool, String) = if breaker_open {
            (
                "breaker-open".to_string(),
                true,
                format!("circuit open for action `{}`", step.action),
            )
        } else {
            // Prefer an untried node; fall back to any when the pool is
            // smaller than the retry count.
            let selected = inner
                .registry
                .select_node(&tenant, &required_caps, &step.id, &excluded)
                .or_else(|| {
                    inner
                        .registry
                        .select_node(&tenant, &required_caps, &step.id, &[])
                });

            match selected {
                None => (
                    "no-node".to_string(),
                    true,
                    format!("no live node advertises `{}`", step.action),
                ),
                Some(node) => {
                    let timeout = step_timeout(&inner, &handle, &step);
                    let deadline_ms = inner.clock.now_ms() + timeout.as_millis() as u64;

                    let variables = handle.with_state(|state| {
                        state
                            .assignments
                            .insert(step.id.clone(), node.node_id.clone());
                        state.variables.clone()
                    });
                    inner.registry.adjust_load(&node.node_id, 1);
                    inner.bus.emit_best_effort(
                        "execution.step.dispatched",
                        &inner.actor,
                        Value::from([
                            ("execution_id", Value::from(execution_id.to_string())),
                            ("step_id", Value::from(step.id.as_str())),
                            ("node_id", Value::from(node.node_id.as_str())),
                            ("attempt", Value::Int(attempt as i64)),
                        ]),
                    );

                    let invocation = StepInvocation {
                        execution_id,
                        step_id: step.id.clone(),
                        action: step.action.clone(),
                        params: step.params.clone(),
                        variables,
                        deadline_ms,
                        correlation_id: Uuid::new_v4(),
                        attempt,
                    };

                    let dispatched = inner.executor.execute(&node.node_id, invocation);
                    let outcome = tokio::select! {
                        _ = wait_abort(&handle, &mut control) => {
                            inner.registry.adjust_load(&node.node_id, -1);
                            // Dropping the dispatch future is what
                            // discards the late reply.
                            return StepResult::Aborted;
                        }
                        outcome = tokio::time::timeout(timeout, dispatched) => outcome,
                    };
                    inner.registry.adjust_load(&node.node_id, -1);

                    match outcome {
                        Ok(Ok(StepOutcome::Success { output })) => {
                            if let Some(admission) = &inner.admission {
                                admission.report_success(&step.action);
                            }
                            return StepResult::Success {
                                output,
                                next: step.on_success.clone(),
                                extra_completed: Vec::new(),
                            };
                        }
                        Ok(Ok(StepOutcome::Failure {
                            kind,
                            retryable,
                            message,
                        })) => {
                            if let Some(admission) = &inner.admission {
                                admission.report_failure(&step.action);
                            }
                            excluded.push(node.node_id.clone());
                            (kind, retryable, message)
                        }
                        Ok(Err(DispatchError::Unreachable(message))) => {
                            if let Some(admission) = &inner.admission {
                                admission.report_failure(&step.action);
                            }
                            excluded.push(node.node_id.clone());
                            ("unreachable".to_string(), true, message)
                        }
                        Err(_elapsed) => {
                            if let Some(admission) = &inner.admission {
                                admission.report_failure(&step.action);
                            }
                            excluded.push(node.node_id.clone());
                            (
                                "timeout".to_string(),
                                true,
                                "step deadline exceeded".to_string(),
                            )
                        }
                    }
                }
            }
        };

        let (kind, retryable, message) = failure;
        let policy_retries = step
            .retry
            .as_ref()
            .map(|retry| retry.retries_kind(&kind))
            .unwrap_or(false);

        if retryable && policy_retries && attempt + 1 < max_attempts {
            let delay = step
                .retry
                .as_ref()
                .map(|retry| retry.delay_for_attempt(attempt))
                .unwrap_or(Duration::from_millis(0));
            debug!(
                step = %step.id, attempt, delay_ms = delay.as_millis() as u64, kind,
                "Retrying step after backoff"
            );
            attempt += 1;
            tokio::select! {
                _ = wait_abort(&handle, &mut control) => return StepResult::Aborted,
                _ = tokio::time::sleep(delay) => {}
            }
            continue;
        }

        return StepResult::Fail {
            message: format!("{kind}: {message}"),
            extra_completed: Vec::new(),
            failed_children: Vec::new(),
        };
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Effective step timeout: `min(step timeout or default, tenant ceiling,
/// global ceiling)`.
fn step_timeout(
    inner: &Arc<SchedulerInner>,
    handle: &Arc<ExecutionHandle>,
    step: &Step,
) -> Duration {
    let tenant_ceiling = handle.with_state(|state| state.tenant_max_step_timeout_ms);
    let requested = step
        .timeout_ms
        .unwrap_or(inner.config.default_step_timeout_ms);
    Duration::from_millis(
        requested
            .min(tenant_ceiling)
            .min(inner.config.max_step_timeout_ms),
    )
}

/// Resolves once the execution is aborted. Pauses do not interrupt an
/// in-flight dispatch; they take effect at the next step boundary.
async fn wait_abort(handle: &Arc<ExecutionHandle>, control: &mut watch::Receiver<u64>) {
    loop {
        if handle.with_state(|state| state.status == ExecutionStatus::Aborted) {
            return;
        }
        if control.changed().await.is_err() {
            // Sender gone: the execution handle is being torn down.
            return;
        }
    }
}

fn step_validation_request(
    inner: &Arc<SchedulerInner>,
    handle: &Arc<ExecutionHandle>,
    step: &Step,
) -> ValidationRequest {
    let (identity, tenant) = handle.with_state(|state| {
        (
            state.trigger.identity.clone(),
            state.trigger.tenant.clone(),
        )
    });
    ValidationRequest {
        method: "step".to_string(),
        path: format!("step/{}", step.id),
        identity,
        tenant,
        timestamp_ms: inner.clock.now_ms(),
        signature: None,
        payload: step.params.clone(),
        resource: format!("action:{}", step.action),
        required_permission: "execute".to_string(),
        correlation_id: Uuid::new_v4(),
    }
}

async fn write_checkpoint(
    inner: &Arc<SchedulerInner>,
    handle: &Arc<ExecutionHandle>,
    execution_id: ExecutionId,
    step_id: &StepId,
) {
    let (snapshot, policy_version) =
        handle.with_state(|state| (snapshot_of(state), state.policy_version));
    if let Err(e) = inner
        .checkpoints
        .append(execution_id, step_id.clone(), snapshot, policy_version)
        .await
    {
        // The step result is already applied; losing the checkpoint only
        // costs recovery granularity.
        warn!(%execution_id, step = %step_id, error = %e, "Checkpoint write failed");
    }
}

fn emit_step_completed(
    inner: &Arc<SchedulerInner>,
    execution_id: ExecutionId,
    step_id: &StepId,
    status: &str,
) {
    inner.bus.emit_best_effort(
        "execution.step.completed",
        &inner.actor,
        Value::from([
            ("execution_id", Value::from(execution_id.to_string())),
            ("step_id", Value::from(step_id.as_str())),
            ("status", Value::from(status)),
        ]),
    );
}

async fn complete_execution(
    inner: &Arc<SchedulerInner>,
    handle: &Arc<ExecutionHandle>,
    execution_id: ExecutionId,
) {
    let now = inner.clock.now_ms();
    let transitioned = handle.with_state(|state| {
        let ok = state.transition(ExecutionStatus::Completed).is_ok();
        if ok {
            state.ended_at_ms = Some(now);
        }
        ok
    });
    if transitioned {
        inner.bus.emit_best_effort(
            "execution.completed",
            &inner.actor,
            Value::from([("execution_id", Value::from(execution_id.to_string()))]),
        );
    }
}

async fn fail_execution(
    inner: &Arc<SchedulerInner>,
    handle: &Arc<ExecutionHandle>,
    execution_id: ExecutionId,
    error: String,
) {
    let now = inner.clock.now_ms();
    let transitioned = handle.with_state(|state| {
        let ok = state.transition(ExecutionStatus::Failed).is_ok();
        if ok {
            state.ended_at_ms = Some(now);
            state.last_error = Some(error.clone());
        }
        ok
    });
    if transitioned {
        inner.bus.emit_best_effort(
            "execution.failed",
            &inner.actor,
            Value::from([
                ("execution_id", Value::from(execution_id.to_string())),
                ("error", Value::from(error)),
            ]),
        );
    }
}

//! # Scheduler Engine
//!
//! The public control surface: flow registration, execution lifecycle
//! (`start`/`pause`/`resume`/`abort`), backpressure, and recovery. Each
//! execution is owned by one spawned task (its owner loop, `runner.rs`);
//! the engine only touches state under short lock scopes and never
//! across a suspension point.

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::ports::StepExecutor;
use crate::queue::WeightedFairQueue;
use crate::runner;
use crate::state::{ExecutionState, ExecutionStatus};
use fm_02_validation_pipeline::ValidationPipeline;
use fm_03_admission::{AdmissionController, AdmissionRequest, UsageCharge};
use fm_04_flow_model::Flow;
use fm_06_checkpoint::{CheckpointStore, ExecutionSnapshot};
use fm_07_node_registry::NodeRegistry;
use shared_bus::EventBus;
use shared_types::{
    Clock, ExecutionId, FlowId, Identity, PolicyVersion, StepId, TenantId, TriggerContext, Value,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Per-execution shared handle: the state record plus the control
/// channel the owner loop watches.
pub(crate) struct ExecutionHandle {
    pub(crate) state: Mutex<ExecutionState>,
    pub(crate) control: watch::Sender<u64>,
}

impl ExecutionHandle {
    fn new(state: ExecutionState) -> Arc<Self> {
        let (control, _) = watch::channel(0);
        Arc::new(Self {
            state: Mutex::new(state),
            control,
        })
    }

    /// Wakes the owner loop after a control transition.
    pub(crate) fn nudge(&self) {
        self.control.send_modify(|generation| *generation += 1);
    }

    /// Runs `f` under the state lock.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut ExecutionState) -> R) -> R {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }
}

pub(crate) struct SchedulerInner {
    pub(crate) config: SchedulerConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) actor: Identity,
    pub(crate) flows: RwLock<HashMap<FlowId, Arc<Flow>>>,
    pub(crate) executions: RwLock<HashMap<ExecutionId, Arc<ExecutionHandle>>>,
    pub(crate) executor: Arc<dyn StepExecutor>,
    pub(crate) registry: Arc<NodeRegistry>,
    pub(crate) checkpoints: Arc<CheckpointStore>,
    pub(crate) admission: Option<Arc<AdmissionController>>,
    pub(crate) pipeline: Option<Arc<ValidationPipeline>>,
    pub(crate) policy_version: PolicyVersion,
    queue: Mutex<WeightedFairQueue<ExecutionId>>,
    in_flight: Mutex<HashMap<TenantId, usize>>,
}

/// The execution scheduler.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Creates a scheduler over its collaborators. Admission and the
    /// validation pipeline are attached separately by the runtime.
    #[must_use]
    pub fn new(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        bus: Arc<EventBus>,
        executor: Arc<dyn StepExecutor>,
        registry: Arc<NodeRegistry>,
        checkpoints: Arc<CheckpointStore>,
        policy_version: PolicyVersion,
    ) -> Self {
        let queue_capacity = config.queue_capacity;
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                clock,
                bus,
                actor: Identity::from("scheduler"),
                flows: RwLock::new(HashMap::new()),
                executions: RwLock::new(HashMap::new()),
                executor,
                registry,
                checkpoints,
                admission: None,
                pipeline: None,
                policy_version,
                queue: Mutex::new(WeightedFairQueue::new(queue_capacity)),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Attaches the admission controller. Must be called before `start`
    /// begins gating triggers; typically done once at runtime init.
    #[must_use]
    pub fn with_admission(mut self, admission: Arc<AdmissionController>) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("with_admission must be called before the scheduler is shared");
        inner.admission = Some(admission);
        self
    }

    /// Attaches the step-level validation pipeline.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: Arc<ValidationPipeline>) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("with_pipeline must be called before the scheduler is shared");
        inner.pipeline = Some(pipeline);
        self
    }

    // =========================================================================
    // FLOWS
    // =========================================================================

    /// Registers a parsed flow for execution.
    pub fn register_flow(&self, flow: Flow) {
        if let Ok(mut flows) = self.inner.flows.write() {
            flows.insert(flow.id.clone(), Arc::new(flow));
        }
    }

    /// Looks a registered flow up.
    #[must_use]
    pub fn flow(&self, flow_id: &FlowId) -> Option<Arc<Flow>> {
        self.inner
            .flows
            .read()
            .ok()
            .and_then(|flows| flows.get(flow_id).cloned())
    }

    /// Removes a flow. Refused while any execution referencing it is
    /// non-terminal.
    pub fn unregister_flow(&self, flow_id: &FlowId) -> Result<(), SchedulerError> {
        let in_use = self
            .inner
            .executions
            .read()
            .map(|executions| {
                executions.values().any(|handle| {
                    handle.with_state(|state| {
                        &state.flow_id == flow_id && !state.status.is_terminal()
                    })
                })
            })
            .unwrap_or(false);
        if in_use {
            return Err(SchedulerError::FlowInUse(flow_id.clone()));
        }
        if let Ok(mut flows) = self.inner.flows.write() {
            flows.remove(flow_id);
        }
        Ok(())
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Starts (or queues) an execution of a flow for a trigger.
    ///
    /// The trigger passes admission here; per-step gating happens inside
    /// the owner loop. Under backpressure the execution queues; a full
    /// queue rejects.
    pub fn start(
        &self,
        flow_id: &FlowId,
        trigger: TriggerContext,
    ) -> Result<ExecutionId, SchedulerError> {
        let flow = self
            .flow(flow_id)
            .ok_or_else(|| SchedulerError::FlowNotFound(flow_id.clone()))?;
        let entry = flow
            .entry_step()
            .ok_or_else(|| SchedulerError::FlowNotFound(flow_id.clone()))?
            .id
            .clone();

        if let Some(admission) = &self.inner.admission {
            let decision = admission.admit(&AdmissionRequest {
                tenant: trigger.tenant.clone(),
                sub_identity: None,
                subnet: trigger.subnet.clone(),
                source_address: None,
                anonymous: false,
                endpoint: format!("flow:{flow_id}"),
            });
            if !decision.allowed {
                return Err(SchedulerError::AdmissionDenied {
                    code: decision.code.unwrap_or(shared_types::ErrorCode::Internal),
                    retry_after_ms: decision.retry_after_ms,
                });
            }
        }

        let tenant = trigger.tenant.clone();
        let policy = self.inner.registry.policy(&tenant);
        let state = ExecutionState::new(
            flow_id.clone(),
            entry,
            trigger,
            self.inner.policy_version,
            policy.version,
            policy.max_step_timeout_ms,
            self.inner.clock.now_ms(),
        );
        let execution_id = state.id;
        let handle = ExecutionHandle::new(state);

        if let Ok(mut executions) = self.inner.executions.write() {
            executions.insert(execution_id, Arc::clone(&handle));
        }

        let ceiling = self
            .inner
            .config
            .max_in_flight_per_tenant
            .min(policy.max_in_flight.max(1));
        let below_ceiling = {
            let mut in_flight = self.lock_in_flight();
            let count = in_flight.entry(tenant.clone()).or_insert(0);
            if *count < ceiling {
                *count += 1;
                true
            } else {
                false
            }
        };

        if below_ceiling {
            self.spawn_runner(execution_id, handle, flow);
        } else {
            let weight = policy.tier.fair_share_weight();
            let mut queue = self.lock_queue();
            if queue.push(tenant, weight, execution_id).is_err() {
                if let Ok(mut executions) = self.inner.executions.write() {
                    executions.remove(&execution_id);
                }
                return Err(SchedulerError::QueueFull);
            }
            debug!(%execution_id, "Execution queued under backpressure");
        }

        Ok(execution_id)
    }

    /// Pauses a running execution.
    pub fn pause(&self, execution_id: &ExecutionId) -> Result<(), SchedulerError> {
        let handle = self.handle(execution_id)?;
        handle.with_state(|state| state.transition(ExecutionStatus::Paused))?;
        handle.nudge();
        self.emit_lifecycle("execution.paused", execution_id, None);
        Ok(())
    }

    /// Resumes a paused execution.
    pub fn resume(&self, execution_id: &ExecutionId) -> Result<(), SchedulerError> {
        let handle = self.handle(execution_id)?;
        handle.with_state(|state| state.transition(ExecutionStatus::Running))?;
        handle.nudge();
        self.emit_lifecycle("execution.resumed", execution_id, None);
        Ok(())
    }

    /// Aborts an execution: terminal state, best-effort cancellation of
    /// outstanding step deadlines, and late replies discarded.
    pub fn abort(&self, execution_id: &ExecutionId) -> Result<(), SchedulerError> {
        let handle = self.handle(execution_id)?;
        let now = self.inner.clock.now_ms();
        let pending_assignments = handle.with_state(|state| {
            state.transition(ExecutionStatus::Aborted)?;
            state.ended_at_ms = Some(now);
            let pending: Vec<_> = state
                .assignments
                .iter()
                .filter(|(step, _)| !state.completed.contains(step))
                .map(|(step, node)| (step.clone(), node.clone()))
                .collect();
            Ok::<_, SchedulerError>(pending)
        })?;
        handle.nudge();

        // Best-effort cancel RPCs to the nodes still holding steps. The
        // tenant slot is released by the owner loop's exit hook.
        for (step, node) in pending_assignments {
            let executor = Arc::clone(&self.inner.executor);
            let execution_id = *execution_id;
            tokio::spawn(async move {
                executor.cancel(&node, execution_id, step).await;
            });
        }

        self.emit_lifecycle("execution.aborted", execution_id, None);
        Ok(())
    }

    /// A snapshot of an execution's state.
    pub fn execution(&self, execution_id: &ExecutionId) -> Result<ExecutionState, SchedulerError> {
        Ok(self.handle(execution_id)?.with_state(|state| state.clone()))
    }

    /// An execution's current status.
    pub fn status(&self, execution_id: &ExecutionId) -> Result<ExecutionStatus, SchedulerError> {
        Ok(self.handle(execution_id)?.with_state(|state| state.status))
    }

    // =========================================================================
    // RECOVERY
    // =========================================================================

    /// Rebuilds an execution from its newest verifying checkpoint and
    /// resumes it from the first unfinished step.
    pub async fn recover(&self, execution_id: ExecutionId) -> Result<(), SchedulerError> {
        let checkpoint = self
            .inner
            .checkpoints
            .latest_verified(&execution_id)
            .await
            .map_err(|_| SchedulerError::RecoveryFailed(execution_id))?;
        let snapshot = checkpoint.snapshot;

        let flow_id = FlowId::from(snapshot.flow.as_str());
        let flow = self
            .flow(&flow_id)
            .ok_or_else(|| SchedulerError::FlowNotFound(flow_id.clone()))?;

        let trigger = TriggerContext::manual(snapshot.identity.as_str(), snapshot.tenant.as_str());
        let tenant = trigger.tenant.clone();
        let policy = self.inner.registry.policy(&tenant);
        let mut state = ExecutionState::new(
            flow_id,
            snapshot
                .next_step
                .clone()
                .unwrap_or_else(|| StepId::from("done")),
            trigger,
            checkpoint.policy_version,
            policy.version,
            policy.max_step_timeout_ms,
            self.inner.clock.now_ms(),
        );
        state.id = execution_id;
        state.variables = snapshot.variables;
        state.completed = snapshot.completed;
        state.failed = snapshot.failed;
        state.current_step = snapshot.next_step;

        info!(%execution_id, completed = state.completed.len(), "Recovered execution from checkpoint");

        let handle = ExecutionHandle::new(state);
        if let Ok(mut executions) = self.inner.executions.write() {
            executions.insert(execution_id, Arc::clone(&handle));
        }
        {
            let mut in_flight = self.lock_in_flight();
            *in_flight.entry(tenant).or_insert(0) += 1;
        }
        self.spawn_runner(execution_id, handle, flow);
        Ok(())
    }

    /// Deletes a terminal execution after its retention period.
    pub fn retire(&self, execution_id: &ExecutionId) -> Result<(), SchedulerError> {
        let handle = self.handle(execution_id)?;
        let terminal = handle.with_state(|state| state.status.is_terminal());
        if !terminal {
            return Err(SchedulerError::InvalidTransition {
                execution_id: *execution_id,
                from: "non-terminal",
                requested: "retired",
            });
        }
        if let Ok(mut executions) = self.inner.executions.write() {
            executions.remove(execution_id);
        }
        self.inner.checkpoints.retire(execution_id);
        Ok(())
    }

    // =========================================================================
    // INTERNAL
    // =========================================================================

    fn spawn_runner(
        &self,
        execution_id: ExecutionId,
        handle: Arc<ExecutionHandle>,
        flow: Arc<Flow>,
    ) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            runner::run_execution(Arc::clone(&inner), Arc::clone(&handle), flow).await;
            Scheduler::on_terminal(&inner, execution_id, &handle);
        });
    }

    /// Post-terminal bookkeeping: usage charge, slot release, queue pop.
    fn on_terminal(inner: &Arc<SchedulerInner>, execution_id: ExecutionId, handle: &ExecutionHandle) {
        let (tenant, elapsed_ms) = handle.with_state(|state| {
            let elapsed = state
                .ended_at_ms
                .unwrap_or_else(|| inner.clock.now_ms())
                .saturating_sub(state.started_at_ms);
            (state.trigger.tenant.clone(), elapsed)
        });
        if let Some(admission) = &inner.admission {
            admission.charge_usage(
                &tenant,
                UsageCharge {
                    compute_ms: elapsed_ms,
                    ..UsageCharge::default()
                },
            );
        }
        debug!(%execution_id, "Execution task finished");
        Self::release_slot_inner(inner, &tenant);
    }

    fn release_slot_inner(inner: &Arc<SchedulerInner>, tenant: &TenantId) {
        {
            let mut in_flight = match inner.in_flight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(count) = in_flight.get_mut(tenant) {
                *count = count.saturating_sub(1);
            }
        }

        // A slot freed: drain the fair queue.
        let next = {
            let mut queue = match inner.queue.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            queue.pop()
        };
        let Some((next_tenant, next_execution)) = next else {
            return;
        };

        {
            let mut in_flight = match inner.in_flight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *in_flight.entry(next_tenant).or_insert(0) += 1;
        }

        let handle = inner
            .executions
            .read()
            .ok()
            .and_then(|executions| executions.get(&next_execution).cloned());
        let Some(handle) = handle else {
            warn!(%next_execution, "Queued execution vanished before start");
            return;
        };
        let flow_id = handle.with_state(|state| state.flow_id.clone());
        let flow = inner
            .flows
            .read()
            .ok()
            .and_then(|flows| flows.get(&flow_id).cloned());
        let Some(flow) = flow else {
            warn!(%next_execution, "Queued execution's flow vanished");
            return;
        };

        let inner_clone = Arc::clone(inner);
        tokio::spawn(async move {
            runner::run_execution(Arc::clone(&inner_clone), Arc::clone(&handle), flow).await;
            Scheduler::on_terminal(&inner_clone, next_execution, &handle);
        });
    }

    fn handle(&self, execution_id: &ExecutionId) -> Result<Arc<ExecutionHandle>, SchedulerError> {
        self.inner
            .executions
            .read()
            .ok()
            .and_then(|executions| executions.get(execution_id).cloned())
            .ok_or(SchedulerError::ExecutionNotFound(*execution_id))
    }

    fn emit_lifecycle(&self, event_type: &str, execution_id: &ExecutionId, error: Option<&str>) {
        let mut payload = Value::from([(
            "execution_id",
            Value::from(execution_id.to_string()),
        )]);
        if let Some(error) = error {
            payload.merge(Value::from([("error", Value::from(error))]));
        }
        self.inner
            .bus
            .emit_best_effort(event_type, &self.inner.actor, payload);
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, WeightedFairQueue<ExecutionId>> {
        match self.inner.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<TenantId, usize>> {
        match self.inner.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Builds the checkpoint snapshot for a state. Used by the owner loop
/// after every step transition.
pub(crate) fn snapshot_of(state: &ExecutionState) -> ExecutionSnapshot {
    ExecutionSnapshot {
        flow: state.flow_id.to_string(),
        tenant: state.trigger.tenant.to_string(),
        identity: state.trigger.identity.to_string(),
        status: state.status.as_str().to_string(),
        variables: state.variables.clone(),
        completed: state.completed.clone(),
        failed: state.failed.clone(),
        next_step: state.current_step.clone(),
    }
}

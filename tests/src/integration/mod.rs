//! # Integration Harness
//!
//! One fixture wires the real subsystems together — bus, cache,
//! admission, registry, checkpoints, scheduler — around a scripted
//! worker double, so scenarios drive the same choreography a live node
//! runs.

pub mod end_to_end;
pub mod gating;
pub mod recovery;

use async_trait::async_trait;
use fm_03_admission::{AdmissionConfig, AdmissionController, BreakerConfig};
use fm_04_flow_model::{parse_flow, Flow};
use fm_05_scheduler::{
    DispatchError, Scheduler, SchedulerConfig, StepExecutor, StepInvocation, StepOutcome,
};
use fm_06_checkpoint::{CheckpointStore, InMemoryContentStore, RecoveryConfig};
use fm_07_node_registry::{NodeRegistry, RegistryConfig};
use shared_bus::{core_schemas, EventBus, PayloadSchema};
use shared_crypto::HmacSigner;
use shared_types::{Clock, NodeId, PolicyVersion, SystemClock, TenantId, Value};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One scripted worker reply.
pub enum Reply {
    /// Reply with an outcome after a tiny delay.
    Outcome(Result<StepOutcome, DispatchError>),
    /// Never reply; the scheduler's deadline or an abort must resolve it.
    Hang,
}

/// Scripted worker pool double. Records each dispatch with its instant
/// so scenarios can assert retry backoff shapes.
pub struct ScriptedWorker {
    script: Mutex<HashMap<String, VecDeque<Reply>>>,
    dispatch_log: Mutex<Vec<(String, String, Instant)>>,
}

impl ScriptedWorker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(HashMap::new()),
            dispatch_log: Mutex::new(Vec::new()),
        })
    }

    pub fn script(&self, step: &str, replies: Vec<Reply>) {
        self.script
            .lock()
            .unwrap()
            .insert(step.to_string(), replies.into());
    }

    pub fn dispatches_of(&self, step: &str) -> Vec<Instant> {
        self.dispatch_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _, _)| s == step)
            .map(|(_, _, at)| *at)
            .collect()
    }

    pub fn dispatch_count(&self, step: &str) -> usize {
        self.dispatches_of(step).len()
    }
}

#[async_trait]
impl StepExecutor for ScriptedWorker {
    async fn execute(
        &self,
        node: &NodeId,
        invocation: StepInvocation,
    ) -> Result<StepOutcome, DispatchError> {
        self.dispatch_log.lock().unwrap().push((
            invocation.step_id.to_string(),
            node.to_string(),
            Instant::now(),
        ));
        let reply = self
            .script
            .lock()
            .unwrap()
            .get_mut(invocation.step_id.as_str())
            .and_then(VecDeque::pop_front);
        match reply {
            None => Ok(StepOutcome::Success {
                output: Value::empty_map(),
            }),
            Some(Reply::Outcome(outcome)) => {
                tokio::time::sleep(Duration::from_millis(1)).await;
                outcome
            }
            Some(Reply::Hang) => {
                // Far beyond any test deadline.
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(StepOutcome::Success {
                    output: Value::empty_map(),
                })
            }
        }
    }

    async fn cancel(&self, _node: &NodeId, _execution_id: shared_types::ExecutionId, _step_id: shared_types::StepId) {}
}

/// The wired fixture.
pub struct Harness {
    pub bus: Arc<EventBus>,
    pub admission: Arc<AdmissionController>,
    pub registry: Arc<NodeRegistry>,
    pub checkpoints: Arc<CheckpointStore>,
    pub content: Arc<InMemoryContentStore>,
    pub scheduler: Scheduler,
    pub worker: Arc<ScriptedWorker>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_configs(AdmissionConfig::default(), SchedulerConfig::default())
    }

    pub fn with_configs(admission: AdmissionConfig, scheduler: SchedulerConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let mut schemas = core_schemas();
        // Test-only event used by event-trigger scenarios.
        schemas.register("external.ping", 1, PayloadSchema::new());
        let bus = Arc::new(EventBus::new(schemas));

        let admission = Arc::new(AdmissionController::new(
            admission,
            BreakerConfig::default(),
            Arc::clone(&clock),
            Arc::clone(&bus),
        ));
        let registry = Arc::new(NodeRegistry::new(
            RegistryConfig::default(),
            Arc::clone(&clock),
            Arc::clone(&bus),
        ));
        let content = Arc::new(InMemoryContentStore::new());
        let checkpoints = Arc::new(CheckpointStore::new(
            content.clone(),
            Arc::new(HmacSigner::new(b"fm-tests-key".to_vec(), "fm-tests")),
            Arc::clone(&clock),
            Arc::clone(&bus),
            RecoveryConfig::default(),
        ));
        let worker = ScriptedWorker::new();
        let scheduler = Scheduler::new(
            scheduler,
            clock,
            Arc::clone(&bus),
            worker.clone(),
            Arc::clone(&registry),
            Arc::clone(&checkpoints),
            PolicyVersion(1),
        )
        .with_admission(Arc::clone(&admission));

        Self {
            bus,
            admission,
            registry,
            checkpoints,
            content,
            scheduler,
            worker,
        }
    }

    /// Registers a worker node advertising the given actions for tenant
    /// `acme`.
    pub fn join_node(&self, node: &str, actions: &[&str]) {
        let caps: BTreeSet<String> = actions.iter().map(|s| s.to_string()).collect();
        self.registry
            .join(NodeId::from(node), TenantId::from("acme"), caps);
    }

    /// Parses a flow document and registers it.
    pub fn register_flow(&self, document: &str) -> Flow {
        let outcome = parse_flow(document);
        assert!(outcome.errors.is_empty(), "flow invalid: {:?}", outcome.errors);
        let flow = outcome.flow.unwrap();
        self.scheduler.register_flow(flow.clone());
        flow
    }
}

/// Polls an execution until terminal (up to ~5 s).
pub async fn await_terminal(
    scheduler: &Scheduler,
    id: &shared_types::ExecutionId,
) -> fm_05_scheduler::ExecutionStatus {
    for _ in 0..1000 {
        let status = scheduler.status(id).unwrap();
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("execution never reached a terminal state");
}

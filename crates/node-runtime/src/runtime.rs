//! # Runtime Wiring
//!
//! Builds every subsystem from one configuration document and threads
//! the handles through explicitly. Two validation pipelines share the
//! signed cache: the full trigger pipeline (signature → consent →
//! metadata → security) for ingress, and a step pipeline (security only)
//! the scheduler consults per dispatch — step inputs carry no caller
//! signature, so the transport layers would reject them.

use crate::config::RuntimeConfig;
use crate::deprecation::DeprecationRegistry;
use async_trait::async_trait;
use fm_01_validation_cache::ValidationCache;
use fm_02_validation_pipeline::{
    CallerKeyProvider, ConsentLayer, ConsentStore, MetadataLayer, PipelineConfig, SecurityLayer,
    SecurityLayerConfig, SignatureLayer, ValidationPipeline,
};
use fm_03_admission::AdmissionController;
use fm_05_scheduler::{Scheduler, StepExecutor, StepInvocation, StepOutcome};
use fm_06_checkpoint::{CheckpointStore, ContentStore, InMemoryContentStore};
use fm_07_node_registry::NodeRegistry;
use shared_bus::{core_schemas, EventBus};
use shared_crypto::{HmacSigner, Signer};
use shared_types::{Clock, ExecutionId, Identity, NodeId, PolicyVersion, StepId, SystemClock};
use std::sync::Arc;
use tracing::info;

/// External collaborators the core does not own: the worker transport,
/// the consent service, caller key material, and the content store.
pub struct Collaborators {
    /// Worker pool transport.
    pub executor: Arc<dyn StepExecutor>,
    /// Consent service adapter.
    pub consent: Arc<dyn ConsentStore>,
    /// Caller signing secrets.
    pub caller_keys: Arc<dyn CallerKeyProvider>,
    /// Content-addressed store adapter.
    pub content_store: Arc<dyn ContentStore>,
}

/// A fully wired node.
pub struct FlowMeshRuntime {
    /// The event log.
    pub bus: Arc<EventBus>,
    /// The signed validation cache.
    pub cache: Arc<ValidationCache>,
    /// The full trigger pipeline, for ingress adapters.
    pub trigger_pipeline: Arc<ValidationPipeline>,
    /// The admission controller.
    pub admission: Arc<AdmissionController>,
    /// The node/tenant registry.
    pub registry: Arc<NodeRegistry>,
    /// The checkpoint store.
    pub checkpoints: Arc<CheckpointStore>,
    /// The execution scheduler.
    pub scheduler: Scheduler,
    /// Deprecated-operation registry for ingress adapters.
    pub deprecations: DeprecationRegistry,

    sweeper: tokio::task::JoinHandle<()>,
}

impl FlowMeshRuntime {
    /// Initializes every subsystem from the configuration and wires
    /// them together.
    #[must_use]
    pub fn init(config: RuntimeConfig, collaborators: Collaborators) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let bus = Arc::new(EventBus::new(core_schemas()));
        let policy_version = PolicyVersion(config.policy_version);

        let signing_key = if config.signing_key.is_empty() {
            b"flowmesh-dev-key".to_vec()
        } else {
            config.signing_key.clone().into_bytes()
        };
        let signer: Arc<dyn Signer> = Arc::new(HmacSigner::new(
            signing_key,
            config.cache.signing_key_id.clone(),
        ));

        let cache = Arc::new(ValidationCache::new(
            config.cache.clone(),
            Arc::clone(&signer),
            Arc::clone(&clock),
            Arc::clone(&bus),
        ));
        let sweeper = cache.spawn_sweeper();

        let trigger_pipeline = Arc::new(
            ValidationPipeline::new(
                config.pipeline.clone(),
                Arc::clone(&cache),
                Arc::clone(&bus),
                Arc::clone(&clock),
            )
            .with_layer(Arc::new(SignatureLayer::new(
                Arc::clone(&collaborators.caller_keys),
                Arc::clone(&clock),
            )))
            .with_layer(Arc::new(ConsentLayer::new(Arc::clone(
                &collaborators.consent,
            ))))
            .with_layer(Arc::new(MetadataLayer::new()))
            .with_layer(Arc::new(SecurityLayer::new(
                SecurityLayerConfig::default(),
                Arc::clone(&clock),
            ))),
        );

        // Step inputs are internal: no transport signature, no consent
        // token. Only the security layer applies.
        let step_pipeline_config = PipelineConfig {
            layers: vec!["security".to_string()],
            ..config.pipeline.clone()
        };
        let step_pipeline = Arc::new(
            ValidationPipeline::new(
                step_pipeline_config,
                Arc::clone(&cache),
                Arc::clone(&bus),
                Arc::clone(&clock),
            )
            .with_layer(Arc::new(SecurityLayer::new(
                SecurityLayerConfig::default(),
                Arc::clone(&clock),
            ))),
        );

        let admission = Arc::new(AdmissionController::new(
            config.admission.clone(),
            config.breaker.clone(),
            Arc::clone(&clock),
            Arc::clone(&bus),
        ));

        let registry = Arc::new(NodeRegistry::new(
            config.registry.clone(),
            Arc::clone(&clock),
            Arc::clone(&bus),
        ));

        let checkpoints = Arc::new(CheckpointStore::new(
            Arc::clone(&collaborators.content_store),
            Arc::clone(&signer),
            Arc::clone(&clock),
            Arc::clone(&bus),
            config.recovery.clone(),
        ));

        let scheduler = Scheduler::new(
            config.scheduler.clone(),
            Arc::clone(&clock),
            Arc::clone(&bus),
            Arc::clone(&collaborators.executor),
            Arc::clone(&registry),
            Arc::clone(&checkpoints),
            policy_version,
        )
        .with_admission(Arc::clone(&admission))
        .with_pipeline(step_pipeline);

        info!(policy_version = config.policy_version, "FlowMesh runtime initialized");

        Self {
            bus,
            cache,
            trigger_pipeline,
            admission,
            registry,
            checkpoints,
            scheduler,
            deprecations: DeprecationRegistry::new(),
            sweeper,
        }
    }

    /// Stops background tasks. Executions already in flight run to their
    /// next checkpoint and are recovered on restart.
    pub fn shutdown(self) {
        self.sweeper.abort();
        info!("FlowMesh runtime shut down");
    }
}

// =============================================================================
// SINGLE-NODE COLLABORATOR STUBS
// =============================================================================

/// Loopback worker transport: runs every step on this node by echoing
/// its parameters as output. Stands in for the network adapter in
/// single-node operation and demos; real deployments plug the worker
/// pool transport here.
#[derive(Debug, Default)]
pub struct LoopbackExecutor;

#[async_trait]
impl StepExecutor for LoopbackExecutor {
    async fn execute(
        &self,
        _node: &NodeId,
        invocation: StepInvocation,
    ) -> Result<StepOutcome, fm_05_scheduler::DispatchError> {
        Ok(StepOutcome::Success {
            output: invocation.params,
        })
    }

    async fn cancel(&self, _node: &NodeId, _execution_id: ExecutionId, _step_id: StepId) {}
}

/// Consent stub that grants everything. For single-node development
/// only; production wires the consent service adapter, which
/// default-denies.
#[derive(Debug, Default)]
pub struct OpenConsentStore;

#[async_trait]
impl ConsentStore for OpenConsentStore {
    async fn has_consent(
        &self,
        _identity: &Identity,
        _resource: &str,
        _permission: &str,
    ) -> Result<bool, fm_02_validation_pipeline::ports::PortError> {
        Ok(true)
    }
}

/// Default collaborators for single-node operation.
#[must_use]
pub fn local_collaborators(caller_keys: Arc<dyn CallerKeyProvider>) -> Collaborators {
    Collaborators {
        executor: Arc::new(LoopbackExecutor),
        consent: Arc::new(OpenConsentStore),
        caller_keys,
        content_store: Arc::new(InMemoryContentStore::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fm_02_validation_pipeline::StaticKeyProvider;
    use fm_04_flow_model::parse_flow;
    use fm_05_scheduler::ExecutionStatus;
    use shared_types::{FlowId, TenantId, TriggerContext, Value};
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn runtime() -> FlowMeshRuntime {
        FlowMeshRuntime::init(
            RuntimeConfig::default(),
            local_collaborators(Arc::new(StaticKeyProvider::new())),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_end_to_end_two_step_flow() {
        let runtime = runtime();

        // A worker node advertising both actions.
        let caps: BTreeSet<String> = ["echo".to_string(), "add".to_string()].into();
        runtime
            .registry
            .join(NodeId::from("local"), TenantId::from("acme"), caps);

        let flow = parse_flow(
            r#"{
            "format": "flowmesh.flow/v1",
            "id": "f-demo", "name": "demo", "version": "1.0.0", "owner": "alice",
            "steps": [
                {"id": "A", "kind": "task", "action": "echo",
                 "params": {"x": 1}, "on_success": "B"},
                {"id": "B", "kind": "task", "action": "add", "params": {"y": 3}}
            ]
        }"#,
        )
        .flow
        .unwrap();
        runtime.scheduler.register_flow(flow);

        let id = runtime
            .scheduler
            .start(&FlowId::from("f-demo"), TriggerContext::manual("alice", "acme"))
            .unwrap();

        let mut status = ExecutionStatus::Pending;
        for _ in 0..200 {
            status = runtime.scheduler.status(&id).unwrap();
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(status, ExecutionStatus::Completed);

        let state = runtime.scheduler.execution(&id).unwrap();
        // Loopback echoes params into variables.
        assert_eq!(state.variables.get_path("x"), Some(&Value::Int(1)));
        assert_eq!(state.variables.get_path("y"), Some(&Value::Int(3)));

        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_admission_gates_triggers() {
        let config = RuntimeConfig {
            admission: fm_03_admission::AdmissionConfig {
                per_tenant_limit: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let runtime = FlowMeshRuntime::init(
            config,
            local_collaborators(Arc::new(StaticKeyProvider::new())),
        );
        let flow = parse_flow(
            r#"{
            "format": "flowmesh.flow/v1",
            "id": "f", "name": "n", "version": "1.0.0", "owner": "o",
            "steps": [{"id": "A", "kind": "task", "action": "echo"}]
        }"#,
        )
        .flow
        .unwrap();
        runtime.scheduler.register_flow(flow);

        let first = runtime
            .scheduler
            .start(&FlowId::from("f"), TriggerContext::manual("alice", "acme"));
        assert!(first.is_ok());
        let second = runtime
            .scheduler
            .start(&FlowId::from("f"), TriggerContext::manual("alice", "acme"));
        assert!(second.is_err());
        runtime.shutdown();
    }
}

//! # Flow and Step Types
//!
//! The typed model of a published flow: a node list plus id-typed edges.
//! Immutable by construction; `with_*` methods produce new flows.

use crate::predicate::Predicate;
use crate::version::Version;
use shared_types::{FlowId, Identity, StepId, SubnetId, Value};
use std::collections::BTreeSet;
use std::time::Duration;

/// Minimum step timeout.
pub const MIN_STEP_TIMEOUT_MS: u64 = 1_000;

/// Maximum step timeout.
pub const MAX_STEP_TIMEOUT_MS: u64 = 60 * 60 * 1000;

/// Who may discover and trigger a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Anyone on the network.
    Public,
    /// Identities within the owning tenant.
    TenantOnly,
    /// Owner and explicit delegates only.
    #[default]
    Private,
}

impl Visibility {
    /// Stable document tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::TenantOnly => "tenant_only",
            Visibility::Private => "private",
        }
    }

    /// Parses a document tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "public" => Some(Visibility::Public),
            "tenant_only" => Some(Visibility::TenantOnly),
            "private" => Some(Visibility::Private),
            _ => None,
        }
    }
}

/// The kind of work a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Dispatch the action to a worker node.
    Task,
    /// Evaluate a predicate locally and branch.
    Condition,
    /// Dispatch an enumerated set of child steps concurrently.
    Parallel,
    /// Suspend until a named event arrives (or a deadline passes).
    EventTrigger,
    /// Dispatch a call into another module/flow.
    ModuleCall,
}

impl StepKind {
    /// Stable document tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Task => "task",
            StepKind::Condition => "condition",
            StepKind::Parallel => "parallel",
            StepKind::EventTrigger => "event_trigger",
            StepKind::ModuleCall => "module_call",
        }
    }

    /// Parses a document tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "task" => Some(StepKind::Task),
            "condition" => Some(StepKind::Condition),
            "parallel" => Some(StepKind::Parallel),
            "event_trigger" => Some(StepKind::EventTrigger),
            "module_call" => Some(StepKind::ModuleCall),
            _ => None,
        }
    }

    /// Whether the step is executed by dispatching to a worker node.
    #[must_use]
    pub fn dispatches(&self) -> bool {
        matches!(self, StepKind::Task | StepKind::ModuleCall)
    }
}

/// Backoff shape between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// `initial * (1 + attempt)`
    Linear,
    /// `initial * multiplier^attempt`, capped at `max_delay`.
    Exponential,
    /// `initial`, always.
    Fixed,
}

impl BackoffKind {
    /// Stable document tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BackoffKind::Linear => "linear",
            BackoffKind::Exponential => "exponential",
            BackoffKind::Fixed => "fixed",
        }
    }

    /// Parses a document tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "linear" => Some(BackoffKind::Linear),
            "exponential" => Some(BackoffKind::Exponential),
            "fixed" => Some(BackoffKind::Fixed),
            _ => None,
        }
    }
}

/// Retry policy for a step.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first (>= 1).
    pub max_attempts: u32,
    /// Backoff shape.
    pub backoff: BackoffKind,
    /// First delay.
    pub initial_delay_ms: u64,
    /// Delay ceiling.
    pub max_delay_ms: u64,
    /// Exponential multiplier.
    pub multiplier: f64,
    /// Error kinds that may be retried. Empty = every retryable-flagged
    /// failure.
    pub retryable_errors: BTreeSet<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Exponential,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            retryable_errors: BTreeSet::new(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based: the delay after
    /// the first failure is `delay_for_attempt(0)`).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = match self.backoff {
            BackoffKind::Linear => self.initial_delay_ms.saturating_mul(1 + attempt as u64),
            BackoffKind::Exponential => {
                let factor = self.multiplier.max(1.0).powi(attempt as i32);
                ((self.initial_delay_ms as f64) * factor) as u64
            }
            BackoffKind::Fixed => self.initial_delay_ms,
        };
        Duration::from_millis(ms.min(self.max_delay_ms))
    }

    /// Whether a failure of `kind` is retryable under this policy.
    #[must_use]
    pub fn retries_kind(&self, kind: &str) -> bool {
        self.retryable_errors.is_empty() || self.retryable_errors.contains(kind)
    }
}

/// Sandboxing limits a worker enforces while running the step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceLimits {
    /// Memory ceiling.
    pub memory_bytes: Option<u64>,
    /// Wall-clock ceiling, independent of the dispatch deadline.
    pub wall_time_ms: Option<u64>,
    /// CPU fraction in `(0, 1]`.
    pub cpu_fraction: Option<f64>,
    /// Outbound network call budget.
    pub max_network_calls: Option<u32>,
}

/// One node in a flow.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Identifier, unique within the flow.
    pub id: StepId,
    /// What kind of work this is.
    pub kind: StepKind,
    /// Opaque action name the worker resolves.
    pub action: String,
    /// Action parameters.
    pub params: Value,
    /// Next step on success; `None` ends the execution.
    pub on_success: Option<StepId>,
    /// Next step on (exhausted) failure; `None` fails the execution.
    pub on_failure: Option<StepId>,
    /// Dispatch timeout.
    pub timeout_ms: Option<u64>,
    /// Retry policy.
    pub retry: Option<RetryPolicy>,
    /// Worker-side resource limits.
    pub limits: Option<ResourceLimits>,
    /// Child steps of a `parallel` step.
    pub branches: Vec<StepId>,
    /// Predicate of a `condition` step.
    pub predicate: Option<Predicate>,
    /// Event name a `event_trigger` step waits for.
    pub wait_event: Option<String>,
    /// Whether a `parallel` step tolerates failed branches.
    pub allow_partial: bool,
}

impl Step {
    /// A task step with an action; the usual case.
    #[must_use]
    pub fn task(id: impl Into<StepId>, action: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            kind: StepKind::Task,
            action: action.into(),
            params,
            on_success: None,
            on_failure: None,
            timeout_ms: None,
            retry: None,
            limits: None,
            branches: Vec::new(),
            predicate: None,
            wait_event: None,
            allow_partial: false,
        }
    }

    /// A condition step over a predicate.
    #[must_use]
    pub fn condition(id: impl Into<StepId>, predicate: Predicate) -> Self {
        Self {
            predicate: Some(predicate),
            kind: StepKind::Condition,
            ..Self::task(id, "", Value::empty_map())
        }
    }

    /// A parallel step over child branches.
    #[must_use]
    pub fn parallel(id: impl Into<StepId>, branches: Vec<StepId>) -> Self {
        Self {
            branches,
            kind: StepKind::Parallel,
            ..Self::task(id, "", Value::empty_map())
        }
    }

    /// An event-trigger step waiting for a named event.
    #[must_use]
    pub fn event_trigger(id: impl Into<StepId>, event: impl Into<String>) -> Self {
        Self {
            wait_event: Some(event.into()),
            kind: StepKind::EventTrigger,
            ..Self::task(id, "", Value::empty_map())
        }
    }

    /// Sets the success target.
    #[must_use]
    pub fn then(mut self, target: impl Into<StepId>) -> Self {
        self.on_success = Some(target.into());
        self
    }

    /// Sets the failure target.
    #[must_use]
    pub fn or_else(mut self, target: impl Into<StepId>) -> Self {
        self.on_failure = Some(target.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Every step id this step can transition to.
    #[must_use]
    pub fn successors(&self) -> Vec<&StepId> {
        let mut out: Vec<&StepId> = Vec::new();
        out.extend(self.on_success.iter());
        out.extend(self.on_failure.iter());
        out.extend(self.branches.iter());
        out
    }
}

/// Discovery and authorization metadata for a flow.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlowMetadata {
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Optional category.
    pub category: Option<String>,
    /// Who may see and trigger the flow.
    pub visibility: Visibility,
    /// Permissions a trigger must hold.
    pub required_permissions: Vec<String>,
    /// Optional tenant subnet scoping execution.
    pub subnet: Option<SubnetId>,
}

/// A published flow. Immutable once published.
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    /// Stable identifier.
    pub id: FlowId,
    /// Human name.
    pub name: String,
    /// Semantic version.
    pub version: Version,
    /// Owning external identity.
    pub owner: Identity,
    /// Steps in definition order; the first is the entry step.
    pub steps: Vec<Step>,
    /// Discovery and authorization metadata.
    pub metadata: FlowMetadata,
    /// Optional policy handle.
    pub policy: Option<String>,
}

impl Flow {
    /// Looks a step up by id.
    #[must_use]
    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|step| &step.id == id)
    }

    /// The entry step: first in definition order.
    #[must_use]
    pub fn entry_step(&self) -> Option<&Step> {
        self.steps.first()
    }

    /// A new flow with a bumped version and replaced steps. The original
    /// is untouched; published flows are immutable.
    #[must_use]
    pub fn with_steps(&self, version: Version, steps: Vec<Step>) -> Self {
        Self {
            version,
            steps,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_schedule_linear() {
        let policy = RetryPolicy {
            backoff: BackoffKind::Linear,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(300));
    }

    #[test]
    fn test_retry_schedule_exponential_capped() {
        let policy = RetryPolicy {
            backoff: BackoffKind::Exponential,
            initial_delay_ms: 100,
            max_delay_ms: 350,
            multiplier: 2.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        // 400 capped to 350.
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
    }

    #[test]
    fn test_retry_schedule_fixed() {
        let policy = RetryPolicy {
            backoff: BackoffKind::Fixed,
            initial_delay_ms: 250,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(250));
    }

    #[test]
    fn test_retryable_kinds() {
        let mut policy = RetryPolicy::default();
        assert!(policy.retries_kind("anything"));
        policy.retryable_errors.insert("timeout".to_string());
        assert!(policy.retries_kind("timeout"));
        assert!(!policy.retries_kind("invariant"));
    }

    #[test]
    fn test_successors() {
        let step = Step::task("a", "echo", Value::empty_map())
            .then("b")
            .or_else("c");
        let successors: Vec<_> = step.successors().iter().map(|s| s.as_str()).collect();
        assert_eq!(successors, vec!["b", "c"]);
    }

    #[test]
    fn test_entry_step_is_first() {
        let flow = Flow {
            id: FlowId::from("f"),
            name: "demo".into(),
            version: Version::new(1, 0, 0),
            owner: Identity::from("alice"),
            steps: vec![
                Step::task("first", "echo", Value::empty_map()),
                Step::task("second", "echo", Value::empty_map()),
            ],
            metadata: FlowMetadata::default(),
            policy: None,
        };
        assert_eq!(flow.entry_step().unwrap().id.as_str(), "first");
        assert!(flow.step(&StepId::from("second")).is_some());
        assert!(flow.step(&StepId::from("ghost")).is_none());
    }
}

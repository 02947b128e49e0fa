//! # Structural Validation
//!
//! Enforces the flow invariants after parsing: identifier uniqueness,
//! target existence, acyclicity (three-color DFS over the
//! `on_success ∪ on_failure ∪ branches` successor relation), timeout
//! ranges, and retry-policy coherence. Unreachable steps are warnings;
//! a referenced-but-absent step is an error.

use crate::model::{Flow, StepKind, MAX_STEP_TIMEOUT_MS, MIN_STEP_TIMEOUT_MS};
use crate::parse::ParseIssue;
use shared_types::StepId;
use std::collections::{HashMap, HashSet};

/// Validates a flow's structure. Returns `(errors, warnings)`.
#[must_use]
pub fn validate_flow(flow: &Flow) -> (Vec<ParseIssue>, Vec<ParseIssue>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if flow.steps.is_empty() {
        errors.push(ParseIssue::new("steps", "a flow needs at least one step"));
        return (errors, warnings);
    }

    // Identifier uniqueness.
    let mut seen: HashSet<&StepId> = HashSet::new();
    for step in &flow.steps {
        if !seen.insert(&step.id) {
            errors.push(ParseIssue::new(
                format!("steps.{}", step.id),
                "duplicate step id",
            ));
        }
    }

    let by_id: HashMap<&StepId, &crate::model::Step> =
        flow.steps.iter().map(|step| (&step.id, step)).collect();

    // Target existence and per-kind coherence.
    for step in &flow.steps {
        let at = |field: &str| format!("steps.{}.{}", step.id, field);

        for target in step.successors() {
            if !by_id.contains_key(target) {
                errors.push(ParseIssue::new(
                    at("targets"),
                    format!("transition target `{target}` does not exist"),
                ));
            }
        }

        if let Some(timeout) = step.timeout_ms {
            if !(MIN_STEP_TIMEOUT_MS..=MAX_STEP_TIMEOUT_MS).contains(&timeout) {
                errors.push(ParseIssue::new(
                    at("timeout_ms"),
                    format!(
                        "timeout must be within {MIN_STEP_TIMEOUT_MS}..={MAX_STEP_TIMEOUT_MS} ms"
                    ),
                ));
            }
        }

        if let Some(retry) = &step.retry {
            if retry.max_attempts < 1 {
                errors.push(ParseIssue::new(at("retry.max_attempts"), "must be >= 1"));
            }
            if retry.initial_delay_ms > retry.max_delay_ms {
                errors.push(ParseIssue::new(
                    at("retry"),
                    "initial_delay_ms exceeds max_delay_ms",
                ));
            }
        }

        match step.kind {
            StepKind::Condition if step.predicate.is_none() => {
                errors.push(ParseIssue::new(at("predicate"), "condition step needs one"));
            }
            StepKind::Parallel if step.branches.is_empty() => {
                errors.push(ParseIssue::new(at("branches"), "parallel step needs some"));
            }
            StepKind::EventTrigger if step.wait_event.is_none() => {
                errors.push(ParseIssue::new(
                    at("wait_event"),
                    "event-trigger step needs one",
                ));
            }
            StepKind::Task | StepKind::ModuleCall if step.action.is_empty() => {
                errors.push(ParseIssue::new(at("action"), "dispatching step needs one"));
            }
            _ => {}
        }
    }

    // Cycle check only makes sense over an id-consistent graph.
    if errors.is_empty() {
        if let Some(cycle_member) = find_cycle(flow) {
            errors.push(ParseIssue::new(
                format!("steps.{cycle_member}"),
                "step graph contains a cycle through this step",
            ));
        }

        for unreachable in unreachable_steps(flow) {
            warnings.push(ParseIssue::new(
                format!("steps.{unreachable}"),
                "step is unreachable from the entry step",
            ));
        }
    }

    (errors, warnings)
}

/// Three-color DFS. White = unvisited, gray = on the current path,
/// black = fully explored. A gray-to-gray edge is a cycle.
fn find_cycle(flow: &Flow) -> Option<StepId> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut colors: HashMap<&StepId, Color> =
        flow.steps.iter().map(|s| (&s.id, Color::White)).collect();

    fn visit<'a>(
        flow: &'a Flow,
        id: &'a StepId,
        colors: &mut HashMap<&'a StepId, Color>,
    ) -> Option<StepId> {
        colors.insert(id, Color::Gray);
        if let Some(step) = flow.step(id) {
            for next in step.successors() {
                match colors.get(next) {
                    Some(Color::Gray) => return Some(next.clone()),
                    Some(Color::White) => {
                        if let Some(cycle) = visit(flow, next, colors) {
                            return Some(cycle);
                        }
                    }
                    _ => {}
                }
            }
        }
        colors.insert(id, Color::Black);
        None
    }

    let ids: Vec<&StepId> = flow.steps.iter().map(|s| &s.id).collect();
    for id in ids {
        if colors.get(id) == Some(&Color::White) {
            if let Some(cycle) = visit(flow, id, &mut colors) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Steps not reachable from the entry step by any transition.
fn unreachable_steps(flow: &Flow) -> Vec<StepId> {
    let Some(entry) = flow.entry_step() else {
        return Vec::new();
    };

    let mut reached: HashSet<&StepId> = HashSet::new();
    let mut stack = vec![&entry.id];
    while let Some(id) = stack.pop() {
        if !reached.insert(id) {
            continue;
        }
        if let Some(step) = flow.step(id) {
            stack.extend(step.successors());
        }
    }

    flow.steps
        .iter()
        .filter(|step| !reached.contains(&step.id))
        .map(|step| step.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FlowMetadata, RetryPolicy, Step};
    use crate::predicate::Predicate;
    use crate::version::Version;
    use shared_types::{FlowId, Identity, Value};

    fn flow_of(steps: Vec<Step>) -> Flow {
        Flow {
            id: FlowId::from("f"),
            name: "test".into(),
            version: Version::new(1, 0, 0),
            owner: Identity::from("alice"),
            steps,
            metadata: FlowMetadata::default(),
            policy: None,
        }
    }

    #[test]
    fn test_valid_chain() {
        let flow = flow_of(vec![
            Step::task("a", "echo", Value::empty_map()).then("b"),
            Step::task("b", "echo", Value::empty_map()),
        ]);
        let (errors, warnings) = validate_flow(&flow);
        assert!(errors.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_empty_flow_rejected() {
        let (errors, _) = validate_flow(&flow_of(vec![]));
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let flow = flow_of(vec![
            Step::task("a", "echo", Value::empty_map()),
            Step::task("a", "echo", Value::empty_map()),
        ]);
        let (errors, _) = validate_flow(&flow);
        assert!(errors.iter().any(|e| e.message.contains("duplicate")));
    }

    #[test]
    fn test_missing_target_rejected() {
        let flow = flow_of(vec![Step::task("a", "echo", Value::empty_map()).then("ghost")]);
        let (errors, _) = validate_flow(&flow);
        assert!(errors.iter().any(|e| e.message.contains("ghost")));
    }

    #[test]
    fn test_cycle_rejected() {
        let flow = flow_of(vec![
            Step::task("a", "echo", Value::empty_map()).then("b"),
            Step::task("b", "echo", Value::empty_map()).then("c"),
            Step::task("c", "echo", Value::empty_map()).then("a"),
        ]);
        let (errors, _) = validate_flow(&flow);
        assert!(errors.iter().any(|e| e.message.contains("cycle")));
    }

    #[test]
    fn test_self_loop_rejected() {
        let flow = flow_of(vec![Step::task("a", "echo", Value::empty_map()).then("a")]);
        let (errors, _) = validate_flow(&flow);
        assert!(errors.iter().any(|e| e.message.contains("cycle")));
    }

    #[test]
    fn test_on_failure_edge_participates_in_cycle_check() {
        let flow = flow_of(vec![
            Step::task("a", "echo", Value::empty_map()).then("b"),
            Step::task("b", "echo", Value::empty_map()).or_else("a"),
        ]);
        let (errors, _) = validate_flow(&flow);
        assert!(errors.iter().any(|e| e.message.contains("cycle")));
    }

    #[test]
    fn test_unreachable_is_warning_not_error() {
        let flow = flow_of(vec![
            Step::task("a", "echo", Value::empty_map()),
            Step::task("island", "echo", Value::empty_map()),
        ]);
        let (errors, warnings) = validate_flow(&flow);
        assert!(errors.is_empty());
        assert!(warnings.iter().any(|w| w.path.contains("island")));
    }

    #[test]
    fn test_timeout_bounds() {
        let flow = flow_of(vec![
            Step::task("a", "echo", Value::empty_map()).with_timeout_ms(500)
        ]);
        let (errors, _) = validate_flow(&flow);
        assert!(errors.iter().any(|e| e.path.contains("timeout_ms")));

        let flow = flow_of(vec![Step::task("a", "echo", Value::empty_map())
            .with_timeout_ms(MAX_STEP_TIMEOUT_MS + 1)]);
        let (errors, _) = validate_flow(&flow);
        assert!(errors.iter().any(|e| e.path.contains("timeout_ms")));
    }

    #[test]
    fn test_retry_coherence() {
        let bad_retry = RetryPolicy {
            initial_delay_ms: 5_000,
            max_delay_ms: 1_000,
            ..RetryPolicy::default()
        };
        let flow = flow_of(vec![
            Step::task("a", "echo", Value::empty_map()).with_retry(bad_retry)
        ]);
        let (errors, _) = validate_flow(&flow);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("initial_delay_ms")));
    }

    #[test]
    fn test_condition_needs_predicate() {
        let mut step = Step::condition("gate", Predicate::Exists { path: "x".into() });
        step.predicate = None;
        let (errors, _) = validate_flow(&flow_of(vec![step]));
        assert!(errors.iter().any(|e| e.path.contains("predicate")));
    }

    #[test]
    fn test_parallel_branches_checked() {
        let flow = flow_of(vec![
            Step::parallel("fan", vec!["x".into(), "y".into()]),
            Step::task("x", "echo", Value::empty_map()),
            Step::task("y", "echo", Value::empty_map()),
        ]);
        let (errors, _) = validate_flow(&flow);
        assert!(errors.is_empty());

        let flow = flow_of(vec![Step::parallel("fan", vec!["ghost".into()])]);
        let (errors, _) = validate_flow(&flow);
        assert!(errors.iter().any(|e| e.message.contains("ghost")));
    }
}

//! # Flow Document Parser
//!
//! Parses the self-identifying JSON flow document into the typed model
//! and serializes it back. Never panics or throws past this boundary:
//! every problem lands in the outcome's error or warning list with the
//! document path that caused it.

use crate::model::{
    BackoffKind, Flow, FlowMetadata, ResourceLimits, RetryPolicy, Step, StepKind, Visibility,
};
use crate::predicate::{CompareOp, Predicate};
use crate::validate::validate_flow;
use crate::version::Version;
use serde_json::json;
use shared_types::{FlowId, Identity, StepId, SubnetId, Value};
use std::collections::BTreeSet;

/// The document format tag this parser accepts.
pub const FLOW_FORMAT: &str = "flowmesh.flow/v1";

/// One problem found while parsing or validating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    /// Document path (`steps[2].retry.max_attempts`).
    pub path: String,
    /// What went wrong.
    pub message: String,
}

impl ParseIssue {
    /// Builds an issue.
    #[must_use]
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Result of a parse: the flow (only when error-free), plus explicit
/// errors and warnings.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// The parsed flow, present iff `errors` is empty.
    pub flow: Option<Flow>,
    /// Fatal problems.
    pub errors: Vec<ParseIssue>,
    /// Non-fatal observations (e.g. unreachable steps).
    pub warnings: Vec<ParseIssue>,
}

impl ParseOutcome {
    fn error_only(path: &str, message: &str) -> Self {
        Self {
            flow: None,
            errors: vec![ParseIssue::new(path, message)],
            warnings: Vec::new(),
        }
    }
}

/// Parses a flow document.
pub fn parse_flow(document: &str) -> ParseOutcome {
    let json: serde_json::Value = match serde_json::from_str(document) {
        Ok(json) => json,
        Err(e) => return ParseOutcome::error_only("$", &format!("not valid JSON: {e}")),
    };
    let Some(obj) = json.as_object() else {
        return ParseOutcome::error_only("$", "document must be a JSON object");
    };
    match obj.get("format").and_then(|f| f.as_str()) {
        Some(FLOW_FORMAT) => {}
        Some(other) => {
            return ParseOutcome::error_only("format", &format!("unsupported format `{other}`"))
        }
        None => return ParseOutcome::error_only("format", "missing format tag"),
    }

    let mut errors = Vec::new();

    let id = require_str(obj, "id", &mut errors);
    let name = require_str(obj, "name", &mut errors);
    let owner = require_str(obj, "owner", &mut errors);
    let version = require_str(obj, "version", &mut errors).and_then(|raw| {
        raw.parse::<Version>()
            .map_err(|e| errors.push(ParseIssue::new("version", e)))
            .ok()
    });
    let policy = obj
        .get("policy")
        .and_then(|p| p.as_str())
        .map(str::to_string);

    let metadata = obj
        .get("metadata")
        .map(|m| parse_metadata(m, &mut errors))
        .unwrap_or_default();

    let mut steps = Vec::new();
    match obj.get("steps").and_then(|s| s.as_array()) {
        Some(raw_steps) => {
            for (index, raw) in raw_steps.iter().enumerate() {
                if let Some(step) = parse_step(raw, index, &mut errors) {
                    steps.push(step);
                }
            }
        }
        None => errors.push(ParseIssue::new("steps", "missing or not an array")),
    }

    let (Some(id), Some(name), Some(owner), Some(version)) = (id, name, owner, version) else {
        return ParseOutcome {
            flow: None,
            errors,
            warnings: Vec::new(),
        };
    };

    let flow = Flow {
        id: FlowId::from(id),
        name,
        version,
        owner: Identity::from(owner),
        steps,
        metadata,
        policy,
    };

    let (structural_errors, warnings) = validate_flow(&flow);
    errors.extend(structural_errors);

    ParseOutcome {
        flow: errors.is_empty().then_some(flow),
        errors,
        warnings,
    }
}

fn require_str(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    errors: &mut Vec<ParseIssue>,
) -> Option<String> {
    match obj.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Some(s.to_string()),
        _ => {
            errors.push(ParseIssue::new(key, "missing or not a string"));
            None
        }
    }
}

fn parse_metadata(raw: &serde_json::Value, errors: &mut Vec<ParseIssue>) -> FlowMetadata {
    let Some(obj) = raw.as_object() else {
        errors.push(ParseIssue::new("metadata", "must be an object"));
        return FlowMetadata::default();
    };

    let visibility = match obj.get("visibility").and_then(|v| v.as_str()) {
        None => Visibility::default(),
        Some(tag) => Visibility::from_tag(tag).unwrap_or_else(|| {
            errors.push(ParseIssue::new(
                "metadata.visibility",
                format!("unknown visibility `{tag}`"),
            ));
            Visibility::default()
        }),
    };

    FlowMetadata {
        tags: string_list(obj.get("tags")),
        category: obj
            .get("category")
            .and_then(|c| c.as_str())
            .map(str::to_string),
        visibility,
        required_permissions: string_list(obj.get("required_permissions")),
        subnet: obj
            .get("subnet")
            .and_then(|s| s.as_str())
            .map(SubnetId::from),
    }
}

fn string_list(raw: Option<&serde_json::Value>) -> Vec<String> {
    raw.and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_step(
    raw: &serde_json::Value,
    index: usize,
    errors: &mut Vec<ParseIssue>,
) -> Option<Step> {
    let at = |field: &str| format!("steps[{index}].{field}");
    let Some(obj) = raw.as_object() else {
        errors.push(ParseIssue::new(format!("steps[{index}]"), "must be an object"));
        return None;
    };

    let Some(id) = obj.get("id").and_then(|v| v.as_str()).filter(|s| !s.is_empty()) else {
        errors.push(ParseIssue::new(at("id"), "missing or not a string"));
        return None;
    };

    let kind = match obj.get("kind").and_then(|v| v.as_str()) {
        Some(tag) => match StepKind::from_tag(tag) {
            Some(kind) => kind,
            None => {
                errors.push(ParseIssue::new(at("kind"), format!("unknown kind `{tag}`")));
                return None;
            }
        },
        None => StepKind::Task,
    };

    let predicate = obj.get("predicate").and_then(|raw| {
        parse_predicate(raw).or_else(|| {
            errors.push(ParseIssue::new(at("predicate"), "malformed predicate"));
            None
        })
    });

    let retry = obj
        .get("retry")
        .and_then(|raw| parse_retry(raw, &at("retry"), errors));

    let limits = obj.get("limits").map(|raw| ResourceLimits {
        memory_bytes: raw.get("memory_bytes").and_then(|v| v.as_u64()),
        wall_time_ms: raw.get("wall_time_ms").and_then(|v| v.as_u64()),
        cpu_fraction: raw.get("cpu_fraction").and_then(|v| v.as_f64()),
        max_network_calls: raw
            .get("max_network_calls")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32),
    });

    Some(Step {
        id: StepId::from(id),
        kind,
        action: obj
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        params: obj
            .get("params")
            .map(Value::from_json)
            .unwrap_or_else(Value::empty_map),
        on_success: obj
            .get("on_success")
            .and_then(|v| v.as_str())
            .map(StepId::from),
        on_failure: obj
            .get("on_failure")
            .and_then(|v| v.as_str())
            .map(StepId::from),
        timeout_ms: obj.get("timeout_ms").and_then(|v| v.as_u64()),
        retry,
        limits,
        branches: string_list(obj.get("branches"))
            .into_iter()
            .map(StepId::from)
            .collect(),
        predicate,
        wait_event: obj
            .get("wait_event")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        allow_partial: obj
            .get("allow_partial")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    })
}

fn parse_retry(
    raw: &serde_json::Value,
    path: &str,
    errors: &mut Vec<ParseIssue>,
) -> Option<RetryPolicy> {
    let obj = raw.as_object()?;
    let defaults = RetryPolicy::default();

    let backoff = match obj.get("backoff").and_then(|v| v.as_str()) {
        None => defaults.backoff,
        Some(tag) => match BackoffKind::from_tag(tag) {
            Some(backoff) => backoff,
            None => {
                errors.push(ParseIssue::new(
                    format!("{path}.backoff"),
                    format!("unknown backoff `{tag}`"),
                ));
                return None;
            }
        },
    };

    Some(RetryPolicy {
        max_attempts: obj
            .get("max_attempts")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(defaults.max_attempts),
        backoff,
        initial_delay_ms: obj
            .get("initial_delay_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(defaults.initial_delay_ms),
        max_delay_ms: obj
            .get("max_delay_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(defaults.max_delay_ms),
        multiplier: obj
            .get("multiplier")
            .and_then(|v| v.as_f64())
            .unwrap_or(defaults.multiplier),
        retryable_errors: string_list(obj.get("retryable_errors"))
            .into_iter()
            .collect::<BTreeSet<_>>(),
    })
}

fn parse_predicate(raw: &serde_json::Value) -> Option<Predicate> {
    let obj = raw.as_object()?;

    if let Some(children) = obj.get("all").and_then(|v| v.as_array()) {
        let parsed: Option<Vec<_>> = children.iter().map(parse_predicate).collect();
        return Some(Predicate::All(parsed?));
    }
    if let Some(children) = obj.get("any").and_then(|v| v.as_array()) {
        let parsed: Option<Vec<_>> = children.iter().map(parse_predicate).collect();
        return Some(Predicate::Any(parsed?));
    }

    let op = obj.get("op").and_then(|v| v.as_str())?;
    let path = obj.get("path").and_then(|v| v.as_str())?.to_string();
    match op {
        "exists" => Some(Predicate::Exists { path }),
        "contains" => Some(Predicate::Contains {
            path,
            value: Value::from_json(obj.get("value")?),
        }),
        tag => Some(Predicate::Compare {
            path,
            op: CompareOp::from_tag(tag)?,
            value: Value::from_json(obj.get("value")?),
        }),
    }
}

// =============================================================================
// SERIALIZATION
// =============================================================================

/// Serializes a flow back into its document form. `parse(serialize(f))`
/// reproduces `f` for every valid flow.
#[must_use]
pub fn serialize_flow(flow: &Flow) -> String {
    let mut doc = json!({
        "format": FLOW_FORMAT,
        "id": flow.id.as_str(),
        "name": flow.name,
        "version": flow.version.to_string(),
        "owner": flow.owner.as_str(),
        "metadata": serialize_metadata(&flow.metadata),
        "steps": flow.steps.iter().map(serialize_step).collect::<Vec<_>>(),
    });
    if let Some(policy) = &flow.policy {
        doc["policy"] = json!(policy);
    }
    serde_json::to_string_pretty(&doc).unwrap_or_default()
}

fn serialize_metadata(metadata: &FlowMetadata) -> serde_json::Value {
    let mut out = json!({
        "visibility": metadata.visibility.as_str(),
        "tags": metadata.tags,
        "required_permissions": metadata.required_permissions,
    });
    if let Some(category) = &metadata.category {
        out["category"] = json!(category);
    }
    if let Some(subnet) = &metadata.subnet {
        out["subnet"] = json!(subnet.as_str());
    }
    out
}

fn serialize_step(step: &Step) -> serde_json::Value {
    let mut out = json!({
        "id": step.id.as_str(),
        "kind": step.kind.as_str(),
        "action": step.action,
        "params": step.params.to_json(),
    });
    if let Some(target) = &step.on_success {
        out["on_success"] = json!(target.as_str());
    }
    if let Some(target) = &step.on_failure {
        out["on_failure"] = json!(target.as_str());
    }
    if let Some(timeout) = step.timeout_ms {
        out["timeout_ms"] = json!(timeout);
    }
    if let Some(retry) = &step.retry {
        out["retry"] = json!({
            "max_attempts": retry.max_attempts,
            "backoff": retry.backoff.as_str(),
            "initial_delay_ms": retry.initial_delay_ms,
            "max_delay_ms": retry.max_delay_ms,
            "multiplier": retry.multiplier,
            "retryable_errors": retry.retryable_errors.iter().collect::<Vec<_>>(),
        });
    }
    if let Some(limits) = &step.limits {
        let mut raw = json!({});
        if let Some(v) = limits.memory_bytes {
            raw["memory_bytes"] = json!(v);
        }
        if let Some(v) = limits.wall_time_ms {
            raw["wall_time_ms"] = json!(v);
        }
        if let Some(v) = limits.cpu_fraction {
            raw["cpu_fraction"] = json!(v);
        }
        if let Some(v) = limits.max_network_calls {
            raw["max_network_calls"] = json!(v);
        }
        out["limits"] = raw;
    }
    if !step.branches.is_empty() {
        out["branches"] = json!(step
            .branches
            .iter()
            .map(|b| b.as_str())
            .collect::<Vec<_>>());
    }
    if let Some(predicate) = &step.predicate {
        out["predicate"] = serialize_predicate(predicate);
    }
    if let Some(event) = &step.wait_event {
        out["wait_event"] = json!(event);
    }
    if step.allow_partial {
        out["allow_partial"] = json!(true);
    }
    out
}

fn serialize_predicate(predicate: &Predicate) -> serde_json::Value {
    match predicate {
        Predicate::Compare { path, op, value } => json!({
            "op": op.as_str(),
            "path": path,
            "value": value.to_json(),
        }),
        Predicate::Exists { path } => json!({ "op": "exists", "path": path }),
        Predicate::Contains { path, value } => json!({
            "op": "contains",
            "path": path,
            "value": value.to_json(),
        }),
        Predicate::All(children) => json!({
            "all": children.iter().map(serialize_predicate).collect::<Vec<_>>(),
        }),
        Predicate::Any(children) => json!({
            "any": children.iter().map(serialize_predicate).collect::<Vec<_>>(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_STEP_DOC: &str = r#"{
        "format": "flowmesh.flow/v1",
        "id": "f-echo",
        "name": "Echo then add",
        "version": "1.0.0",
        "owner": "did:example:alice",
        "metadata": { "visibility": "tenant_only", "tags": ["demo"] },
        "steps": [
            { "id": "A", "kind": "task", "action": "echo",
              "params": {"x": 1}, "on_success": "B",
              "timeout_ms": 5000,
              "retry": {"max_attempts": 3, "backoff": "exponential",
                        "initial_delay_ms": 100, "max_delay_ms": 1000,
                        "multiplier": 2.0} },
            { "id": "B", "kind": "task", "action": "add", "params": {"y": 2} }
        ]
    }"#;

    #[test]
    fn test_parse_two_step_flow() {
        let outcome = parse_flow(TWO_STEP_DOC);
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        let flow = outcome.flow.unwrap();
        assert_eq!(flow.steps.len(), 2);
        assert_eq!(flow.entry_step().unwrap().id.as_str(), "A");
        assert_eq!(flow.metadata.visibility, Visibility::TenantOnly);

        let a = flow.step(&StepId::from("A")).unwrap();
        assert_eq!(a.on_success.as_ref().unwrap().as_str(), "B");
        assert_eq!(a.timeout_ms, Some(5000));
        assert_eq!(a.retry.as_ref().unwrap().max_attempts, 3);
        assert_eq!(a.params.get_path("x"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_round_trip() {
        let flow = parse_flow(TWO_STEP_DOC).flow.unwrap();
        let serialized = serialize_flow(&flow);
        let reparsed = parse_flow(&serialized);
        assert!(reparsed.errors.is_empty(), "{:?}", reparsed.errors);
        assert_eq!(reparsed.flow.unwrap(), flow);
    }

    #[test]
    fn test_rejects_non_json() {
        let outcome = parse_flow("not json at all");
        assert!(outcome.flow.is_none());
        assert!(!outcome.errors.is_empty());
    }

    #[test]
    fn test_rejects_wrong_format() {
        let outcome = parse_flow(r#"{"format": "other/v9", "id": "f"}"#);
        assert!(outcome.flow.is_none());
        assert_eq!(outcome.errors[0].path, "format");
    }

    #[test]
    fn test_rejects_missing_fields() {
        let outcome = parse_flow(r#"{"format": "flowmesh.flow/v1", "steps": []}"#);
        assert!(outcome.flow.is_none());
        let paths: Vec<_> = outcome.errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"id"));
        assert!(paths.contains(&"name"));
        assert!(paths.contains(&"owner"));
        assert!(paths.contains(&"version"));
    }

    #[test]
    fn test_rejects_bad_version() {
        let doc = r#"{
            "format": "flowmesh.flow/v1", "id": "f", "name": "n",
            "version": "1.oops", "owner": "o",
            "steps": [{"id": "A", "action": "echo"}]
        }"#;
        let outcome = parse_flow(doc);
        assert!(outcome.errors.iter().any(|e| e.path == "version"));
    }

    #[test]
    fn test_rejects_unknown_step_kind() {
        let doc = r#"{
            "format": "flowmesh.flow/v1", "id": "f", "name": "n",
            "version": "1.0.0", "owner": "o",
            "steps": [{"id": "A", "kind": "teleport"}]
        }"#;
        let outcome = parse_flow(doc);
        assert!(outcome
            .errors
            .iter()
            .any(|e| e.path == "steps[0].kind"));
    }

    #[test]
    fn test_parse_condition_and_parallel() {
        let doc = r#"{
            "format": "flowmesh.flow/v1", "id": "f", "name": "n",
            "version": "1.0.0", "owner": "o",
            "steps": [
                {"id": "gate", "kind": "condition",
                 "predicate": {"op": "gte", "path": "count", "value": 3},
                 "on_success": "fanout", "on_failure": "leaf-a"},
                {"id": "fanout", "kind": "parallel",
                 "branches": ["leaf-a", "leaf-b"], "allow_partial": true},
                {"id": "leaf-a", "kind": "task", "action": "echo"},
                {"id": "leaf-b", "kind": "task", "action": "echo"}
            ]
        }"#;
        let outcome = parse_flow(doc);
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        let flow = outcome.flow.unwrap();

        let gate = flow.step(&StepId::from("gate")).unwrap();
        assert_eq!(gate.kind, StepKind::Condition);
        assert!(gate.predicate.is_some());

        let fanout = flow.step(&StepId::from("fanout")).unwrap();
        assert_eq!(fanout.branches.len(), 2);
        assert!(fanout.allow_partial);

        // Round trip preserves predicate and branches.
        let reparsed = parse_flow(&serialize_flow(&flow)).flow.unwrap();
        assert_eq!(reparsed, flow);
    }
}

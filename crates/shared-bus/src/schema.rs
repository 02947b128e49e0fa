//! # Event Schemas
//!
//! Versioned payload schemas for every event type on the bus. An event
//! type must be registered before anything can emit it; the registry is
//! the contract adjacent modules subscribe against without coupling to
//! the core's internal types.

use shared_types::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Schema lookup and validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The event type has no registered schema.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// The payload is not a map.
    #[error("Payload for {event_type} must be a map, got {got}")]
    PayloadNotMap {
        /// The offending event type.
        event_type: String,
        /// Shape of the rejected payload.
        got: &'static str,
    },

    /// A required field is missing.
    #[error("Payload for {event_type} is missing required field `{field}`")]
    MissingField {
        /// The offending event type.
        event_type: String,
        /// Name of the missing field.
        field: String,
    },

    /// A field has the wrong shape.
    #[error("Field `{field}` of {event_type} must be {expected}, got {got}")]
    WrongFieldType {
        /// The offending event type.
        event_type: String,
        /// Name of the mistyped field.
        field: String,
        /// Expected shape.
        expected: &'static str,
        /// Actual shape.
        got: &'static str,
    },
}

/// Expected shape of one payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Boolean.
    Bool,
    /// 64-bit integer.
    Int,
    /// 64-bit float (integers accepted and widened).
    Float,
    /// UTF-8 string.
    Str,
    /// Raw bytes.
    Bytes,
    /// List of any values.
    List,
    /// String-keyed map.
    Map,
    /// Any shape, including null.
    Any,
}

impl FieldType {
    fn name(self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Str => "string",
            FieldType::Bytes => "bytes",
            FieldType::List => "list",
            FieldType::Map => "map",
            FieldType::Any => "any",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::Bool => matches!(value, Value::Bool(_)),
            FieldType::Int => matches!(value, Value::Int(_)),
            FieldType::Float => matches!(value, Value::Float(_) | Value::Int(_)),
            FieldType::Str => matches!(value, Value::Str(_)),
            FieldType::Bytes => matches!(value, Value::Bytes(_)),
            FieldType::List => matches!(value, Value::List(_)),
            FieldType::Map => matches!(value, Value::Map(_)),
            FieldType::Any => true,
        }
    }
}

#[derive(Debug, Clone)]
struct FieldSpec {
    name: &'static str,
    ftype: FieldType,
    required: bool,
}

/// Schema for one event type's payload: a set of typed fields, some
/// required. Unknown extra fields are permitted; schemas only grow.
#[derive(Debug, Clone, Default)]
pub struct PayloadSchema {
    fields: Vec<FieldSpec>,
}

impl PayloadSchema {
    /// An empty schema accepting any map payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a required field.
    #[must_use]
    pub fn required(mut self, name: &'static str, ftype: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name,
            ftype,
            required: true,
        });
        self
    }

    /// Adds an optional field.
    #[must_use]
    pub fn optional(mut self, name: &'static str, ftype: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name,
            ftype,
            required: false,
        });
        self
    }

    /// Validates a payload against this schema.
    pub fn validate(&self, event_type: &str, payload: &Value) -> Result<(), SchemaError> {
        let map = payload.as_map().ok_or_else(|| SchemaError::PayloadNotMap {
            event_type: event_type.to_string(),
            got: payload.type_name(),
        })?;

        for field in &self.fields {
            match map.get(field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(SchemaError::MissingField {
                            event_type: event_type.to_string(),
                            field: field.name.to_string(),
                        });
                    }
                }
                Some(value) => {
                    if !field.ftype.matches(value) {
                        return Err(SchemaError::WrongFieldType {
                            event_type: event_type.to_string(),
                            field: field.name.to_string(),
                            expected: field.ftype.name(),
                            got: value.type_name(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Registry of event types to their current schema version and payload
/// schema. One registry per bus; populated at construction.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<&'static str, (u16, PayloadSchema)>,
}

impl SchemaRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or upgrades) an event type.
    pub fn register(&mut self, event_type: &'static str, version: u16, schema: PayloadSchema) {
        self.schemas.insert(event_type, (version, schema));
    }

    /// Looks up the current version and schema for an event type.
    #[must_use]
    pub fn lookup(&self, event_type: &str) -> Option<&(u16, PayloadSchema)> {
        self.schemas.get(event_type)
    }

    /// Number of registered event types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// The core event vocabulary. Every subsystem's emissions are registered
/// here so adjacent modules can subscribe on day one.
#[must_use]
pub fn core_schemas() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();

    // =========================================================================
    // CACHE (fm-01)
    // =========================================================================
    let cache_key = || {
        PayloadSchema::new()
            .required("layer", FieldType::Str)
            .required("key", FieldType::Str)
            .required("policy_version", FieldType::Int)
    };
    registry.register("cache.hit", 1, cache_key());
    registry.register("cache.miss", 1, cache_key());
    registry.register("cache.set", 1, cache_key().optional("ttl_ms", FieldType::Int));
    registry.register(
        "cache.evicted",
        1,
        PayloadSchema::new()
            .required("key", FieldType::Str)
            .required("reason", FieldType::Str),
    );
    registry.register(
        "cache.integrity.failed",
        1,
        PayloadSchema::new()
            .required("key", FieldType::Str)
            .required("reason", FieldType::Str),
    );

    // =========================================================================
    // ADMISSION (fm-03)
    // =========================================================================
    registry.register(
        "admission.allowed",
        1,
        PayloadSchema::new()
            .required("tenant", FieldType::Str)
            .required("endpoint", FieldType::Str)
            .required("remaining", FieldType::Int),
    );
    registry.register(
        "admission.denied",
        1,
        PayloadSchema::new()
            .required("tenant", FieldType::Str)
            .required("endpoint", FieldType::Str)
            .required("code", FieldType::Str)
            .required("retry_after_ms", FieldType::Int),
    );
    registry.register(
        "rate-limit.violated",
        1,
        PayloadSchema::new()
            .required("key", FieldType::Str)
            .required("violations", FieldType::Int),
    );
    registry.register(
        "breaker.opened",
        1,
        PayloadSchema::new()
            .required("endpoint", FieldType::Str)
            .required("failures", FieldType::Int),
    );
    registry.register(
        "breaker.closed",
        1,
        PayloadSchema::new().required("endpoint", FieldType::Str),
    );
    registry.register(
        "cost.alert",
        1,
        PayloadSchema::new()
            .required("tenant", FieldType::Str)
            .required("metric", FieldType::Str)
            .required("used", FieldType::Int)
            .required("limit", FieldType::Int),
    );

    // =========================================================================
    // VALIDATION (fm-02)
    // =========================================================================
    registry.register(
        "validation.layer.completed",
        1,
        PayloadSchema::new()
            .required("layer", FieldType::Str)
            .required("status", FieldType::Str)
            .required("duration_ms", FieldType::Int),
    );
    registry.register(
        "validation.pipeline.passed",
        1,
        PayloadSchema::new().required("layers", FieldType::Int),
    );
    registry.register(
        "validation.pipeline.failed",
        1,
        PayloadSchema::new()
            .required("failed_layer", FieldType::Str)
            .required("code", FieldType::Str),
    );

    // =========================================================================
    // EXECUTION (fm-05)
    // =========================================================================
    registry.register(
        "execution.started",
        1,
        PayloadSchema::new()
            .required("execution_id", FieldType::Str)
            .required("flow_id", FieldType::Str)
            .required("tenant", FieldType::Str),
    );
    registry.register(
        "execution.step.dispatched",
        1,
        PayloadSchema::new()
            .required("execution_id", FieldType::Str)
            .required("step_id", FieldType::Str)
            .required("node_id", FieldType::Str)
            .required("attempt", FieldType::Int),
    );
    registry.register(
        "execution.step.completed",
        1,
        PayloadSchema::new()
            .required("execution_id", FieldType::Str)
            .required("step_id", FieldType::Str)
            .required("status", FieldType::Str),
    );
    registry.register(
        "execution.checkpointed",
        1,
        PayloadSchema::new()
            .required("execution_id", FieldType::Str)
            .required("step_id", FieldType::Str)
            .required("content_id", FieldType::Str)
            .required("sequence", FieldType::Int),
    );
    let execution_only = || PayloadSchema::new().required("execution_id", FieldType::Str);
    registry.register("execution.paused", 1, execution_only());
    registry.register("execution.resumed", 1, execution_only());
    registry.register(
        "execution.aborted",
        1,
        execution_only().optional("reason", FieldType::Str),
    );
    registry.register("execution.completed", 1, execution_only());
    registry.register(
        "execution.failed",
        1,
        execution_only().required("error", FieldType::Str),
    );

    // =========================================================================
    // CHECKPOINT & RECOVERY (fm-06)
    // =========================================================================
    registry.register(
        "checkpoint.integrity.failed",
        1,
        PayloadSchema::new()
            .required("execution_id", FieldType::Str)
            .required("content_id", FieldType::Str),
    );

    // =========================================================================
    // NODE REGISTRY (fm-07)
    // =========================================================================
    let node_event = || {
        PayloadSchema::new()
            .required("node_id", FieldType::Str)
            .required("tenant", FieldType::Str)
    };
    registry.register("registry.node.joined", 1, node_event());
    registry.register("registry.node.left", 1, node_event());
    registry.register(
        "registry.proposal.created",
        1,
        PayloadSchema::new()
            .required("proposal_id", FieldType::Str)
            .required("tenant", FieldType::Str)
            .required("kind", FieldType::Str),
    );
    registry.register(
        "registry.proposal.voted",
        1,
        PayloadSchema::new()
            .required("proposal_id", FieldType::Str)
            .required("node_id", FieldType::Str)
            .required("approve", FieldType::Bool),
    );

    registry
}

//! # Metadata Layer
//!
//! Validates the payload against the document schema registered for the
//! resource, then indexes payload metadata. Schema violations reject;
//! an index write failure is only a warning.
//!
//! The schema language covers required fields, shapes, enumerations,
//! substring patterns, numeric/length bounds, and nested arrays and
//! objects.

use crate::layers::ValidationLayer;
use crate::ports::MetadataIndex;
use crate::report::LayerReport;
use crate::request::ValidationRequest;
use async_trait::async_trait;
use shared_types::{ErrorCode, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

/// Expected shape of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    /// Boolean.
    Bool,
    /// Integer.
    Int,
    /// Float (integers widen).
    Float,
    /// String.
    Str,
    /// List; constrain items via `items`.
    List,
    /// Map; constrain entries via `fields`.
    Map,
    /// Any shape.
    Any,
}

impl SchemaKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            SchemaKind::Bool => matches!(value, Value::Bool(_)),
            SchemaKind::Int => matches!(value, Value::Int(_)),
            SchemaKind::Float => matches!(value, Value::Float(_) | Value::Int(_)),
            SchemaKind::Str => matches!(value, Value::Str(_)),
            SchemaKind::List => matches!(value, Value::List(_)),
            SchemaKind::Map => matches!(value, Value::Map(_)),
            SchemaKind::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            SchemaKind::Bool => "bool",
            SchemaKind::Int => "int",
            SchemaKind::Float => "float",
            SchemaKind::Str => "string",
            SchemaKind::List => "list",
            SchemaKind::Map => "map",
            SchemaKind::Any => "any",
        }
    }
}

/// Constraint on one field.
#[derive(Debug, Clone)]
pub struct FieldConstraint {
    /// Expected shape.
    pub kind: SchemaKind,
    /// Whether the field must be present and non-null.
    pub required: bool,
    /// Closed set of admissible values.
    pub enum_values: Option<Vec<Value>>,
    /// Substring the string value must contain.
    pub pattern: Option<String>,
    /// Minimum: numeric value, or length for strings/lists.
    pub min: Option<f64>,
    /// Maximum: numeric value, or length for strings/lists.
    pub max: Option<f64>,
    /// Constraint applied to every list item.
    pub items: Option<Box<FieldConstraint>>,
    /// Constraints on nested map entries.
    pub fields: Option<BTreeMap<String, FieldConstraint>>,
}

impl FieldConstraint {
    /// An optional field of the given shape.
    #[must_use]
    pub fn of(kind: SchemaKind) -> Self {
        Self {
            kind,
            required: false,
            enum_values: None,
            pattern: None,
            min: None,
            max: None,
            items: None,
            fields: None,
        }
    }

    /// Marks the field required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Restricts to an enumerated value set.
    #[must_use]
    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    /// Requires the string to contain a substring.
    #[must_use]
    pub fn containing(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Sets numeric/length bounds.
    #[must_use]
    pub fn bounded(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Constrains list items.
    #[must_use]
    pub fn with_items(mut self, item: FieldConstraint) -> Self {
        self.items = Some(Box::new(item));
        self
    }

    /// Constrains nested map entries.
    #[must_use]
    pub fn with_fields(mut self, fields: BTreeMap<String, FieldConstraint>) -> Self {
        self.fields = Some(fields);
        self
    }

    fn check(&self, path: &str, value: &Value) -> Result<(), String> {
        if !self.kind.matches(value) {
            return Err(format!(
                "{path}: expected {}, got {}",
                self.kind.name(),
                value.type_name()
            ));
        }

        if let Some(allowed) = &self.enum_values {
            if !allowed.contains(value) {
                return Err(format!("{path}: value not in enumeration"));
            }
        }

        if let Some(pattern) = &self.pattern {
            match value.as_str() {
                Some(s) if s.contains(pattern.as_str()) => {}
                _ => return Err(format!("{path}: does not match pattern `{pattern}`")),
            }
        }

        if self.min.is_some() || self.max.is_some() {
            let measure = match value {
                Value::Int(i) => Some(*i as f64),
                Value::Float(f) => Some(*f),
                Value::Str(s) => Some(s.len() as f64),
                Value::List(l) => Some(l.len() as f64),
                _ => None,
            };
            if let Some(m) = measure {
                if self.min.is_some_and(|min| m < min) {
                    return Err(format!("{path}: below minimum"));
                }
                if self.max.is_some_and(|max| m > max) {
                    return Err(format!("{path}: above maximum"));
                }
            }
        }

        if let (Some(item_constraint), Some(items)) = (&self.items, value.as_list()) {
            for (i, item) in items.iter().enumerate() {
                item_constraint.check(&format!("{path}[{i}]"), item)?;
            }
        }

        if let (Some(field_constraints), Some(map)) = (&self.fields, value.as_map()) {
            check_fields(path, field_constraints, map)?;
        }

        Ok(())
    }
}

fn check_fields(
    path: &str,
    constraints: &BTreeMap<String, FieldConstraint>,
    map: &BTreeMap<String, Value>,
) -> Result<(), String> {
    for (name, constraint) in constraints {
        let field_path = if path.is_empty() {
            name.clone()
        } else {
            format!("{path}.{name}")
        };
        match map.get(name) {
            None | Some(Value::Null) => {
                if constraint.required {
                    return Err(format!("{field_path}: required field missing"));
                }
            }
            Some(value) => constraint.check(&field_path, value)?,
        }
    }
    Ok(())
}

/// A registered payload schema for one resource.
#[derive(Debug, Clone, Default)]
pub struct DocumentSchema {
    /// Top-level field constraints.
    pub fields: BTreeMap<String, FieldConstraint>,
}

impl DocumentSchema {
    /// An empty schema accepting any map payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field constraint.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, constraint: FieldConstraint) -> Self {
        self.fields.insert(name.into(), constraint);
        self
    }

    /// Validates a payload. Returns the failing field path and reason.
    pub fn validate(&self, payload: &Value) -> Result<(), String> {
        let map = payload
            .as_map()
            .ok_or_else(|| format!("payload must be a map, got {}", payload.type_name()))?;
        check_fields("", &self.fields, map)
    }
}

/// The metadata/indexing layer.
pub struct MetadataLayer {
    schemas: HashMap<String, DocumentSchema>,
    index: Option<Arc<dyn MetadataIndex>>,
}

impl MetadataLayer {
    /// Layer id referenced by pipeline configuration.
    pub const ID: &'static str = "metadata";

    /// Creates the layer with no schemas and no index sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
            index: None,
        }
    }

    /// Registers a schema for a resource.
    #[must_use]
    pub fn with_schema(mut self, resource: impl Into<String>, schema: DocumentSchema) -> Self {
        self.schemas.insert(resource.into(), schema);
        self
    }

    /// Attaches the metadata index sink.
    #[must_use]
    pub fn with_index(mut self, index: Arc<dyn MetadataIndex>) -> Self {
        self.index = Some(index);
        self
    }

    fn extract_metadata(request: &ValidationRequest) -> Value {
        let keys = request
            .payload
            .as_map()
            .map(|m| Value::List(m.keys().map(|k| Value::from(k.as_str())).collect()))
            .unwrap_or(Value::List(Vec::new()));
        Value::from([
            ("resource", Value::from(request.resource.as_str())),
            ("tenant", Value::from(request.tenant.as_str())),
            ("keys", keys),
        ])
    }
}

impl Default for MetadataLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ValidationLayer for MetadataLayer {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn validate(&self, request: &ValidationRequest) -> LayerReport {
        if let Some(schema) = self.schemas.get(&request.resource) {
            if let Err(reason) = schema.validate(&request.payload) {
                return LayerReport::failed(Self::ID, ErrorCode::SchemaInvalid, reason);
            }
        }

        if let Some(index) = &self.index {
            let metadata = Self::extract_metadata(request);
            if let Err(e) = index.index(&request.resource, &metadata).await {
                // Indexing is best-effort: the payload is valid, search
                // freshness just lags.
                warn!(error = %e, resource = %request.resource, "Metadata index write failed");
                return LayerReport::warning(Self::ID, "schema valid; index write failed");
            }
        }

        LayerReport::passed(Self::ID, "schema valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortError;
    use shared_types::{Identity, TenantId};
    use uuid::Uuid;

    fn request(payload: Value) -> ValidationRequest {
        ValidationRequest {
            method: "POST".into(),
            path: "/trigger".into(),
            identity: Identity::from("alice"),
            tenant: TenantId::from("acme"),
            timestamp_ms: 0,
            signature: None,
            payload,
            resource: "orders".into(),
            required_permission: "execute".into(),
            correlation_id: Uuid::new_v4(),
        }
    }

    fn order_schema() -> DocumentSchema {
        DocumentSchema::new()
            .field("sku", FieldConstraint::of(SchemaKind::Str).required())
            .field(
                "quantity",
                FieldConstraint::of(SchemaKind::Int)
                    .required()
                    .bounded(Some(1.0), Some(100.0)),
            )
            .field(
                "priority",
                FieldConstraint::of(SchemaKind::Str).one_of(vec![
                    Value::from("low"),
                    Value::from("high"),
                ]),
            )
            .field(
                "lines",
                FieldConstraint::of(SchemaKind::List)
                    .with_items(FieldConstraint::of(SchemaKind::Map).with_fields(
                        [("item".to_string(), FieldConstraint::of(SchemaKind::Str).required())]
                            .into_iter()
                            .collect(),
                    )),
            )
    }

    #[tokio::test]
    async fn test_valid_payload_passes() {
        let layer = MetadataLayer::new().with_schema("orders", order_schema());
        let payload = Value::from([
            ("sku", Value::from("A-17")),
            ("quantity", Value::Int(3)),
            ("priority", Value::from("high")),
        ]);
        assert!(layer.validate(&request(payload)).await.is_passing());
    }

    #[tokio::test]
    async fn test_missing_required_field() {
        let layer = MetadataLayer::new().with_schema("orders", order_schema());
        let payload = Value::from([("quantity", Value::Int(3))]);
        let report = layer.validate(&request(payload)).await;
        assert_eq!(report.code, Some(ErrorCode::SchemaInvalid));
        assert!(report.message.contains("sku"));
    }

    #[tokio::test]
    async fn test_out_of_range() {
        let layer = MetadataLayer::new().with_schema("orders", order_schema());
        let payload = Value::from([("sku", Value::from("A")), ("quantity", Value::Int(101))]);
        let report = layer.validate(&request(payload)).await;
        assert_eq!(report.code, Some(ErrorCode::SchemaInvalid));
    }

    #[tokio::test]
    async fn test_enum_violation() {
        let layer = MetadataLayer::new().with_schema("orders", order_schema());
        let payload = Value::from([
            ("sku", Value::from("A")),
            ("quantity", Value::Int(1)),
            ("priority", Value::from("urgent")),
        ]);
        let report = layer.validate(&request(payload)).await;
        assert_eq!(report.code, Some(ErrorCode::SchemaInvalid));
    }

    #[tokio::test]
    async fn test_nested_list_items_checked() {
        let layer = MetadataLayer::new().with_schema("orders", order_schema());
        let payload = Value::from([
            ("sku", Value::from("A")),
            ("quantity", Value::Int(1)),
            (
                "lines",
                Value::List(vec![Value::from([("wrong", Value::Int(1))])]),
            ),
        ]);
        let report = layer.validate(&request(payload)).await;
        assert_eq!(report.code, Some(ErrorCode::SchemaInvalid));
        assert!(report.message.contains("lines[0]"));
    }

    #[tokio::test]
    async fn test_unregistered_resource_passes() {
        let layer = MetadataLayer::new();
        assert!(layer
            .validate(&request(Value::from([("anything", Value::Null)])))
            .await
            .is_passing());
    }

    struct FailingIndex;

    #[async_trait]
    impl MetadataIndex for FailingIndex {
        async fn index(&self, _resource: &str, _metadata: &Value) -> Result<(), PortError> {
            Err(PortError::Unavailable("index down".into()))
        }
    }

    #[tokio::test]
    async fn test_index_failure_is_warning() {
        let layer = MetadataLayer::new()
            .with_schema("orders", DocumentSchema::new())
            .with_index(Arc::new(FailingIndex));
        let report = layer.validate(&request(Value::empty_map())).await;
        assert!(report.is_passing());
        assert_eq!(report.status, crate::report::LayerStatus::Warning);
    }
}

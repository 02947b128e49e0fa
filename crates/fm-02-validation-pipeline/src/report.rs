//! # Layer Reports and the Pipeline Verdict
//!
//! Every layer returns a [`LayerReport`]; the pipeline's overall verdict
//! is `passed` iff every required layer passed, with the first failing
//! layer's report propagated.

use shared_types::{ErrorCode, Value};

/// Outcome of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerStatus {
    /// The layer accepted the request.
    Passed,
    /// The layer rejected the request.
    Failed,
    /// The layer accepted with a non-fatal observation (e.g. index write
    /// failure).
    Warning,
}

impl LayerStatus {
    /// Stable tag used in events and cached payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerStatus::Passed => "passed",
            LayerStatus::Failed => "failed",
            LayerStatus::Warning => "warning",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "passed" => Some(LayerStatus::Passed),
            "failed" => Some(LayerStatus::Failed),
            "warning" => Some(LayerStatus::Warning),
            _ => None,
        }
    }
}

/// Risk grading produced by the security layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    /// No signals.
    None,
    /// Signals below concern.
    Low,
    /// Worth recording.
    Medium,
    /// Blocks when blocking is enabled.
    High,
    /// Always a rejection candidate.
    Critical,
}

impl RiskLevel {
    /// Stable tag for events and payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// Whether this level blocks when the layer is configured to block.
    #[must_use]
    pub fn blocks(&self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

/// One layer's full report.
#[derive(Debug, Clone)]
pub struct LayerReport {
    /// The reporting layer.
    pub layer_id: String,
    /// Pass/fail/warning.
    pub status: LayerStatus,
    /// Stable code on failure.
    pub code: Option<ErrorCode>,
    /// Human-readable summary.
    pub message: String,
    /// Layer-specific structured details.
    pub details: Value,
    /// Wall time the layer spent.
    pub duration_ms: u64,
    /// When the layer completed, epoch milliseconds.
    pub timestamp_ms: u64,
}

impl LayerReport {
    /// A passing report.
    #[must_use]
    pub fn passed(layer_id: &str, message: impl Into<String>) -> Self {
        Self {
            layer_id: layer_id.to_string(),
            status: LayerStatus::Passed,
            code: None,
            message: message.into(),
            details: Value::empty_map(),
            duration_ms: 0,
            timestamp_ms: 0,
        }
    }

    /// A failing report with its stable code.
    #[must_use]
    pub fn failed(layer_id: &str, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            layer_id: layer_id.to_string(),
            status: LayerStatus::Failed,
            code: Some(code),
            message: message.into(),
            details: Value::empty_map(),
            duration_ms: 0,
            timestamp_ms: 0,
        }
    }

    /// A warning report (non-fatal observation).
    #[must_use]
    pub fn warning(layer_id: &str, message: impl Into<String>) -> Self {
        Self {
            layer_id: layer_id.to_string(),
            status: LayerStatus::Warning,
            code: None,
            message: message.into(),
            details: Value::empty_map(),
            duration_ms: 0,
            timestamp_ms: 0,
        }
    }

    /// Attaches structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Whether this report lets the request proceed.
    #[must_use]
    pub fn is_passing(&self) -> bool {
        !matches!(self.status, LayerStatus::Failed)
    }

    /// Value form used for caching and events.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::from([
            ("layer", Value::from(self.layer_id.as_str())),
            ("status", Value::from(self.status.as_str())),
            (
                "code",
                self.code
                    .map(|c| Value::from(c.as_str()))
                    .unwrap_or(Value::Null),
            ),
            ("message", Value::from(self.message.as_str())),
            ("details", self.details.clone()),
            ("duration_ms", Value::Int(self.duration_ms as i64)),
            ("timestamp_ms", Value::Int(self.timestamp_ms as i64)),
        ])
    }

    /// Rehydrates a report from its cached value form.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let status = LayerStatus::from_tag(value.get_path("status")?.as_str()?)?;
        let code = match value.get_path("code") {
            Some(Value::Str(s)) => s.parse().ok(),
            _ => None,
        };
        Some(Self {
            layer_id: value.get_path("layer")?.as_str()?.to_string(),
            status,
            code,
            message: value
                .get_path("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            details: value.get_path("details").cloned().unwrap_or_default(),
            duration_ms: value
                .get_path("duration_ms")
                .and_then(Value::as_int)
                .unwrap_or(0) as u64,
            timestamp_ms: value
                .get_path("timestamp_ms")
                .and_then(Value::as_int)
                .unwrap_or(0) as u64,
        })
    }
}

/// The pipeline's overall answer for one request.
#[derive(Debug, Clone)]
pub struct PipelineVerdict {
    /// True iff every required layer passed.
    pub passed: bool,
    /// Per-layer reports in execution order; short-circuited layers are
    /// absent.
    pub reports: Vec<LayerReport>,
    /// The first failing layer's report.
    pub failed: Option<LayerReport>,
}

impl PipelineVerdict {
    /// The stable code the caller sees: the failing layer's code, or
    /// `INTERNAL` if a layer failed without one.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.failed
            .as_ref()
            .map(|report| report.code.unwrap_or(ErrorCode::Internal))
    }
}

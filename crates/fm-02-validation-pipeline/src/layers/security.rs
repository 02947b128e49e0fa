//! # Security Layer
//!
//! Last line before admission to the engine: pattern rules over payload
//! strings (injection, XSS, path traversal, shell), integrity checks
//! (embedded payload hash, timestamp sanity), and anomaly scoring against
//! a per-tenant behavioral baseline.
//!
//! Signals accumulate into a risk score; `high`/`critical` risk blocks
//! when blocking is enabled (the default), otherwise degrades to a
//! warning.

use crate::layers::ValidationLayer;
use crate::report::{LayerReport, RiskLevel};
use crate::request::ValidationRequest;
use async_trait::async_trait;
use shared_crypto::{canonicalize, hash};
use shared_types::{Clock, ErrorCode, TenantId, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Configuration for the security layer.
#[derive(Debug, Clone)]
pub struct SecurityLayerConfig {
    /// Reject on high/critical risk (otherwise warn only).
    pub block_on_high_risk: bool,
    /// Payload sizes beyond this many bytes add an anomaly signal.
    pub max_payload_bytes: usize,
    /// How far a payload may exceed the tenant's mean size before it
    /// counts as anomalous (multiplier).
    pub size_anomaly_factor: f64,
    /// Future-dated timestamps beyond this window add a signal.
    pub future_timestamp_tolerance_ms: u64,
}

impl Default for SecurityLayerConfig {
    fn default() -> Self {
        Self {
            block_on_high_risk: true,
            max_payload_bytes: 1024 * 1024,
            size_anomaly_factor: 8.0,
            future_timestamp_tolerance_ms: 5 * 60 * 1000,
        }
    }
}

/// One pattern rule: a name and the lowercase needles that trigger it.
struct PatternRule {
    name: &'static str,
    needles: &'static [&'static str],
    weight: u32,
}

/// Rolling per-tenant behavioral baseline.
#[derive(Debug, Clone, Default)]
struct TenantBaseline {
    requests: u64,
    mean_payload_bytes: f64,
}

impl TenantBaseline {
    fn observe(&mut self, payload_bytes: f64) {
        self.requests += 1;
        // Incremental mean; cheap and adequate for a node-local baseline.
        self.mean_payload_bytes += (payload_bytes - self.mean_payload_bytes) / self.requests as f64;
    }
}

/// The security/anomaly layer.
pub struct SecurityLayer {
    config: SecurityLayerConfig,
    clock: Arc<dyn Clock>,
    rules: Vec<PatternRule>,
    baselines: RwLock<HashMap<TenantId, TenantBaseline>>,
}

impl SecurityLayer {
    /// Layer id referenced by pipeline configuration.
    pub const ID: &'static str = "security";

    /// Creates the layer with the built-in rule set.
    #[must_use]
    pub fn new(config: SecurityLayerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            rules: built_in_rules(),
            baselines: RwLock::new(HashMap::new()),
        }
    }

    /// Collects every string in the payload, lowercased, for rule
    /// scanning.
    fn collect_strings(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::Str(s) => out.push(s.to_lowercase()),
            Value::List(items) => {
                for item in items {
                    Self::collect_strings(item, out);
                }
            }
            Value::Map(map) => {
                for v in map.values() {
                    Self::collect_strings(v, out);
                }
            }
            _ => {}
        }
    }

    /// Checks the embedded integrity envelope, if the payload carries
    /// one: `integrity.payload_hash` must equal the hex SHA-256 of the
    /// canonical `data` field.
    fn integrity_violation(payload: &Value) -> Option<&'static str> {
        let claimed = payload.get_path("integrity.payload_hash")?.as_str()?;
        let Some(data) = payload.get_path("data") else {
            return Some("integrity envelope without data field");
        };
        let actual = hash(&canonicalize(data)).to_hex();
        if claimed != actual {
            Some("embedded payload hash mismatch")
        } else {
            None
        }
    }

    fn score_to_level(score: u32) -> RiskLevel {
        match score {
            0 => RiskLevel::None,
            1..=2 => RiskLevel::Low,
            3..=5 => RiskLevel::Medium,
            6..=9 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }
}

fn built_in_rules() -> Vec<PatternRule> {
    vec![
        PatternRule {
            name: "sql-injection",
            needles: &["union select", "' or 1=1", "drop table", "; --"],
            weight: 6,
        },
        PatternRule {
            name: "xss",
            needles: &["<script", "javascript:", "onerror="],
            weight: 6,
        },
        PatternRule {
            name: "path-traversal",
            needles: &["../", "..\\", "/etc/passwd"],
            weight: 6,
        },
        PatternRule {
            name: "shell-metachars",
            needles: &["$(", "`", "&& rm ", "| sh"],
            weight: 4,
        },
    ]
}

#[async_trait]
impl ValidationLayer for SecurityLayer {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn validate(&self, request: &ValidationRequest) -> LayerReport {
        let mut score: u32 = 0;
        let mut signals: Vec<Value> = Vec::new();

        // Pattern rules over payload strings.
        let mut strings = Vec::new();
        Self::collect_strings(&request.payload, &mut strings);
        for rule in &self.rules {
            let matched = strings
                .iter()
                .any(|s| rule.needles.iter().any(|needle| s.contains(needle)));
            if matched {
                score += rule.weight;
                signals.push(Value::from(rule.name));
            }
        }

        // Integrity checks.
        if let Some(reason) = Self::integrity_violation(&request.payload) {
            score += 10;
            signals.push(Value::from(reason));
        }
        let now = self.clock.now_ms();
        if request.timestamp_ms > now + self.config.future_timestamp_tolerance_ms {
            score += 3;
            signals.push(Value::from("future-dated timestamp"));
        }

        // Behavioral baseline.
        let payload_bytes = canonicalize(&request.payload).len();
        if payload_bytes > self.config.max_payload_bytes {
            score += 4;
            signals.push(Value::from("oversized payload"));
        }
        {
            let mut baselines = match self.baselines.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let baseline = baselines.entry(request.tenant.clone()).or_default();
            if baseline.requests >= 10
                && payload_bytes as f64
                    > baseline.mean_payload_bytes * self.config.size_anomaly_factor
            {
                score += 2;
                signals.push(Value::from("payload size anomaly"));
            }
            baseline.observe(payload_bytes as f64);
        }

        let level = Self::score_to_level(score);
        let details = Value::from([
            ("risk", Value::from(level.as_str())),
            ("score", Value::Int(score as i64)),
            ("signals", Value::List(signals)),
        ]);

        if level.blocks() && self.config.block_on_high_risk {
            LayerReport::failed(Self::ID, ErrorCode::AbuseDetected, "risk threshold exceeded")
                .with_details(details)
        } else if level > RiskLevel::None {
            LayerReport::warning(Self::ID, "risk signals recorded").with_details(details)
        } else {
            LayerReport::passed(Self::ID, "no risk signals").with_details(details)
        }
    }
}

//! # Event Record
//!
//! The wire shape of everything on the bus.

use serde::{Deserialize, Serialize};
use shared_types::{Identity, Value};
use uuid::Uuid;

/// One event on the log.
///
/// `event_type` is a dotted `domain.action` name; together with `version`
/// it identifies the registered payload schema (`domain.action.vN`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Dotted event name, e.g. `execution.step.completed`.
    pub event_type: String,

    /// Schema version of the payload.
    pub version: u16,

    /// Unique event identifier.
    pub event_id: Uuid,

    /// Emission time, epoch milliseconds.
    pub timestamp_ms: u64,

    /// The external identity on whose behalf the event was emitted.
    pub actor: Identity,

    /// Schema-validated payload.
    pub payload: Value,

    /// Correlates events belonging to one request or execution.
    pub correlation_id: Option<Uuid>,
}

impl EventRecord {
    /// The `domain` segment of the event type (`execution` for
    /// `execution.step.completed`).
    #[must_use]
    pub fn domain(&self) -> &str {
        self.event_type.split('.').next().unwrap_or("")
    }

    /// Full schema identifier, `domain.action.vN`.
    #[must_use]
    pub fn schema_id(&self) -> String {
        format!("{}.v{}", self.event_type, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event_type: &str) -> EventRecord {
        EventRecord {
            event_type: event_type.to_string(),
            version: 1,
            event_id: Uuid::new_v4(),
            timestamp_ms: 0,
            actor: Identity::from("system"),
            payload: Value::empty_map(),
            correlation_id: None,
        }
    }

    #[test]
    fn test_domain() {
        assert_eq!(record("execution.step.completed").domain(), "execution");
        assert_eq!(record("cache.hit").domain(), "cache");
    }

    #[test]
    fn test_schema_id() {
        assert_eq!(record("cache.hit").schema_id(), "cache.hit.v1");
    }
}

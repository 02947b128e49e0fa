//! # Event Bus
//!
//! The emitting side of the log. Uses `tokio::sync::broadcast` for
//! multi-producer, multi-consumer semantics. Suitable for single-node
//! operation; distributed deployments replicate the log through the
//! content store instead of sharing a bus.

use crate::record::EventRecord;
use crate::schema::{SchemaError, SchemaRegistry};
use crate::subscriber::{EventStream, Subscription};
use crate::DEFAULT_CHANNEL_CAPACITY;
use shared_types::{Clock, Identity, SystemClock, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Errors from `emit`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventLogError {
    /// The event type or payload failed schema validation.
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// The event log handle. Cheap to clone via `Arc`.
pub struct EventBus {
    /// Broadcast sender for events.
    sender: broadcast::Sender<EventRecord>,

    /// Registered event schemas.
    registry: SchemaRegistry,

    /// Wall clock for event timestamps.
    clock: Arc<dyn Clock>,

    /// Total events emitted.
    events_emitted: AtomicU64,

    /// Events rejected by schema validation (release builds count
    /// instead of panicking).
    events_rejected: AtomicU64,

    /// Channel capacity.
    capacity: usize,
}

impl EventBus {
    /// Creates a bus with the given schema registry and default capacity.
    #[must_use]
    pub fn new(registry: SchemaRegistry) -> Self {
        Self::with_capacity(registry, DEFAULT_CHANNEL_CAPACITY, Arc::new(SystemClock))
    }

    /// Creates a bus with explicit capacity and clock.
    #[must_use]
    pub fn with_capacity(
        registry: SchemaRegistry,
        capacity: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            registry,
            clock,
            events_emitted: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            capacity,
        }
    }

    /// Emits an event. The payload is validated against the registered
    /// schema for `event_type`; unknown types are rejected.
    ///
    /// Returns the event id on success.
    pub fn emit(
        &self,
        event_type: &str,
        actor: &Identity,
        payload: Value,
    ) -> Result<Uuid, EventLogError> {
        self.emit_inner(event_type, actor, payload, None)
    }

    /// Emits an event carrying a correlation id, tying it to a request
    /// or execution.
    pub fn emit_correlated(
        &self,
        event_type: &str,
        actor: &Identity,
        payload: Value,
        correlation_id: Uuid,
    ) -> Result<Uuid, EventLogError> {
        self.emit_inner(event_type, actor, payload, Some(correlation_id))
    }

    fn emit_inner(
        &self,
        event_type: &str,
        actor: &Identity,
        payload: Value,
        correlation_id: Option<Uuid>,
    ) -> Result<Uuid, EventLogError> {
        let (version, schema) = self.registry.lookup(event_type).ok_or_else(|| {
            self.events_rejected.fetch_add(1, Ordering::Relaxed);
            SchemaError::UnknownEventType(event_type.to_string())
        })?;

        if let Err(violation) = schema.validate(event_type, &payload) {
            // Emitting a malformed payload is a bug in the emitting
            // subsystem, not a runtime condition.
            debug_assert!(false, "schema violation: {violation}");
            error!(event_type, %violation, "Event rejected by schema validation");
            self.events_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(violation.into());
        }

        let record = EventRecord {
            event_type: event_type.to_string(),
            version: *version,
            event_id: Uuid::new_v4(),
            timestamp_ms: self.clock.now_ms(),
            actor: actor.clone(),
            payload,
            correlation_id,
        };
        let event_id = record.event_id;

        self.events_emitted.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(record) {
            Ok(receivers) => {
                debug!(event_type, receivers, "Event emitted");
            }
            Err(_) => {
                // No receivers - the log is observational, so this is fine.
                debug!(event_type, "Event emitted with no subscribers");
            }
        }

        Ok(event_id)
    }

    /// Subscribes to events whose type matches `pattern`.
    ///
    /// Patterns: exact (`cache.hit`), prefix glob (`execution.*`), or
    /// everything (`*`).
    #[must_use]
    pub fn subscribe(&self, pattern: &str) -> Subscription {
        debug!(pattern, "New subscription");
        Subscription::new(self.sender.subscribe(), pattern.to_string())
    }

    /// Convenience: a `Stream` of matching events.
    #[must_use]
    pub fn event_stream(&self, pattern: &str) -> EventStream {
        EventStream::new(self.subscribe(pattern))
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Total events emitted since construction.
    #[must_use]
    pub fn events_emitted(&self) -> u64 {
        self.events_emitted.load(Ordering::Relaxed)
    }

    /// Total events rejected by schema validation.
    #[must_use]
    pub fn events_rejected(&self) -> u64 {
        self.events_rejected.load(Ordering::Relaxed)
    }

    /// The per-subscriber buffer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Logs a schema rejection without panicking; used by emitters that
    /// treat event emission as best-effort.
    pub fn emit_best_effort(&self, event_type: &str, actor: &Identity, payload: Value) {
        if let Err(e) = self.emit(event_type, actor, payload) {
            warn!(event_type, error = %e, "Best-effort event dropped");
        }
    }
}

//! # Event Subscriber
//!
//! The observing side of the log. Subscriptions filter by type glob;
//! delivery is at-least-once and lagging subscribers skip rather than
//! block the bus.

use crate::record::EventRecord;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tracing::debug;

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The event bus was dropped.
    #[error("Event bus closed")]
    Closed,
}

/// Matches an event type against a subscription pattern.
///
/// Supported patterns: `*` (everything), a trailing `.*` prefix glob
/// (`execution.*` matches `execution.started` and
/// `execution.step.completed`), or an exact type name.
#[must_use]
pub fn pattern_matches(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return event_type
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'));
    }
    pattern == event_type
}

/// A subscription handle for receiving events matching a pattern.
pub struct Subscription {
    /// The broadcast receiver.
    receiver: broadcast::Receiver<EventRecord>,

    /// Type glob for this subscription.
    pattern: String,
}

impl Subscription {
    pub(crate) fn new(receiver: broadcast::Receiver<EventRecord>, pattern: String) -> Self {
        Self { receiver, pattern }
    }

    /// Receives the next event matching the pattern.
    ///
    /// Returns `None` when the bus is dropped. A lagged subscriber skips
    /// the missed events and keeps receiving; handlers must tolerate
    /// gaps and duplicates (at-least-once delivery).
    pub async fn recv(&mut self) -> Option<EventRecord> {
        loop {
            let record = match self.receiver.recv().await {
                Ok(r) => r,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(lagged = count, pattern = %self.pattern, "Subscriber lagged, events skipped");
                    continue;
                }
            };
            if pattern_matches(&self.pattern, &record.event_type) {
                return Some(record);
            }
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Result<Option<EventRecord>, SubscriptionError> {
        loop {
            let record = match self.receiver.try_recv() {
                Ok(r) => r,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            };
            if pattern_matches(&self.pattern, &record.event_type) {
                return Ok(Some(record));
            }
        }
    }

    /// The pattern this subscription filters on.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// `Stream` adapter over a [`Subscription`].
pub struct EventStream {
    inner: Subscription,
}

impl EventStream {
    /// Wraps a subscription.
    #[must_use]
    pub fn new(inner: Subscription) -> Self {
        Self { inner }
    }
}

impl Stream for EventStream {
    type Item = EventRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // Non-blocking check; re-wake to poll again when nothing is ready.
        match self.inner.try_recv() {
            Ok(Some(record)) => Poll::Ready(Some(record)),
            Ok(None) => {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            Err(SubscriptionError::Closed) => Poll::Ready(None),
        }
    }
}

//! Membership change notifications for downstream collaborators.
//!
//! # Responsibility
//! - Describe member-added/reordered/removed side effects.
//! - Deliver them fire-and-forget through a pluggable sink.
//!
//! # Invariants
//! - Events are published only after the write transaction commits.
//! - A failing sink never fails the originating operation.

use crate::model::member::{ActorId, CollectionId, ItemId};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberEventKind {
    Added,
    Reordered,
    Removed,
}

impl MemberEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "member-added",
            Self::Reordered => "member-reordered",
            Self::Removed => "member-removed",
        }
    }
}

/// One committed membership change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEvent {
    /// Unique per event, lets consumers drop duplicate deliveries.
    pub event_id: Uuid,
    pub kind: MemberEventKind,
    pub collection_id: CollectionId,
    pub item_id: ItemId,
    pub actor_id: ActorId,
    /// Epoch ms.
    pub occurred_at: i64,
}

impl MemberEvent {
    pub fn new(
        kind: MemberEventKind,
        collection_id: CollectionId,
        item_id: ItemId,
        actor_id: ActorId,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            collection_id,
            item_id,
            actor_id,
            occurred_at: now_epoch_ms(),
        }
    }
}

/// Delivery failure reported by a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSinkError {
    pub message: String,
}

impl EventSinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for EventSinkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "event delivery failed: {}", self.message)
    }
}

impl Error for EventSinkError {}

/// Receiver for membership change notifications.
pub trait MemberEventSink {
    fn publish(&self, event: &MemberEvent) -> Result<(), EventSinkError>;
}

impl<S: MemberEventSink + ?Sized> MemberEventSink for &S {
    fn publish(&self, event: &MemberEvent) -> Result<(), EventSinkError> {
        (**self).publish(event)
    }
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl MemberEventSink for NoopEventSink {
    fn publish(&self, _event: &MemberEvent) -> Result<(), EventSinkError> {
        Ok(())
    }
}

/// In-memory sink that keeps every published event.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<MemberEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of recorded events in publish order.
    pub fn events(&self) -> Vec<MemberEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Removes and returns recorded events.
    pub fn drain(&self) -> Vec<MemberEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl MemberEventSink for RecordingEventSink {
    fn publish(&self, event: &MemberEvent) -> Result<(), EventSinkError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
        })
}

#[cfg(test)]
mod tests {
    use super::{MemberEvent, MemberEventKind, MemberEventSink, RecordingEventSink};

    #[test]
    fn recording_sink_keeps_publish_order() {
        let sink = RecordingEventSink::new();
        let first = MemberEvent::new(MemberEventKind::Added, 1, 5, 42);
        let second = MemberEvent::new(MemberEventKind::Removed, 1, 5, 42);
        sink.publish(&first).unwrap();
        sink.publish(&second).unwrap();

        let drained = sink.drain();
        assert_eq!(drained, vec![first, second]);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn events_get_distinct_ids() {
        let a = MemberEvent::new(MemberEventKind::Added, 1, 5, 0);
        let b = MemberEvent::new(MemberEventKind::Added, 1, 5, 0);
        assert_ne!(a.event_id, b.event_id);
        assert!(a.occurred_at > 0);
    }
}

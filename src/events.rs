//! Event fan-out for UI subscribers.
//!
//! The [`EventHub`] decouples the orchestrator and audio bridges from an
//! unbounded number of UI subscribers. Events are distributed over a bounded
//! broadcast channel: every subscriber sees all events published after it
//! subscribed, and a subscriber that falls behind has its oldest events
//! dropped and receives a single `desynchronized` event telling it to
//! reconcile with a full `GET /api/calls` poll instead of blocking anyone
//! else.
//!
//! Events for one call are delivered to a given subscriber in publish order.
//! No cross-call ordering is guaranteed.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

use crate::registry::{CallSession, CallStatus};

/// Default per-hub event buffer. A subscriber lagging by more than this many
/// events is desynchronized rather than blocking publishers.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Speaker attribution for transcript fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    /// The human on the phone or browser leg
    Caller,
    /// The AI voice agent
    Agent,
}

/// Call lifecycle and transcript events pushed to UI subscribers.
///
/// This is a closed tagged union; consumers match exhaustively rather than
/// sniffing a string field.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallEvent {
    /// A new call session was registered
    #[serde(rename_all = "camelCase")]
    CallCreated { call: CallSession },

    /// A call session transitioned status
    #[serde(rename_all = "camelCase")]
    CallStatus {
        call_id: String,
        status: CallStatus,
    },

    /// A call session was removed from the registry
    #[serde(rename_all = "camelCase")]
    CallRemoved { call_id: String },

    /// A transcript fragment attributed to one speaker of one call
    #[serde(rename_all = "camelCase")]
    Transcript {
        call_id: String,
        role: SpeakerRole,
        text: String,
        partial: bool,
    },

    /// The subscriber's buffer overflowed and events were dropped; it should
    /// re-fetch the full call list to reconcile.
    Desynchronized,
}

impl CallEvent {
    /// Call identifier the event refers to, if any.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            CallEvent::CallCreated { call } => Some(&call.call_id),
            CallEvent::CallStatus { call_id, .. } => Some(call_id),
            CallEvent::CallRemoved { call_id } => Some(call_id),
            CallEvent::Transcript { call_id, .. } => Some(call_id),
            CallEvent::Desynchronized => None,
        }
    }
}

/// Publish/subscribe hub for [`CallEvent`]s.
#[derive(Debug)]
pub struct EventHub {
    tx: broadcast::Sender<CallEvent>,
}

impl EventHub {
    /// Create a hub with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver an event to all current subscribers. Never blocks; publishing
    /// with no subscribers is a no-op.
    pub fn publish(&self, event: CallEvent) {
        // send only fails when there are no receivers, which is fine
        let _ = self.tx.send(event);
    }

    /// Open a new subscription. The subscriber receives events published
    /// after this call; there is no backfill.
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// One subscriber's view of the event stream.
pub struct EventStream {
    rx: broadcast::Receiver<CallEvent>,
}

impl EventStream {
    /// Receive the next event. Returns `None` once the hub is dropped.
    ///
    /// When the subscriber has lagged past the buffer, the skipped events are
    /// collapsed into a single [`CallEvent::Desynchronized`].
    pub async fn next(&mut self) -> Option<CallEvent> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event subscriber lagged, issuing desynchronized");
                Some(CallEvent::Desynchronized)
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-blocking receive, used by tests and drain loops.
    pub fn try_next(&mut self) -> Option<CallEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "event subscriber lagged, issuing desynchronized");
                Some(CallEvent::Desynchronized)
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CallDirection;

    fn session(id: &str) -> CallSession {
        CallSession {
            call_id: id.to_string(),
            direction: CallDirection::Outbound,
            phone_number: Some("+15551234567".to_string()),
            status: CallStatus::Dialing,
            start_time: "2026-01-01T00:00:00Z".to_string(),
            seq: 0,
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_events() {
        let hub = EventHub::new(16);
        let mut sub = hub.subscribe();

        hub.publish(CallEvent::CallCreated { call: session("a") });
        hub.publish(CallEvent::CallStatus {
            call_id: "a".to_string(),
            status: CallStatus::Connected,
        });

        match sub.next().await {
            Some(CallEvent::CallCreated { call }) => assert_eq!(call.call_id, "a"),
            other => panic!("unexpected event: {other:?}"),
        }
        match sub.next().await {
            Some(CallEvent::CallStatus { call_id, status }) => {
                assert_eq!(call_id, "a");
                assert_eq!(status, CallStatus::Connected);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_backfill_for_late_subscriber() {
        let hub = EventHub::new(16);
        hub.publish(CallEvent::CallRemoved {
            call_id: "old".to_string(),
        });

        let mut sub = hub.subscribe();
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_gets_desynchronized() {
        let hub = EventHub::new(4);
        let mut slow = hub.subscribe();

        // Overflow the buffer while the slow subscriber never reads.
        for i in 0..32 {
            hub.publish(CallEvent::CallRemoved {
                call_id: format!("c{i}"),
            });
        }

        match slow.next().await {
            Some(CallEvent::Desynchronized) => {}
            other => panic!("expected desynchronized, got {other:?}"),
        }
        // After the marker the subscriber resumes from the retained tail.
        assert!(matches!(
            slow.next().await,
            Some(CallEvent::CallRemoved { .. })
        ));
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = CallEvent::Transcript {
            call_id: "abc".to_string(),
            role: SpeakerRole::Agent,
            text: "hello".to_string(),
            partial: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "transcript");
        assert_eq!(json["callId"], "abc");
        assert_eq!(json["role"], "agent");
        assert_eq!(json["partial"], false);

        let json = serde_json::to_value(CallEvent::Desynchronized).unwrap();
        assert_eq!(json["type"], "desynchronized");
    }
}

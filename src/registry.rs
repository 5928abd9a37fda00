//! In-memory call registry.
//!
//! Single source of truth for active call sessions. The registry is the only
//! component that mutates session state; the audio bridge and event fan-out
//! refer to sessions by identifier only. Mutations to a given call are
//! serialized by the sharded map's entry locks, so no two transitions can
//! race for the same identifier.
//!
//! State machine per session:
//!
//! ```text
//! Dialing ----\
//!              +--> Connected --> Ended
//! Connecting -/          \
//!      \                  (remote hangup, bridge failure)
//!       +--> Disconnected (never answered / dropped early)
//! ```
//!
//! `Ended` and `Disconnected` are terminal; no transition leaves them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::events::{CallEvent, EventHub};

/// Direction of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Lifecycle status of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Outbound call placed, remote not yet ringing/answered
    Dialing,
    /// Inbound call being answered, or legs still being established
    Connecting,
    /// Both legs up, audio flowing
    Connected,
    /// Terminated normally (hangup by either party, bridge teardown)
    Ended,
    /// Dropped before connecting (never answered, socket lost)
    Disconnected,
}

impl CallStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Ended | CallStatus::Disconnected)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: CallStatus) -> bool {
        match (self, next) {
            _ if self.is_terminal() => false,
            (CallStatus::Dialing, CallStatus::Connecting) => true,
            (CallStatus::Dialing, CallStatus::Connected) => true,
            (CallStatus::Dialing, CallStatus::Disconnected) => true,
            (CallStatus::Dialing, CallStatus::Ended) => true,
            (CallStatus::Connecting, CallStatus::Connected) => true,
            (CallStatus::Connecting, CallStatus::Disconnected) => true,
            (CallStatus::Connecting, CallStatus::Ended) => true,
            (CallStatus::Connected, CallStatus::Ended) => true,
            (CallStatus::Connected, CallStatus::Disconnected) => true,
            _ => false,
        }
    }
}

/// One tracked voice interaction, inbound or outbound.
#[derive(Debug, Clone, Serialize)]
pub struct CallSession {
    /// Opaque identifier, unique for the process lifetime, never reused
    pub call_id: String,
    pub direction: CallDirection,
    /// Counterpart phone number; absent for browser sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub status: CallStatus,
    /// RFC 3339 creation timestamp
    pub start_time: String,
    /// Creation order, used for `list_active` ordering
    #[serde(skip)]
    pub seq: u64,
}

/// In-memory table of call sessions keyed by call identifier.
///
/// Explicit object with its lifecycle tied to [`crate::state::AppState`],
/// injected into the orchestrator rather than accessed as ambient state, so
/// tests can run multiple isolated registries in one process.
pub struct CallRegistry {
    calls: DashMap<String, CallSession>,
    next_seq: AtomicU64,
    /// Non-terminal session count; bumped via compare-exchange in
    /// `create_call` so concurrent creates cannot overshoot `max_active`.
    active: AtomicUsize,
    max_active: usize,
    hub: Arc<EventHub>,
}

impl CallRegistry {
    /// Create a registry bounded to `max_active` concurrently active calls.
    pub fn new(max_active: usize, hub: Arc<EventHub>) -> Self {
        Self {
            calls: DashMap::new(),
            next_seq: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            max_active: max_active.max(1),
            hub,
        }
    }

    /// Allocate a fresh session. Outbound sessions start `Dialing`, inbound
    /// sessions start `Connecting`. Fails with `Capacity` when every
    /// audio-bridge slot is taken.
    pub fn create_call(
        &self,
        direction: CallDirection,
        phone_number: Option<String>,
    ) -> AppResult<CallSession> {
        let mut current = self.active.load(Ordering::SeqCst);
        loop {
            if current >= self.max_active {
                return Err(AppError::Capacity(format!(
                    "all {} call slots are in use",
                    self.max_active
                )));
            }
            match self.active.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let call_id = Uuid::new_v4().to_string();
        let start_time = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        let status = match direction {
            CallDirection::Outbound => CallStatus::Dialing,
            CallDirection::Inbound => CallStatus::Connecting,
        };
        let session = CallSession {
            call_id: call_id.clone(),
            direction,
            phone_number,
            status,
            start_time,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };

        info!(call_id = %call_id, ?direction, "call session created");
        self.calls.insert(call_id, session.clone());
        self.hub.publish(CallEvent::CallCreated {
            call: session.clone(),
        });
        Ok(session)
    }

    /// Transition a session's status. Idempotent no-op if the session is
    /// already terminal; invalid transitions are dropped with a warning.
    /// Returns whether a transition was applied.
    pub fn update_status(&self, call_id: &str, new_status: CallStatus) -> AppResult<bool> {
        let mut entry = self
            .calls
            .get_mut(call_id)
            .ok_or_else(|| AppError::NotFound(format!("call {call_id}")))?;

        if entry.status.is_terminal() {
            debug!(call_id, ?new_status, current = ?entry.status, "ignoring transition from terminal status");
            return Ok(false);
        }
        if entry.status == new_status {
            return Ok(false);
        }
        if !entry.status.can_transition_to(new_status) {
            warn!(call_id, from = ?entry.status, to = ?new_status, "rejecting invalid status transition");
            return Ok(false);
        }

        info!(call_id, from = ?entry.status, to = ?new_status, "call status transition");
        entry.status = new_status;
        // Publish while still holding the entry lock so the event order
        // matches the applied order; the broadcast send never blocks.
        self.hub.publish(CallEvent::CallStatus {
            call_id: call_id.to_string(),
            status: new_status,
        });
        if new_status.is_terminal() {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
        drop(entry);
        Ok(true)
    }

    /// Fetch a session snapshot.
    pub fn get(&self, call_id: &str) -> Option<CallSession> {
        self.calls.get(call_id).map(|s| s.clone())
    }

    /// Sessions not in a terminal status, ordered by creation time.
    pub fn list_active(&self) -> Vec<CallSession> {
        let mut active: Vec<CallSession> = self
            .calls
            .iter()
            .filter(|s| !s.status.is_terminal())
            .map(|s| s.clone())
            .collect();
        active.sort_by_key(|s| s.seq);
        active
    }

    /// All sessions, including terminal ones, ordered by creation time.
    pub fn list_all(&self) -> Vec<CallSession> {
        let mut all: Vec<CallSession> = self.calls.iter().map(|s| s.clone()).collect();
        all.sort_by_key(|s| s.seq);
        all
    }

    /// Delete a terminal session. Idempotent; removing a session that is not
    /// terminal is a caller bug and rejected.
    pub fn remove(&self, call_id: &str) -> AppResult<()> {
        let Some(entry) = self.calls.get(call_id) else {
            return Ok(());
        };
        if !entry.status.is_terminal() {
            return Err(AppError::InvalidRequest(format!(
                "call {call_id} is still active ({:?})",
                entry.status
            )));
        }
        drop(entry);

        if self.calls.remove(call_id).is_some() {
            info!(call_id, "call session removed");
            self.hub.publish(CallEvent::CallRemoved {
                call_id: call_id.to_string(),
            });
        }
        Ok(())
    }

    /// Number of non-terminal sessions.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

//! Orchestrator flow tests.
//!
//! Exercise complete call flows against mocked telephony and agent legs:
//! outbound placement through hangup, inbound acceptance, dial timeouts,
//! and teardown ordering on the event stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use voiceline_relay::agent::{
    AgentConnector, AgentErrorCallback, AgentLeg, AgentResult, AgentSettings, AudioCallback,
    ClosedCallback, TranscriptCallback, UnconfiguredConnector,
};
use voiceline_relay::errors::{AppError, AppResult};
use voiceline_relay::events::{CallEvent, EventHub};
use voiceline_relay::orchestrator::{Orchestrator, OrchestratorSettings};
use voiceline_relay::registry::{CallRegistry, CallStatus};
use voiceline_relay::telephony::CallAutomation;
use voiceline_relay::telephony::events::ConnectionEvent;

/// Telephony control-plane test double recording every vendor interaction.
struct MockTelephony {
    fail_placement: bool,
    placed: AtomicUsize,
    answered: AtomicUsize,
    media_started: AtomicUsize,
    hangups: AtomicUsize,
}

impl MockTelephony {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_placement: false,
            placed: AtomicUsize::new(0),
            answered: AtomicUsize::new(0),
            media_started: AtomicUsize::new(0),
            hangups: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_placement: true,
            placed: AtomicUsize::new(0),
            answered: AtomicUsize::new(0),
            media_started: AtomicUsize::new(0),
            hangups: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CallAutomation for MockTelephony {
    async fn place_call(&self, _target: &str, _source: &str) -> AppResult<String> {
        let n = self.placed.fetch_add(1, Ordering::SeqCst);
        if self.fail_placement {
            return Err(AppError::Upstream("placement refused".to_string()));
        }
        Ok(format!("conn-out-{n}"))
    }

    async fn answer_call(&self, _incoming_context: &str) -> AppResult<String> {
        let n = self.answered.fetch_add(1, Ordering::SeqCst);
        Ok(format!("conn-in-{n}"))
    }

    async fn start_media_streaming(&self, _connection_id: &str) -> AppResult<()> {
        self.media_started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn hang_up(&self, _connection_id: &str) -> AppResult<()> {
        self.hangups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Agent leg that connects instantly and accepts everything.
struct MockLeg {
    ready: Arc<AtomicBool>,
}

#[async_trait]
impl AgentLeg for MockLeg {
    async fn connect(&mut self) -> AgentResult<()> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> AgentResult<()> {
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn send_audio(&self, _audio: Bytes) -> AgentResult<()> {
        Ok(())
    }

    fn on_audio(&mut self, _callback: AudioCallback) {}
    fn on_transcript(&mut self, _callback: TranscriptCallback) {}
    fn on_error(&mut self, _callback: AgentErrorCallback) {}
    fn on_closed(&mut self, _callback: ClosedCallback) {}
}

/// Connector recording the settings of the most recent session it opened.
struct MockConnector {
    sessions: AtomicUsize,
    last_settings: std::sync::Mutex<Option<AgentSettings>>,
}

impl MockConnector {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: AtomicUsize::new(0),
            last_settings: std::sync::Mutex::new(None),
        })
    }

    fn last_instructions(&self) -> Option<String> {
        self.last_settings
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.instructions.clone())
    }
}

impl AgentConnector for MockConnector {
    fn create(&self, settings: AgentSettings) -> AgentResult<Box<dyn AgentLeg>> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        *self.last_settings.lock().unwrap() = Some(settings);
        Ok(Box::new(MockLeg {
            ready: Arc::new(AtomicBool::new(false)),
        }))
    }
}

/// Agent leg whose handshake parks until the test releases it.
struct GatedLeg {
    gate: Arc<tokio::sync::Notify>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl AgentLeg for GatedLeg {
    async fn connect(&mut self) -> AgentResult<()> {
        self.gate.notified().await;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> AgentResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_audio(&self, _audio: Bytes) -> AgentResult<()> {
        Ok(())
    }

    fn on_audio(&mut self, _callback: AudioCallback) {}
    fn on_transcript(&mut self, _callback: TranscriptCallback) {}
    fn on_error(&mut self, _callback: AgentErrorCallback) {}
    fn on_closed(&mut self, _callback: ClosedCallback) {}
}

struct GatedConnector {
    gate: Arc<tokio::sync::Notify>,
    connected: Arc<AtomicBool>,
    sessions: AtomicUsize,
}

impl AgentConnector for GatedConnector {
    fn create(&self, _settings: AgentSettings) -> AgentResult<Box<dyn AgentLeg>> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(GatedLeg {
            gate: self.gate.clone(),
            connected: self.connected.clone(),
        }))
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    telephony: Arc<MockTelephony>,
    connector: Arc<MockConnector>,
    hub: Arc<EventHub>,
}

fn harness_with(
    telephony: Option<Arc<MockTelephony>>,
    source: Option<&str>,
    dial_timeout: Duration,
) -> Harness {
    let hub = Arc::new(EventHub::new(64));
    let registry = Arc::new(CallRegistry::new(8, hub.clone()));
    let telephony = telephony.unwrap_or_else(MockTelephony::new);
    let connector = MockConnector::new();
    let orchestrator = Orchestrator::new(
        registry,
        hub.clone(),
        Some(telephony.clone() as Arc<dyn CallAutomation>),
        connector.clone(),
        OrchestratorSettings {
            model: "gpt-realtime".to_string(),
            voice: "en-US-Ava:DragonHDLatestNeural".to_string(),
            default_instructions: "Be helpful.".to_string(),
            source_phone_number: source.map(str::to_string),
            dial_timeout,
        },
    );
    Harness {
        orchestrator,
        telephony,
        connector,
        hub,
    }
}

fn harness() -> Harness {
    harness_with(None, Some("+15551230000"), Duration::from_secs(45))
}

const TARGET: &str = "+15551234567";

#[tokio::test]
async fn test_outbound_happy_path() {
    let h = harness();
    let call_id = h
        .orchestrator
        .start_outbound_call(TARGET, Some("Sell the thing.".to_string()))
        .await
        .unwrap();

    let session = h.orchestrator.registry().get(&call_id).unwrap();
    assert_eq!(session.status, CallStatus::Dialing);
    assert_eq!(session.phone_number.as_deref(), Some(TARGET));
    assert_eq!(h.telephony.placed.load(Ordering::SeqCst), 1);

    // Vendor reports the phone leg connected: bridge opens with the agenda
    // supplied at placement.
    h.orchestrator
        .handle_connection_event(ConnectionEvent::Connected {
            connection_id: "conn-out-0".to_string(),
        })
        .await;
    let session = h.orchestrator.registry().get(&call_id).unwrap();
    assert_eq!(session.status, CallStatus::Connected);
    assert_eq!(h.telephony.media_started.load(Ordering::SeqCst), 1);
    assert_eq!(h.connector.sessions.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.connector.last_instructions().as_deref(),
        Some("Sell the thing.")
    );
    assert!(h.orchestrator.bridge(&call_id).is_some());

    h.orchestrator.hangup(&call_id).await.unwrap();
    assert_eq!(h.telephony.hangups.load(Ordering::SeqCst), 1);
    assert!(h.orchestrator.registry().get(&call_id).is_none());
    assert!(h.orchestrator.registry().list_active().is_empty());
    assert!(h.orchestrator.bridge(&call_id).is_none());
}

#[tokio::test]
async fn test_outbound_uses_default_agenda_when_omitted() {
    let h = harness();
    let _call_id = h.orchestrator.start_outbound_call(TARGET, None).await.unwrap();
    h.orchestrator
        .handle_connection_event(ConnectionEvent::Connected {
            connection_id: "conn-out-0".to_string(),
        })
        .await;
    assert_eq!(h.connector.last_instructions().as_deref(), Some("Be helpful."));
}

#[tokio::test]
async fn test_hangup_is_idempotent() {
    let h = harness();
    let call_id = h.orchestrator.start_outbound_call(TARGET, None).await.unwrap();

    h.orchestrator.hangup(&call_id).await.unwrap();
    h.orchestrator.hangup(&call_id).await.unwrap();
    assert_eq!(h.telephony.hangups.load(Ordering::SeqCst), 1);

    // Unknown identifiers are a no-op, not an error.
    h.orchestrator.hangup("no-such-call").await.unwrap();
}

#[tokio::test]
async fn test_outbound_rejects_malformed_numbers() {
    let h = harness();
    for bad in ["", "15551234567", "+1555", "+notanumber"] {
        let err = h.orchestrator.start_outbound_call(bad, None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)), "{bad}");
    }
    assert!(h.orchestrator.registry().list_all().is_empty());
    assert_eq!(h.telephony.placed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_outbound_without_source_number_is_not_configured() {
    let h = harness_with(None, None, Duration::from_secs(45));
    let err = h.orchestrator.start_outbound_call(TARGET, None).await.unwrap_err();
    assert!(matches!(err, AppError::NotConfigured(_)));
}

#[tokio::test]
async fn test_placement_failure_leaves_no_session_behind() {
    let h = harness_with(
        Some(MockTelephony::failing()),
        Some("+15551230000"),
        Duration::from_secs(45),
    );
    let err = h.orchestrator.start_outbound_call(TARGET, None).await.unwrap_err();
    assert!(matches!(err, AppError::Upstream(_)));
    assert!(h.orchestrator.registry().list_all().is_empty());
}

#[tokio::test]
async fn test_inbound_without_configured_number_is_not_configured() {
    let h = harness_with(None, None, Duration::from_secs(45));
    let err = h
        .orchestrator
        .accept_inbound_call("ctx-token", Some("+15559990000".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotConfigured(_)));
    assert_eq!(h.telephony.answered.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_inbound_answer_flow() {
    let h = harness();
    let call_id = h
        .orchestrator
        .accept_inbound_call("ctx-token", Some("+15559990000".to_string()))
        .await
        .unwrap();
    assert_eq!(h.telephony.answered.load(Ordering::SeqCst), 1);

    let session = h.orchestrator.registry().get(&call_id).unwrap();
    assert_eq!(session.status, CallStatus::Connecting);
    assert_eq!(session.phone_number.as_deref(), Some("+15559990000"));

    h.orchestrator
        .handle_connection_event(ConnectionEvent::Connected {
            connection_id: "conn-in-0".to_string(),
        })
        .await;
    let session = h.orchestrator.registry().get(&call_id).unwrap();
    assert_eq!(session.status, CallStatus::Connected);
}

#[tokio::test]
async fn test_remote_disconnect_tears_down_without_vendor_hangup() {
    let h = harness();
    let call_id = h.orchestrator.start_outbound_call(TARGET, None).await.unwrap();
    h.orchestrator
        .handle_connection_event(ConnectionEvent::Connected {
            connection_id: "conn-out-0".to_string(),
        })
        .await;

    h.orchestrator
        .handle_connection_event(ConnectionEvent::Disconnected {
            connection_id: "conn-out-0".to_string(),
        })
        .await;

    assert!(h.orchestrator.registry().get(&call_id).is_none());
    assert!(h.orchestrator.bridge(&call_id).is_none());
    // The remote side already ended the connection, nothing to hang up.
    assert_eq!(h.telephony.hangups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_events_for_unknown_connections_are_ignored() {
    let h = harness();
    h.orchestrator
        .handle_connection_event(ConnectionEvent::Connected {
            connection_id: "never-seen".to_string(),
        })
        .await;
    h.orchestrator
        .handle_connection_event(ConnectionEvent::Disconnected {
            connection_id: "never-seen".to_string(),
        })
        .await;
    assert!(h.orchestrator.registry().list_all().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dial_timeout_abandons_unanswered_call() {
    let h = harness_with(None, Some("+15551230000"), Duration::from_secs(5));
    let call_id = h.orchestrator.start_outbound_call(TARGET, None).await.unwrap();
    assert_eq!(
        h.orchestrator.registry().get(&call_id).unwrap().status,
        CallStatus::Dialing
    );

    tokio::time::sleep(Duration::from_secs(6)).await;
    tokio::task::yield_now().await;

    assert!(h.orchestrator.registry().get(&call_id).is_none());
    assert_eq!(h.telephony.hangups.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dial_timeout_leaves_connected_call_alone() {
    let h = harness_with(None, Some("+15551230000"), Duration::from_secs(5));
    let call_id = h.orchestrator.start_outbound_call(TARGET, None).await.unwrap();
    h.orchestrator
        .handle_connection_event(ConnectionEvent::Connected {
            connection_id: "conn-out-0".to_string(),
        })
        .await;

    tokio::time::sleep(Duration::from_secs(6)).await;
    tokio::task::yield_now().await;

    assert_eq!(
        h.orchestrator.registry().get(&call_id).unwrap().status,
        CallStatus::Connected
    );
    assert_eq!(h.telephony.hangups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_browser_call_connects_immediately() {
    let h = harness();
    let (call_id, bridge) = h
        .orchestrator
        .start_browser_call(Some("Chat about the weather.".to_string()))
        .await
        .unwrap();

    let session = h.orchestrator.registry().get(&call_id).unwrap();
    assert_eq!(session.status, CallStatus::Connected);
    assert!(session.phone_number.is_none());
    assert_eq!(
        h.connector.last_instructions().as_deref(),
        Some("Chat about the weather.")
    );
    assert!(bridge.attach_caller().await.is_some());

    h.orchestrator.hangup(&call_id).await.unwrap();
    assert!(h.orchestrator.registry().get(&call_id).is_none());
    // Browser calls have no telephony leg to release.
    assert_eq!(h.telephony.hangups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_browser_call_without_agent_endpoint_fails_clean() {
    let hub = Arc::new(EventHub::new(64));
    let registry = Arc::new(CallRegistry::new(8, hub.clone()));
    let orchestrator = Orchestrator::new(
        registry,
        hub,
        None,
        Arc::new(UnconfiguredConnector),
        OrchestratorSettings {
            model: "gpt-realtime".to_string(),
            voice: "alloy".to_string(),
            default_instructions: "Be helpful.".to_string(),
            source_phone_number: None,
            dial_timeout: Duration::from_secs(45),
        },
    );

    let err = orchestrator.start_browser_call(None).await.unwrap_err();
    assert!(matches!(err, AppError::NotConfigured(_)));
    assert!(orchestrator.registry().list_all().is_empty());
}

#[tokio::test]
async fn test_hangup_during_agent_handshake_leaves_no_bridge() {
    let hub = Arc::new(EventHub::new(64));
    let registry = Arc::new(CallRegistry::new(8, hub.clone()));
    let telephony = MockTelephony::new();
    let gate = Arc::new(tokio::sync::Notify::new());
    let connected = Arc::new(AtomicBool::new(false));
    let connector = Arc::new(GatedConnector {
        gate: gate.clone(),
        connected: connected.clone(),
        sessions: AtomicUsize::new(0),
    });
    let orchestrator = Orchestrator::new(
        registry,
        hub,
        Some(telephony.clone() as Arc<dyn CallAutomation>),
        connector.clone(),
        OrchestratorSettings {
            model: "gpt-realtime".to_string(),
            voice: "alloy".to_string(),
            default_instructions: "Be helpful.".to_string(),
            source_phone_number: Some("+15551230000".to_string()),
            dial_timeout: Duration::from_secs(45),
        },
    );

    let call_id = orchestrator.start_outbound_call(TARGET, None).await.unwrap();
    let handler = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .handle_connection_event(ConnectionEvent::Connected {
                    connection_id: "conn-out-0".to_string(),
                })
                .await;
        })
    };

    // Let the handler reach the parked agent handshake.
    while connector.sessions.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }

    // The caller hangs up while the agent leg is still connecting.
    orchestrator.hangup(&call_id).await.unwrap();
    assert!(orchestrator.registry().get(&call_id).is_none());

    gate.notify_one();
    handler.await.unwrap();

    // The late bridge must not survive the already-finished call, and its
    // agent leg must be closed again.
    assert!(orchestrator.bridge(&call_id).is_none());
    assert!(!connected.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_teardown_event_ordering() {
    let h = harness();
    let mut sub = h.hub.subscribe();

    let call_id = h.orchestrator.start_outbound_call(TARGET, None).await.unwrap();
    h.orchestrator
        .handle_connection_event(ConnectionEvent::Connected {
            connection_id: "conn-out-0".to_string(),
        })
        .await;
    h.orchestrator.hangup(&call_id).await.unwrap();

    let mut seen = Vec::new();
    while let Some(event) = sub.try_next() {
        assert_eq!(event.call_id(), Some(call_id.as_str()));
        seen.push(event);
    }

    assert!(matches!(seen.first(), Some(CallEvent::CallCreated { .. })));
    assert!(matches!(
        seen.get(seen.len() - 2),
        Some(CallEvent::CallStatus {
            status: CallStatus::Ended,
            ..
        })
    ));
    // Removal is the final event for the call; nothing trails it.
    assert!(matches!(seen.last(), Some(CallEvent::CallRemoved { .. })));
}

#[tokio::test]
async fn test_shutdown_hangs_up_every_live_call() {
    let h = harness();
    let a = h.orchestrator.start_outbound_call(TARGET, None).await.unwrap();
    h.orchestrator
        .handle_connection_event(ConnectionEvent::Connected {
            connection_id: "conn-out-0".to_string(),
        })
        .await;
    let (b, _bridge) = h.orchestrator.start_browser_call(None).await.unwrap();

    h.orchestrator.shutdown().await;
    assert!(h.orchestrator.registry().get(&a).is_none());
    assert!(h.orchestrator.registry().get(&b).is_none());
}

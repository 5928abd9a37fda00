//! Inbound/outbound call orchestration.
//!
//! The [`Orchestrator`] owns the flow of every call: it registers sessions,
//! drives the telephony control plane, opens the audio bridge once the
//! phone leg connects, and tears everything down when either side ends the
//! call. The registry is the single source of truth for status; the
//! orchestrator is the only writer.
//!
//! Vendor connection ids never leak past this module. Every session is keyed
//! by a relay-generated call id, with the connection id kept in a private
//! index for webhook correlation.

use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::agent::{AgentConnector, AgentSettings};
use crate::bridge::AudioBridge;
use crate::errors::{AppError, AppResult};
use crate::events::EventHub;
use crate::registry::{CallDirection, CallRegistry, CallStatus};
use crate::telephony::CallAutomation;
use crate::telephony::events::ConnectionEvent;

/// Fixed settings the orchestrator seeds every agent session with.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub model: String,
    pub voice: String,
    /// Agenda used when a request carries none; also the initial inbound
    /// agenda
    pub default_instructions: String,
    /// Caller id for outbound calls
    pub source_phone_number: Option<String>,
    /// A call stuck before `connected` longer than this is abandoned
    pub dial_timeout: Duration,
}

/// Drives calls from acceptance to termination.
pub struct Orchestrator {
    registry: Arc<CallRegistry>,
    hub: Arc<EventHub>,
    telephony: Option<Arc<dyn CallAutomation>>,
    connector: Arc<dyn AgentConnector>,
    settings: OrchestratorSettings,

    /// call id -> live bridge
    bridges: DashMap<String, Arc<AudioBridge>>,
    /// vendor connection id -> call id
    by_connection: DashMap<String, String>,
    /// call id -> vendor connection id
    connection_of: DashMap<String, String>,
    /// call id -> agenda, held until the phone leg connects and the bridge
    /// can start
    pending_agendas: DashMap<String, String>,
    /// Instructions for future inbound calls; calls in progress keep the
    /// agenda they started with
    inbound_agenda: ArcSwap<String>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<CallRegistry>,
        hub: Arc<EventHub>,
        telephony: Option<Arc<dyn CallAutomation>>,
        connector: Arc<dyn AgentConnector>,
        settings: OrchestratorSettings,
    ) -> Arc<Self> {
        let inbound_agenda = ArcSwap::from_pointee(settings.default_instructions.clone());
        Arc::new(Self {
            registry,
            hub,
            telephony,
            connector,
            settings,
            bridges: DashMap::new(),
            by_connection: DashMap::new(),
            connection_of: DashMap::new(),
            pending_agendas: DashMap::new(),
            inbound_agenda,
        })
    }

    pub fn registry(&self) -> &Arc<CallRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// Current agenda for future inbound calls.
    pub fn inbound_agenda(&self) -> Arc<String> {
        self.inbound_agenda.load_full()
    }

    /// Replace the agenda used for future inbound calls. Calls already in
    /// progress are unaffected.
    pub fn set_inbound_agenda(&self, instructions: String) {
        info!("inbound agenda updated ({} chars)", instructions.len());
        self.inbound_agenda.store(Arc::new(instructions));
    }

    /// Bridge for a live call, used by caller transports to adopt it.
    pub fn bridge(&self, call_id: &str) -> Option<Arc<AudioBridge>> {
        self.bridges.get(call_id).map(|b| b.value().clone())
    }

    /// Resolve a vendor connection id to a relay call id.
    pub fn call_id_for_connection(&self, connection_id: &str) -> Option<String> {
        self.by_connection.get(connection_id).map(|c| c.clone())
    }

    fn telephony(&self) -> AppResult<&Arc<dyn CallAutomation>> {
        self.telephony
            .as_ref()
            .ok_or_else(|| AppError::NotConfigured("telephony is not configured".to_string()))
    }

    /// Place an outbound phone call. The returned call id is already
    /// registered with status `dialing`; the bridge opens once the phone
    /// leg reports connected.
    pub async fn start_outbound_call(
        self: &Arc<Self>,
        target_number: &str,
        agenda: Option<String>,
    ) -> AppResult<String> {
        validate_phone_number(target_number)?;
        let source = self
            .settings
            .source_phone_number
            .clone()
            .ok_or_else(|| {
                AppError::NotConfigured("no source phone number for outbound calls".to_string())
            })?;
        let telephony = self.telephony()?.clone();

        let call_id = self
            .registry
            .create_call(CallDirection::Outbound, Some(target_number.to_string()))?
            .call_id;

        let connection_id = match telephony.place_call(target_number, &source).await {
            Ok(id) => id,
            Err(e) => {
                error!(call_id, "outbound placement failed: {e}");
                self.finish_call(&call_id, CallStatus::Disconnected).await;
                return Err(e);
            }
        };

        self.index_connection(&call_id, &connection_id);
        let agenda = agenda
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| self.settings.default_instructions.clone());
        self.pending_agendas.insert(call_id.clone(), agenda);
        self.spawn_dial_watchdog(&call_id);

        info!(call_id, connection_id, target_number, "outbound call initiated");
        Ok(call_id)
    }

    /// Answer an incoming phone call offer. Errors here are the webhook
    /// handler's to swallow; the vendor must always get its acknowledgement.
    pub async fn accept_inbound_call(
        self: &Arc<Self>,
        incoming_context: &str,
        from_number: Option<String>,
    ) -> AppResult<String> {
        if self.settings.source_phone_number.is_none() {
            return Err(AppError::NotConfigured(
                "no inbound phone number configured".to_string(),
            ));
        }
        let telephony = self.telephony()?.clone();

        let call_id = self
            .registry
            .create_call(CallDirection::Inbound, from_number)?
            .call_id;

        let connection_id = match telephony.answer_call(incoming_context).await {
            Ok(id) => id,
            Err(e) => {
                error!(call_id, "failed to answer inbound call: {e}");
                self.finish_call(&call_id, CallStatus::Disconnected).await;
                return Err(e);
            }
        };

        self.index_connection(&call_id, &connection_id);
        self.pending_agendas
            .insert(call_id.clone(), self.inbound_agenda().as_str().to_string());
        self.spawn_dial_watchdog(&call_id);

        info!(call_id, connection_id, "inbound call answered");
        Ok(call_id)
    }

    /// Start a browser voice session. There is no phone leg, so the bridge
    /// opens immediately and the session goes straight to `connected`.
    pub async fn start_browser_call(
        self: &Arc<Self>,
        agenda: Option<String>,
    ) -> AppResult<(String, Arc<AudioBridge>)> {
        let call_id = self.registry.create_call(CallDirection::Inbound, None)?.call_id;
        let agenda = agenda
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| self.inbound_agenda().as_str().to_string());

        let bridge = match self.open_bridge(&call_id, agenda).await {
            Ok(bridge) => bridge,
            Err(e) => {
                error!(call_id, "failed to open browser bridge: {e}");
                self.finish_call(&call_id, CallStatus::Disconnected).await;
                return Err(e);
            }
        };
        let _ = self.registry.update_status(&call_id, CallStatus::Connected);

        info!(call_id, "browser call started");
        Ok((call_id, bridge))
    }

    /// Process one vendor connection event from the callback webhook.
    pub async fn handle_connection_event(self: &Arc<Self>, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { connection_id } => {
                let Some(call_id) = self.call_id_for_connection(&connection_id) else {
                    warn!(connection_id, "connected event for unknown connection");
                    return;
                };
                let _ = self.registry.update_status(&call_id, CallStatus::Connected);

                if let Some(telephony) = self.telephony.as_ref()
                    && let Err(e) = telephony.start_media_streaming(&connection_id).await
                {
                    // The answer path starts media itself; a failure here is
                    // only fatal if no audio ever arrives
                    warn!(call_id, "failed to start media streaming: {e}");
                }

                let agenda = self
                    .pending_agendas
                    .remove(&call_id)
                    .map(|(_, a)| a)
                    .unwrap_or_else(|| self.settings.default_instructions.clone());
                if let Err(e) = self.open_bridge(&call_id, agenda).await {
                    error!(call_id, "failed to open bridge: {e}");
                    self.hangup(&call_id).await.ok();
                }
            }

            ConnectionEvent::Disconnected { connection_id } => {
                let Some(call_id) = self.call_id_for_connection(&connection_id) else {
                    return;
                };
                info!(call_id, "phone leg disconnected");
                self.finish_call(&call_id, CallStatus::Disconnected).await;
            }

            ConnectionEvent::Other { event_type } => {
                tracing::debug!(event_type, "ignoring connection event");
            }
        }
    }

    /// Hang up a call, whatever state it is in. Idempotent: hanging up an
    /// unknown or already-ended call is a no-op.
    pub async fn hangup(self: &Arc<Self>, call_id: &str) -> AppResult<()> {
        let Some(session) = self.registry.get(call_id) else {
            return Ok(());
        };
        if session.status.is_terminal() {
            return Ok(());
        }

        if let Some((_, connection_id)) = self.connection_of.remove(call_id) {
            self.by_connection.remove(&connection_id);
            if let Some(telephony) = self.telephony.as_ref()
                && let Err(e) = telephony.hang_up(&connection_id).await
            {
                // The registry still goes to ended; the vendor leg will time
                // itself out
                warn!(call_id, "vendor hangup failed: {e}");
            }
        }

        self.finish_call(call_id, CallStatus::Ended).await;
        info!(call_id, "call hung up");
        Ok(())
    }

    /// Open the audio bridge for a call and index it.
    async fn open_bridge(
        self: &Arc<Self>,
        call_id: &str,
        agenda: String,
    ) -> AppResult<Arc<AudioBridge>> {
        let leg = self
            .connector
            .create(AgentSettings {
                endpoint: String::new(),
                api_key: String::new(),
                model: self.settings.model.clone(),
                voice: self.settings.voice.clone(),
                instructions: agenda,
                call_id: call_id.to_string(),
            })
            .map_err(|e| AppError::NotConfigured(e.to_string()))?;

        let this = Arc::downgrade(self);
        let id = call_id.to_string();
        let on_failure = Arc::new(move |reason: String| {
            let this: Weak<Orchestrator> = this.clone();
            let id = id.clone();
            Box::pin(async move {
                if let Some(orch) = this.upgrade() {
                    warn!(call_id = %id, "agent leg failed: {reason}");
                    orch.finish_call(&id, CallStatus::Disconnected).await;
                }
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        });

        let bridge = Arc::new(
            AudioBridge::start(call_id.to_string(), leg, self.hub.clone(), on_failure).await?,
        );
        self.bridges.insert(call_id.to_string(), bridge.clone());

        // The call may have been hung up while the agent handshake was in
        // flight; finish_call already ran against an empty bridges entry, so
        // the teardown falls to us.
        match self.registry.get(call_id) {
            Some(session) if !session.status.is_terminal() => Ok(bridge),
            _ => {
                self.bridges.remove(call_id);
                bridge.shutdown().await;
                Err(AppError::NotFound(format!(
                    "call {call_id} ended during bridge setup"
                )))
            }
        }
    }

    /// Abandon the call if it never reaches `connected` within the dial
    /// timeout.
    fn spawn_dial_watchdog(self: &Arc<Self>, call_id: &str) {
        let this = Arc::downgrade(self);
        let call_id = call_id.to_string();
        let timeout = self.settings.dial_timeout;
        tokio::spawn(async move {
            sleep(timeout).await;
            let Some(orch) = this.upgrade() else { return };
            let Some(session) = orch.registry.get(&call_id) else {
                return;
            };
            if matches!(session.status, CallStatus::Dialing | CallStatus::Connecting) {
                warn!(call_id, "dial timeout, abandoning call");
                if let Some((_, connection_id)) = orch.connection_of.remove(&call_id) {
                    orch.by_connection.remove(&connection_id);
                    if let Some(telephony) = orch.telephony.as_ref() {
                        let _ = telephony.hang_up(&connection_id).await;
                    }
                }
                orch.finish_call(&call_id, CallStatus::Disconnected).await;
            }
        });
    }

    fn index_connection(&self, call_id: &str, connection_id: &str) {
        self.by_connection
            .insert(connection_id.to_string(), call_id.to_string());
        self.connection_of
            .insert(call_id.to_string(), connection_id.to_string());
    }

    /// Common teardown: close the bridge first so no transcript can trail
    /// the removal event, then drive the registry to its terminal state and
    /// drop the entry.
    async fn finish_call(&self, call_id: &str, status: CallStatus) {
        if let Some((_, bridge)) = self.bridges.remove(call_id) {
            bridge.shutdown().await;
        }
        if let Some((_, connection_id)) = self.connection_of.remove(call_id) {
            self.by_connection.remove(&connection_id);
        }
        self.pending_agendas.remove(call_id);

        match self.registry.update_status(call_id, status) {
            Ok(_) | Err(AppError::NotFound(_)) => {}
            Err(e) => warn!(call_id, "terminal transition failed: {e}"),
        }
        if let Err(e) = self.registry.remove(call_id) {
            warn!(call_id, "failed to remove call entry: {e}");
        }
    }

    /// Close every live call; used during shutdown.
    pub async fn shutdown(self: &Arc<Self>) {
        let call_ids: Vec<String> = self.bridges.iter().map(|e| e.key().clone()).collect();
        for call_id in call_ids {
            self.hangup(&call_id).await.ok();
        }
    }
}

/// E.164-ish check: leading `+` and 7..=15 digits.
fn validate_phone_number(number: &str) -> AppResult<()> {
    let digits = number.strip_prefix('+').unwrap_or(number);
    if number.trim().is_empty() {
        return Err(AppError::InvalidRequest(
            "target phone number is required".to_string(),
        ));
    }
    if !number.starts_with('+')
        || digits.len() < 7
        || digits.len() > 15
        || !digits.chars().all(|c| c.is_ascii_digit())
    {
        return Err(AppError::InvalidRequest(format!(
            "malformed phone number: {number}"
        )));
    }
    Ok(())
}

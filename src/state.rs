//! Shared application state.
//!
//! One [`AppState`] is built at startup and handed to every handler as
//! `State<Arc<AppState>>`. It wires the registry, event hub and orchestrator
//! together and owns the optional recording store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;

use crate::agent::{AgentConnector, UnconfiguredConnector, VoiceLiveConnector};
use crate::config::ServerConfig;
use crate::events::EventHub;
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::registry::CallRegistry;
use crate::telephony::CallAutomationClient;

/// Shared state for all request handlers.
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub orchestrator: Arc<Orchestrator>,
    /// Recording storage, when configured
    pub object_store: Option<Arc<dyn ObjectStore>>,
    /// Live WebSocket connections, bounded by `config.max_ws_connections`
    ws_connections: AtomicUsize,
}

impl AppState {
    /// Wire up all components from configuration.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let config = Arc::new(config);
        let hub = Arc::new(EventHub::new(config.event_buffer_capacity));
        let registry = Arc::new(CallRegistry::new(
            config.max_concurrent_calls,
            hub.clone(),
        ));

        let telephony = match (
            config.telephony_endpoint.as_deref(),
            config.telephony_access_token.as_deref(),
        ) {
            (Some(endpoint), Some(token)) => Some(Arc::new(CallAutomationClient::new(
                endpoint,
                token,
                &config.public_base_url,
            )) as Arc<dyn crate::telephony::CallAutomation>),
            _ => None,
        };

        let connector: Arc<dyn AgentConnector> = match (
            config.voice_ai_endpoint.clone(),
            config.voice_ai_api_key.clone(),
        ) {
            (Some(endpoint), Some(api_key)) => Arc::new(VoiceLiveConnector { endpoint, api_key }),
            _ => Arc::new(UnconfiguredConnector),
        };

        let orchestrator = Orchestrator::new(
            registry,
            hub,
            telephony,
            connector,
            OrchestratorSettings {
                model: config.voice_ai_model.clone(),
                voice: config.voice_ai_voice.clone(),
                default_instructions: config.default_instructions.clone(),
                source_phone_number: config.source_phone_number.clone(),
                dial_timeout: Duration::from_secs(config.dial_timeout_seconds),
            },
        );

        let object_store = build_object_store(&config)?;

        Ok(Arc::new(Self {
            config,
            orchestrator,
            object_store,
            ws_connections: AtomicUsize::new(0),
        }))
    }

    /// Try to claim a WebSocket connection slot. Returns false at the limit.
    pub fn try_acquire_ws_slot(&self) -> bool {
        let mut current = self.ws_connections.load(Ordering::SeqCst);
        loop {
            if current >= self.config.max_ws_connections {
                return false;
            }
            match self.ws_connections.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Release a slot claimed with [`Self::try_acquire_ws_slot`].
    pub fn release_ws_slot(&self) {
        self.ws_connections.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::SeqCst)
    }
}

fn build_object_store(
    config: &ServerConfig,
) -> Result<Option<Arc<dyn ObjectStore>>, Box<dyn std::error::Error>> {
    let Some(bucket) = config.s3_bucket.as_deref() else {
        return Ok(None);
    };

    let mut builder = AmazonS3Builder::new().with_bucket_name(bucket);
    if let Some(region) = config.s3_region.as_deref() {
        builder = builder.with_region(region);
    }
    if let Some(endpoint) = config.s3_endpoint.as_deref() {
        builder = builder.with_endpoint(endpoint).with_allow_http(true);
    }
    if let (Some(access_key), Some(secret_key)) =
        (config.s3_access_key.as_deref(), config.s3_secret_key.as_deref())
    {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    let store = builder
        .build()
        .map_err(|e| format!("failed to configure recording storage: {e}"))?;
    Ok(Some(Arc::new(store)))
}

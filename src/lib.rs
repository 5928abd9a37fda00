//! Voiceline Relay - realtime call-state relay between phone/browser callers
//! and a voice-AI realtime endpoint.
//!
//! The relay tracks call sessions in an in-memory registry, bridges audio
//! between a caller transport (telephony media stream or browser WebSocket)
//! and the voice-AI socket, and fans lifecycle/transcript events out to UI
//! subscribers.

pub mod agent;
pub mod bridge;
pub mod config;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware;
pub mod orchestrator;
pub mod registry;
pub mod routes;
pub mod state;
pub mod telephony;

// Re-export commonly used items for convenience
pub use config::ServerConfig;
pub use errors::{AppError, AppResult};
pub use events::{CallEvent, EventHub};
pub use orchestrator::Orchestrator;
pub use registry::{CallRegistry, CallSession, CallStatus};
pub use state::AppState;

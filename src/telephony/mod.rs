//! Telephony control plane.
//!
//! The relay drives phone calls through a vendor call-automation REST API:
//! placing outbound calls, answering inbound offers, starting the media
//! stream, and hanging up. [`CallAutomation`] is the seam the orchestrator
//! depends on, so call flows are testable without a vendor account.

pub mod client;
pub mod events;

pub use client::CallAutomationClient;

use async_trait::async_trait;

use crate::errors::AppResult;

/// Vendor call-control operations used by the orchestrator.
///
/// All identifiers here are vendor connection ids, never relay call ids;
/// the orchestrator owns that mapping.
#[async_trait]
pub trait CallAutomation: Send + Sync {
    /// Place an outbound call from `source` to `target`. Returns the vendor
    /// connection id once placement is accepted.
    async fn place_call(&self, target: &str, source: &str) -> AppResult<String>;

    /// Answer an incoming call using the opaque offer context from the
    /// webhook. Returns the vendor connection id.
    async fn answer_call(&self, incoming_context: &str) -> AppResult<String>;

    /// Start bidirectional media streaming on a connected call.
    async fn start_media_streaming(&self, connection_id: &str) -> AppResult<()>;

    /// Hang up for everyone on the call. Idempotent at the vendor: hanging
    /// up a finished connection is not an error for callers of this trait.
    async fn hang_up(&self, connection_id: &str) -> AppResult<()>;
}

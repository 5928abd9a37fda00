//! HTTP and WebSocket request handlers.

pub mod api;
pub mod client_ws;
pub mod events;
pub mod media;
pub mod webhook;

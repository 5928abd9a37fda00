//! Telephony webhook payload parsing.
//!
//! Two distinct shapes arrive at the webhook endpoints:
//! - the incoming-call notification, delivered through an event-grid
//!   envelope that also carries the one-time subscription validation
//!   handshake, and
//! - mid-call connection events (`CallConnected` / `CallDisconnected`)
//!   posted to the callback URL registered at placement time.
//!
//! Payloads are loosely typed on the wire; parsing normalizes them into
//! closed enums so every consumer matches exhaustively.

use serde_json::Value;

use crate::errors::{AppError, AppResult};

/// Event-grid subscription validation event type.
const VALIDATION_EVENT_TYPE: &str = "Microsoft.EventGrid.SubscriptionValidationEvent";

/// Normalized incoming-call webhook payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundNotification {
    /// Subscription validation handshake; echo the code back and do nothing
    /// else.
    Validation { code: String },

    /// A real incoming call offer.
    IncomingCall {
        /// Opaque context required to answer the call
        context: String,
        /// Caller's phone number when present
        from_number: Option<String>,
    },
}

/// Parse the body posted to the inbound-call webhook.
pub fn parse_inbound(body: &Value) -> AppResult<InboundNotification> {
    // Validation handshakes arrive as a one-element event list
    if let Some(events) = body.as_array() {
        let event = events
            .first()
            .ok_or_else(|| AppError::InvalidRequest("empty event list".to_string()))?;
        if event.get("eventType").and_then(Value::as_str) == Some(VALIDATION_EVENT_TYPE) {
            let code = event
                .pointer("/data/validationCode")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    AppError::InvalidRequest("validation event without code".to_string())
                })?;
            return Ok(InboundNotification::Validation {
                code: code.to_string(),
            });
        }
        // Incoming-call offers can also arrive wrapped in the envelope
        if let Some(data) = event.get("data") {
            return parse_incoming_call(data);
        }
        return Err(AppError::InvalidRequest(
            "unrecognized event envelope".to_string(),
        ));
    }

    parse_incoming_call(body)
}

fn parse_incoming_call(body: &Value) -> AppResult<InboundNotification> {
    let context = body
        .get("incomingCallContext")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::InvalidRequest("missing incomingCallContext".to_string()))?;
    let from_number = body
        .pointer("/from/phoneNumber/value")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(InboundNotification::IncomingCall {
        context: context.to_string(),
        from_number,
    })
}

/// Mid-call connection event posted to the callback URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The telephony leg is up; media can start flowing
    Connected { connection_id: String },
    /// The telephony leg ended, whichever side hung up
    Disconnected { connection_id: String },
    /// Event types the relay does not act on
    Other { event_type: String },
}

/// Parse the body posted to the connection-events callback. The vendor may
/// batch events, so a single object is treated as a one-element batch.
pub fn parse_connection_events(body: &Value) -> Vec<ConnectionEvent> {
    let events: Vec<&Value> = match body.as_array() {
        Some(list) => list.iter().collect(),
        None => vec![body],
    };

    events
        .iter()
        .filter_map(|event| {
            let event_type = event.get("type").and_then(Value::as_str)?;
            let connection_id = event
                .pointer("/data/callConnectionId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(match event_type {
                "Microsoft.Communication.CallConnected" => {
                    ConnectionEvent::Connected { connection_id }
                }
                "Microsoft.Communication.CallDisconnected" => {
                    ConnectionEvent::Disconnected { connection_id }
                }
                other => ConnectionEvent::Other {
                    event_type: other.to_string(),
                },
            })
        })
        .collect()
}

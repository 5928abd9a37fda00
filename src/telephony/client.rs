//! Vendor call-automation REST client.
//!
//! Talks to the call-control API: create/answer/hang-up call connections and
//! start the media stream. Every call is registered with the same callback
//! URL (`/api/calls/events`) and media transport URL (`/ws/media`), both
//! derived from the configured public base URL.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::CallAutomation;
use crate::errors::{AppError, AppResult};

/// Call-control REST API version.
const API_VERSION: &str = "2024-04-15-preview";

/// Request timeout for control-plane calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Transient placement failures get one retry before surfacing upstream.
const PLACEMENT_ATTEMPTS: usize = 2;

/// REST client for the telephony call-automation API.
pub struct CallAutomationClient {
    endpoint: String,
    access_token: String,
    callback_url: String,
    media_transport_url: String,
    client: reqwest::Client,
}

impl CallAutomationClient {
    /// `public_base_url` is this relay's externally reachable HTTPS base;
    /// the vendor posts connection events and opens the media socket
    /// against it.
    pub fn new(endpoint: &str, access_token: &str, public_base_url: &str) -> Self {
        let base = public_base_url.trim_end_matches('/');
        let ws_base = base
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            callback_url: format!("{base}/api/calls/events"),
            media_transport_url: format!("{ws_base}/ws/media"),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}?api-version={API_VERSION}", self.endpoint)
    }

    /// Media streaming options shared by placement and answer: bidirectional
    /// mixed-channel PCM16 at 24 kHz over WebSocket, matching the agent leg.
    fn media_streaming_options(&self, start_immediately: bool) -> Value {
        json!({
            "transportUrl": self.media_transport_url,
            "transportType": "websocket",
            "contentType": "audio",
            "audioChannelType": "mixed",
            "enableBidirectional": true,
            "audioFormat": "Pcm24KMono",
            "startMediaStreaming": start_immediately,
        })
    }

    async fn post_json(&self, url: &str, body: &Value) -> AppResult<Value> {
        let response = self
            .client
            .post(url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("telephony request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "telephony API returned {status}: {detail}"
            )));
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("invalid telephony response: {e}")))
    }

    fn connection_id_from(response: &Value) -> AppResult<String> {
        response
            .get("callConnectionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::Upstream("telephony response missing callConnectionId".to_string())
            })
    }
}

#[async_trait]
impl CallAutomation for CallAutomationClient {
    async fn place_call(&self, target: &str, source: &str) -> AppResult<String> {
        let body = json!({
            "targets": [{
                "kind": "phoneNumber",
                "phoneNumber": {"value": target},
            }],
            "sourceCallerIdNumber": {"value": source},
            "callbackUri": self.callback_url,
            // Media starts once the connected event arrives, not at placement
            "mediaStreamingOptions": self.media_streaming_options(false),
        });
        let url = self.url("/calling/callConnections");

        let mut last_err = None;
        for attempt in 1..=PLACEMENT_ATTEMPTS {
            match self.post_json(&url, &body).await {
                Ok(response) => {
                    let id = Self::connection_id_from(&response)?;
                    tracing::info!(connection_id = %id, target, "outbound call placed");
                    return Ok(id);
                }
                Err(e) => {
                    tracing::warn!(attempt, "call placement failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| AppError::Upstream("call placement failed".to_string())))
    }

    async fn answer_call(&self, incoming_context: &str) -> AppResult<String> {
        let body = json!({
            "incomingCallContext": incoming_context,
            "callbackUri": self.callback_url,
            "mediaStreamingOptions": self.media_streaming_options(true),
        });
        let response = self
            .post_json(&self.url("/calling/callConnections:answer"), &body)
            .await?;
        let id = Self::connection_id_from(&response)?;
        tracing::info!(connection_id = %id, "inbound call answered");
        Ok(id)
    }

    async fn start_media_streaming(&self, connection_id: &str) -> AppResult<()> {
        let url = self.url(&format!(
            "/calling/callConnections/{connection_id}:startMediaStreaming"
        ));
        self.post_json(&url, &json!({})).await?;
        tracing::info!(connection_id, "media streaming started");
        Ok(())
    }

    async fn hang_up(&self, connection_id: &str) -> AppResult<()> {
        let url = self.url(&format!("/calling/callConnections/{connection_id}"));
        let response = self
            .client
            .delete(&url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("telephony request failed: {e}")))?;

        let status = response.status();
        // 404 means the connection already ended; hangup stays idempotent
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "hangup returned {status}: {detail}"
            )));
        }
        tracing::info!(connection_id, "call hung up");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_derived_from_public_base() {
        let client = CallAutomationClient::new(
            "https://acs.example.com/",
            "token",
            "https://relay.example.com/",
        );
        assert_eq!(client.callback_url, "https://relay.example.com/api/calls/events");
        assert_eq!(client.media_transport_url, "wss://relay.example.com/ws/media");
        assert!(client.url("/calling/callConnections").starts_with(
            "https://acs.example.com/calling/callConnections?api-version="
        ));
    }

    #[test]
    fn test_media_options_shape() {
        let client =
            CallAutomationClient::new("https://acs.example.com", "token", "http://localhost:8000");
        let options = client.media_streaming_options(false);
        assert_eq!(options["transportUrl"], "ws://localhost:8000/ws/media");
        assert_eq!(options["audioFormat"], "Pcm24KMono");
        assert_eq!(options["enableBidirectional"], true);
        assert_eq!(options["startMediaStreaming"], false);
    }

    #[test]
    fn test_connection_id_extraction() {
        let ok = serde_json::json!({"callConnectionId": "cc-1"});
        assert_eq!(CallAutomationClient::connection_id_from(&ok).unwrap(), "cc-1");
        let missing = serde_json::json!({});
        assert!(CallAutomationClient::connection_id_from(&missing).is_err());
    }
}

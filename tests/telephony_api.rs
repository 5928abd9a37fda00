//! Call-automation REST client tests against a mocked vendor API.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use voiceline_relay::errors::AppError;
use voiceline_relay::telephony::{CallAutomation, CallAutomationClient};

fn client_for(server: &MockServer) -> CallAutomationClient {
    CallAutomationClient::new(&server.uri(), "test-token", "https://relay.example.com")
}

#[tokio::test]
async fn test_place_call_sends_expected_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/calling/callConnections"))
        .and(query_param("api-version", "2024-04-15-preview"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "targets": [{
                "kind": "phoneNumber",
                "phoneNumber": {"value": "+15551234567"},
            }],
            "sourceCallerIdNumber": {"value": "+15551230000"},
            "callbackUri": "https://relay.example.com/api/calls/events",
            "mediaStreamingOptions": {
                "transportUrl": "wss://relay.example.com/ws/media",
                "audioFormat": "Pcm24KMono",
                "enableBidirectional": true,
                "startMediaStreaming": false,
            },
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "callConnectionId": "cc-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let id = client.place_call("+15551234567", "+15551230000").await.unwrap();
    assert_eq!(id, "cc-1");
}

#[tokio::test]
async fn test_place_call_retries_once_on_transient_failure() {
    let server = MockServer::start().await;
    // First attempt fails, mounted mocks match in order until exhausted.
    Mock::given(method("POST"))
        .and(path("/calling/callConnections"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/calling/callConnections"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "callConnectionId": "cc-2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let id = client.place_call("+15551234567", "+15551230000").await.unwrap();
    assert_eq!(id, "cc-2");
}

#[tokio::test]
async fn test_place_call_surfaces_persistent_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/calling/callConnections"))
        .respond_with(ResponseTemplate::new(503).set_body_string("vendor down"))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.place_call("+15551234567", "+15551230000").await.unwrap_err();
    assert!(matches!(err, AppError::Upstream(_)));
}

#[tokio::test]
async fn test_place_call_without_connection_id_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/calling/callConnections"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"unexpected": true})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.place_call("+15551234567", "+15551230000").await.unwrap_err();
    assert!(matches!(err, AppError::Upstream(_)));
}

#[tokio::test]
async fn test_answer_call_starts_media_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/calling/callConnections:answer"))
        .and(body_partial_json(json!({
            "incomingCallContext": "ctx-token",
            "mediaStreamingOptions": {"startMediaStreaming": true},
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "callConnectionId": "cc-in-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let id = client.answer_call("ctx-token").await.unwrap();
    assert_eq!(id, "cc-in-1");
}

#[tokio::test]
async fn test_start_media_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/calling/callConnections/cc-5:startMediaStreaming"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.start_media_streaming("cc-5").await.unwrap();
}

#[tokio::test]
async fn test_hang_up_tolerates_already_gone_connection() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/calling/callConnections/cc-9"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.hang_up("cc-9").await.unwrap();
}

#[tokio::test]
async fn test_hang_up_surfaces_other_failures() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/calling/callConnections/cc-9"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.hang_up("cc-9").await.unwrap_err();
    assert!(matches!(err, AppError::Upstream(_)));
}

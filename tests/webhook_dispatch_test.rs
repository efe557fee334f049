//! Exercises webhook dispatch against a real HTTP server instead of a
//! mocked `reqwest::Client`, so the request actually observed on the wire
//! (headers, signature, body) is what gets asserted on.

use chrono::Utc;
use netwatcher_controller::alert::{dispatch_webhook, WebhookPayload};
use std::time::Duration;
use test_log::test;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sample_payload() -> WebhookPayload {
    WebhookPayload {
        alert_id: "11111111-1111-1111-1111-111111111111".to_string(),
        workspace_id: "22222222-2222-2222-2222-222222222222".to_string(),
        probe_id: None,
        agent_id: None,
        metric: "packet_loss".to_string(),
        value: 12.5,
        threshold: 5.0,
        severity: "warning".to_string(),
        message: "packet loss exceeded threshold".to_string(),
        triggered_at: Utc::now(),
    }
}

#[test(tokio::test)]
async fn unsigned_dispatch_omits_signature_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let url = format!("{}/hook", server.uri());
    dispatch_webhook(&client, &url, None, &sample_payload(), Duration::from_secs(5))
        .await
        .expect("unsigned dispatch should succeed");
}

#[test(tokio::test)]
async fn signed_dispatch_carries_hmac_signature_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header_exists("X-Signature"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let url = format!("{}/hook", server.uri());
    dispatch_webhook(&client, &url, Some("topsecret"), &sample_payload(), Duration::from_secs(5))
        .await
        .expect("signed dispatch should succeed");
}

#[test(tokio::test)]
async fn server_error_status_surfaces_as_dispatch_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let url = format!("{}/hook", server.uri());
    let result = dispatch_webhook(&client, &url, None, &sample_payload(), Duration::from_secs(5)).await;
    assert!(result.is_err());
}

//! Shared fixtures: a wiremock REST gateway and a local frame server that
//! speaks the gateway's `<len>|<json>` stream protocol.

use dxtrade_client::DxtradeConfig;
use futures_util::SinkExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SESSION_COOKIE: &str = "JSESSIONID=abc123";
pub const CSRF_TOKEN: &str = "test-csrf-token";
pub const TRACKING_ID: &str = "550e8400-e29b-41d4-a716-446655440000";

/// Encode one envelope the way the gateway frames it.
pub fn envelope(kind: &str, account_id: Option<&str>, body: Value) -> String {
    let payload = json!({"type": kind, "accountId": account_id, "body": body}).to_string();
    format!("{}|{}", payload.len(), payload)
}

/// First frame of a fresh connection, carrying the tracking id prefix.
pub fn tracking_frame() -> String {
    format!("{TRACKING_ID}|0|X")
}

/// Serve the given frames, in order, to every accepted connection, then
/// hold the connection open.
pub async fn spawn_frame_server(frames: Vec<String>) -> String {
    let script = frames
        .into_iter()
        .map(|frame| (Duration::from_millis(20), frame))
        .collect();
    spawn_scripted_server(script).await
}

/// As [`spawn_frame_server`], but with an explicit delay before each frame,
/// for scenarios where the gap between frames is the behavior under test.
pub async fn spawn_scripted_server(script: Vec<(Duration, String)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let script = script.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(socket).await else {
                    return;
                };
                for (delay, frame) in script {
                    tokio::time::sleep(delay).await;
                    if ws.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });

    format!("ws://{addr}")
}

/// Mount the login and CSRF-page mocks every session test needs.
pub async fn mount_session_mocks(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", format!("{SESSION_COOKIE}; Path=/").as_str())
                .set_body_json(json!({})),
        )
        .mount(server)
        .await;

    // The CSRF page only renders the token for an authenticated session.
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("cookie", SESSION_COOKIE))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><head><meta name="csrf" content="{CSRF_TOKEN}"/></head></html>"#
        )))
        .mount(server)
        .await;

    // Preflight hits the root before login, without cookies.
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(server)
        .await;
}

pub fn test_config(rest_url: &str, stream_url: &str) -> DxtradeConfig {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    DxtradeConfig::new("trader", "hunter2", "testbroker")
        .with_base_url(rest_url)
        .with_stream_url(stream_url)
        .with_retries(1)
        .with_timeout(Duration::from_secs(5))
}

/// Frames for a successful handshake followed by a position snapshot.
pub fn standard_frames() -> Vec<String> {
    vec![
        tracking_frame(),
        envelope("ACCOUNT", Some("ACC-1"), json!({})),
        envelope(
            "POSITIONS",
            Some("ACC-1"),
            json!([
                {
                    "uid": "u1",
                    "positionKey": {"instrumentId": 3438, "positionCode": "POS-1"},
                    "quantity": 1000.0
                },
                {
                    "uid": "u2",
                    "positionKey": {"instrumentId": 3439, "positionCode": "POS-2"},
                    "quantity": -500.0
                }
            ]),
        ),
        envelope(
            "POSITION_METRICS",
            Some("ACC-1"),
            json!([
                {"uid": "u1", "plOpen": 5.5, "margin": 10},
                {"uid": "u2", "plOpen": -1.25, "margin": 4}
            ]),
        ),
    ]
}

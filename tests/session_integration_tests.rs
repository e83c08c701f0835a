mod common;

use common::*;
use dxtrade_client::{DxtradeClient, DxtradeError};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn login_merges_session_cookies_used_by_later_requests() {
    let server = MockServer::start().await;
    mount_session_mocks(&server).await;

    // The suggest endpoint only answers requests carrying the session
    // cookie received at login.
    Mock::given(method("GET"))
        .and(path("/api/suggest"))
        .and(header("cookie", SESSION_COOKIE))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "suggests": [{"id": 3438, "name": "EUR/USD"}]
        })))
        .mount(&server)
        .await;

    let client = DxtradeClient::new(test_config(&server.uri(), "ws://127.0.0.1:1")).unwrap();
    client.login().await.unwrap();
    client.fetch_csrf().await.unwrap();

    let suggestions = client.symbol_suggestions("EUR").await.unwrap();
    assert_eq!(suggestions[0].name, "EUR/USD");
}

#[tokio::test]
async fn failed_login_carries_the_status_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = DxtradeClient::new(test_config(&server.uri(), "ws://127.0.0.1:1")).unwrap();
    let error = client.login().await.unwrap_err();
    assert!(matches!(error, DxtradeError::LoginFailed { status: 401 }));
    assert!(error.to_string().contains("401"));
    assert_eq!(error.code(), "LOGIN_FAILED");
}

#[tokio::test]
async fn http_429_is_never_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri(), "ws://127.0.0.1:1");
    config.retries = 3;
    let client = DxtradeClient::new(config).unwrap();

    let error = client.login().await.unwrap_err();
    assert!(matches!(error, DxtradeError::RateLimited));
}

#[tokio::test]
async fn transient_server_errors_are_retried() {
    let server = MockServer::start().await;
    mount_session_mocks(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/suggest"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/suggest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "suggests": [{"id": 1, "name": "GBP/USD"}]
        })))
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri(), "ws://127.0.0.1:1");
    config.retries = 2;
    let client = DxtradeClient::new(config).unwrap();
    client.login().await.unwrap();
    client.fetch_csrf().await.unwrap();

    let suggestions = client.symbol_suggestions("GBP").await.unwrap();
    assert_eq!(suggestions[0].name, "GBP/USD");
}

#[tokio::test]
async fn connect_runs_the_full_handshake_and_upgrades_to_persistent_mode() {
    let server = MockServer::start().await;
    mount_session_mocks(&server).await;
    let stream_url = spawn_frame_server(standard_frames()).await;

    let client = DxtradeClient::new(test_config(&server.uri(), &stream_url)).unwrap();
    client.connect().await.unwrap();
    assert!(client.is_connected());

    client.disconnect();
    assert!(!client.is_connected());
    // Idempotent.
    client.disconnect();
    assert!(!client.is_connected());
}

#[tokio::test]
async fn handshake_times_out_without_a_live_session_envelope() {
    let server = MockServer::start().await;
    mount_session_mocks(&server).await;
    // Only heartbeats; never an envelope with an account id.
    let stream_url = spawn_frame_server(vec![tracking_frame(), "2|13".to_string()]).await;

    let mut config = test_config(&server.uri(), &stream_url);
    config.timeout = std::time::Duration::from_millis(500);
    let client = DxtradeClient::new(config).unwrap();

    let error = client.connect().await.unwrap_err();
    assert!(matches!(error, DxtradeError::HandshakeTimeout));
}

#[tokio::test]
async fn authenticated_operations_fail_fast_without_a_session() {
    let server = MockServer::start().await;
    let client = DxtradeClient::new(test_config(&server.uri(), "ws://127.0.0.1:1")).unwrap();

    let error = client.positions().await.unwrap_err();
    assert!(matches!(error, DxtradeError::NoSession));
}

mod common;

use common::*;
use dxtrade_client::{DxtradeClient, OhlcRequest};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn instruments_accumulate_across_batches_until_the_burst_goes_quiet() {
    let server = MockServer::start().await;
    mount_session_mocks(&server).await;

    // Two non-empty batches 20 ms apart, well inside the 200 ms settle
    // window: the second batch must reset the timer and land in the same
    // snapshot. The empty batch neither arms nor resets it.
    let frames = vec![
        tracking_frame(),
        envelope("ACCOUNT", Some("ACC-1"), json!({})),
        envelope("INSTRUMENTS", Some("ACC-1"), json!([])),
        envelope(
            "INSTRUMENTS",
            Some("ACC-1"),
            json!([
                {"id": 1, "symbol": "EUR/USD"},
                {"id": 2, "symbol": "GBP/USD"}
            ]),
        ),
        envelope(
            "INSTRUMENTS",
            Some("ACC-1"),
            json!([{"id": 3, "symbol": "USD/JPY"}]),
        ),
    ];
    let stream_url = spawn_frame_server(frames).await;

    let client = DxtradeClient::new(test_config(&server.uri(), &stream_url)).unwrap();
    client.auth().await.unwrap();

    let instruments = client.instruments().await.unwrap();
    assert_eq!(instruments.len(), 3);
    assert!(instruments.iter().any(|i| i.symbol == "USD/JPY"));
}

#[tokio::test]
async fn symbol_limits_resolve_after_the_settle_window() {
    let server = MockServer::start().await;
    mount_session_mocks(&server).await;

    let frames = vec![
        tracking_frame(),
        envelope("ACCOUNT", Some("ACC-1"), json!({})),
        envelope(
            "LIMITS",
            Some("ACC-1"),
            json!([{"symbol": "EUR/USD", "instrumentId": 3438, "minOrderSize": 0.01}]),
        ),
    ];
    let stream_url = spawn_frame_server(frames).await;

    let client = DxtradeClient::new(test_config(&server.uri(), &stream_url)).unwrap();
    client.auth().await.unwrap();

    let limits = client.symbol_limits().await.unwrap();
    assert_eq!(limits.len(), 1);
    assert_eq!(limits[0].symbol, "EUR/USD");
    assert_eq!(limits[0].min_order_size, 0.01);
}

#[tokio::test]
async fn ohlc_snapshot_resolves_early_on_the_snapshot_end_marker() {
    let server = MockServer::start().await;
    mount_session_mocks(&server).await;

    Mock::given(method("PUT"))
        .and(path("/api/instruments/subscription"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/charts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    // The bar batch arrives only after the connection's initial burst has
    // gone quiet and the chart subscription has been registered.
    let script = vec![
        (Duration::from_millis(20), tracking_frame()),
        (
            Duration::from_millis(20),
            envelope("ACCOUNT", Some("ACC-1"), json!({})),
        ),
        (
            Duration::from_millis(400),
            envelope(
                "CHART_FEED",
                Some("ACC-1"),
                json!({
                    "subtopic": "BIG_CHART_COMPONENT",
                    "snapshotEnd": true,
                    "data": [
                        {"timestamp": 1, "open": 1.0, "high": 1.2, "low": 0.9, "close": 1.1},
                        {"timestamp": 2, "open": 1.1, "high": 1.3, "low": 1.0, "close": 1.2}
                    ]
                }),
            ),
        ),
    ];
    let stream_url = spawn_scripted_server(script).await;

    let client = DxtradeClient::new(test_config(&server.uri(), &stream_url)).unwrap();
    client.auth().await.unwrap();

    let mut request = OhlcRequest::new("EUR/USD");
    request.init_settle = Duration::from_millis(150);
    // Longer than the 5 s client budget: only the end marker can resolve
    // this in time.
    request.bar_settle = Duration::from_secs(10);

    let bars = client.ohlc(request).await.unwrap();
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[1].close, 1.2);
}

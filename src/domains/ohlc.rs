//! OHLC bars over the chart feed.
//!
//! The chart feed rides the same stream as everything else under the
//! `CHART_FEED` envelope kind, discriminated by a `subtopic` body field.
//! Subscriptions are registered by REST PUTs; bars then arrive as pushed
//! batches with an optional `snapshotEnd` marker.

use crate::client::{endpoints, headers, DxtradeClient, SessionSnapshot};
use crate::core::errors::DxtradeError;
use crate::core::kernel::codec::{EnvelopeKind, Frame};
use crate::core::kernel::multiplexer::Subscription;
use crate::core::types::{OhlcBar, OhlcRequest};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, instrument};

const SNAPSHOT_SUBTOPIC: &str = "BIG_CHART_COMPONENT";
const STREAM_SUBTOPIC: &str = "OHLC_STREAM";

fn chart_request(request: &OhlcRequest, subtopic: &str) -> Value {
    json!({
        "chartIds": [],
        "requests": [{
            "aggregationPeriodSeconds": request.resolution,
            "extendedSession": true,
            "forexPriceField": request.price_field,
            "id": 0,
            "maxBarsCount": request.max_bars,
            "range": request.range,
            "studySubscription": [],
            "subtopic": subtopic,
            "symbol": &request.symbol,
        }],
    })
}

fn bars_from_body(body: &Value, subtopic: &str) -> Option<(Vec<OhlcBar>, bool)> {
    if body.get("subtopic").and_then(Value::as_str) != Some(subtopic) {
        return None;
    }
    let bars = body
        .get("data")
        .and_then(Value::as_array)
        .map(|data| {
            data.iter()
                .filter_map(|bar| serde_json::from_value(bar.clone()).ok())
                .collect()
        })
        .unwrap_or_default();
    let snapshot_end = body
        .get("snapshotEnd")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Some((bars, snapshot_end))
}

/// Live OHLC bar stream. Persistent mode only.
pub struct OhlcStream {
    feed: Subscription,
}

impl OhlcStream {
    /// Next batch of bars. `None` when the multiplexer closes.
    pub async fn next(&mut self) -> Option<Vec<OhlcBar>> {
        loop {
            let body = self.feed.recv().await?;
            if let Some((bars, _)) = bars_from_body(&body, STREAM_SUBTOPIC) {
                if !bars.is_empty() {
                    return Some(bars);
                }
            }
        }
    }
}

impl DxtradeClient {
    async fn put_chart_subscription(
        &self,
        session: &SessionSnapshot,
        request: &OhlcRequest,
        subtopic: &str,
    ) -> Result<(), DxtradeError> {
        let request_headers = headers::session_headers(&session.cookie_header, &session.csrf)?;
        self.rest(
            Method::PUT,
            &endpoints::subscribe_instruments(self.base_url()),
            request_headers.clone(),
            Some(json!({"instruments": [&request.symbol]})),
        )
        .await?;
        self.rest(
            Method::PUT,
            &endpoints::charts(self.base_url()),
            request_headers,
            Some(chart_request(request, subtopic)),
        )
        .await?;
        Ok(())
    }

    /// Fetch a historical bar snapshot on a fresh stream connection.
    ///
    /// The connection's initial burst is allowed to go quiet
    /// (`init_settle`) before the chart subscription is registered; bars
    /// then accumulate until the `snapshotEnd` marker or a `bar_settle`
    /// quiescence window with no new batches.
    #[instrument(skip(self, request), fields(symbol = %request.symbol))]
    pub async fn ohlc(&self, request: OhlcRequest) -> Result<Vec<OhlcBar>, DxtradeError> {
        let session = self.ensure_session()?;
        let mut stream = self.open_stream().await.map_err(|e| self.fail(e))?;

        let mut bars: Vec<OhlcBar> = Vec::new();
        let mut subscribed = false;
        let mut settle_armed = false;

        let overall = tokio::time::sleep(self.config().timeout);
        tokio::pin!(overall);
        let settle = tokio::time::sleep(request.init_settle);
        tokio::pin!(settle);

        loop {
            tokio::select! {
                _ = &mut overall => {
                    return Err(self.fail(DxtradeError::Timeout("OHLC data".to_string())));
                }
                _ = &mut settle, if settle_armed => {
                    if subscribed {
                        stream.close().await;
                        return Ok(bars);
                    }
                    // Init burst has gone quiet; register the subscription.
                    settle_armed = false;
                    self.put_chart_subscription(&session, &request, SNAPSHOT_SUBTOPIC)
                        .await
                        .map_err(|e| self.wrap(e, |m| {
                            DxtradeError::Other(format!("Error fetching OHLC data: {m}"))
                        }))?;
                    subscribed = true;
                    debug!("chart subscription registered");
                }
                frame = stream.next_frame() => match frame {
                    None => {
                        return Err(self.fail(DxtradeError::Transport(
                            "stream closed before OHLC snapshot".to_string(),
                        )));
                    }
                    Some(Err(error)) => return Err(self.fail(error)),
                    Some(Ok(Frame::Envelope(envelope))) => {
                        if !subscribed {
                            settle_armed = true;
                            settle.as_mut().reset(
                                tokio::time::Instant::now() + request.init_settle,
                            );
                            continue;
                        }
                        if envelope.kind != EnvelopeKind::ChartFeed {
                            continue;
                        }
                        let Some((batch, snapshot_end)) =
                            bars_from_body(&envelope.body, SNAPSHOT_SUBTOPIC)
                        else {
                            continue;
                        };
                        bars.extend(batch);
                        if snapshot_end {
                            stream.close().await;
                            return Ok(bars);
                        }
                        settle_armed = true;
                        settle.as_mut().reset(
                            tokio::time::Instant::now() + request.bar_settle,
                        );
                    }
                    Some(Ok(Frame::Control(_))) => {}
                }
            }
        }
    }

    /// Subscribe to live OHLC bars. Persistent mode only.
    #[instrument(skip(self, request), fields(symbol = %request.symbol))]
    pub async fn stream_ohlc(&self, request: OhlcRequest) -> Result<OhlcStream, DxtradeError> {
        let session = self.ensure_session()?;
        if !self.is_connected() {
            return Err(self.fail(DxtradeError::StreamRequiresConnect));
        }

        let feed = self.multiplexer().subscribe(EnvelopeKind::ChartFeed);
        self.put_chart_subscription(&session, &request, STREAM_SUBTOPIC)
            .await
            .map_err(|e| self.fail(e))?;
        Ok(OhlcStream { feed })
    }
}

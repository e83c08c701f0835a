//! Positions: merged snapshots, close confirmation strategies, and the
//! live-merge stream.
//!
//! Position state arrives as two independently-timed envelope kinds: the
//! raw `POSITIONS` list and a `POSITION_METRICS` list (P&L, margin). A
//! usable snapshot joins both by `uid`.

use crate::client::{endpoints, headers, DxtradeClient};
use crate::core::errors::DxtradeError;
use crate::core::kernel::codec::{EnvelopeKind, Frame};
use crate::core::kernel::multiplexer::Subscription;
use crate::core::types::Position;
use crate::domains::order::ConfirmationListener;
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// How `close_position` confirms that the gateway actually closed the
/// position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CloseConfirmation {
    /// Fire-and-forget: return the pre-close snapshot immediately.
    #[default]
    None,
    /// Wait for a FILLED closing order for this position code on the
    /// stream; the listener opens before the close request is sent.
    Stream,
    /// Re-fetch the position set until the code disappears.
    Poll,
}

#[derive(Debug, Clone, Copy)]
pub struct ClosePositionOptions {
    pub confirmation: CloseConfirmation,
    /// Budget for stream or poll confirmation.
    pub timeout: Duration,
    /// Re-fetch interval in poll mode.
    pub poll_interval: Duration,
}

impl Default for ClosePositionOptions {
    fn default() -> Self {
        Self {
            confirmation: CloseConfirmation::None,
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Left-join metrics onto positions by `uid`. Position fields win on
/// collision; positions without metrics keep zeroed metric fields.
pub(crate) fn merge_positions(
    positions: &Value,
    metrics: &Value,
) -> Result<Vec<Position>, DxtradeError> {
    let empty = Vec::new();
    let metrics_by_uid: HashMap<&str, &Map<String, Value>> = metrics
        .as_array()
        .unwrap_or(&empty)
        .iter()
        .filter_map(|m| {
            let object = m.as_object()?;
            let uid = object.get("uid")?.as_str()?;
            Some((uid, object))
        })
        .collect();

    positions
        .as_array()
        .unwrap_or(&empty)
        .iter()
        .filter_map(Value::as_object)
        .map(|position| {
            let mut merged = position.clone();
            if let Some(uid) = position.get("uid").and_then(Value::as_str) {
                if let Some(metric) = metrics_by_uid.get(uid) {
                    for (key, value) in metric.iter() {
                        merged.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                }
            }
            serde_json::from_value(Value::Object(merged)).map_err(DxtradeError::from)
        })
        .collect()
}

/// Closing-order payload: a MARKET order for the exact negation of the
/// held quantity.
pub(crate) fn build_close_payload(position: &Position) -> Value {
    json!({
        "legs": [{
            "instrumentId": position.position_key.instrument_id,
            "positionCode": &position.position_key.position_code,
            "positionEffect": "CLOSING",
            "ratioQuantity": 1,
            "symbol": &position.position_key.position_code,
        }],
        "limitPrice": 0,
        "orderType": "MARKET",
        "quantity": -position.quantity,
        "timeInForce": "GTC",
    })
}

/// Live merged-position stream; re-emits the full merged set whenever
/// either side updates and both have been observed at least once.
#[derive(Debug)]
pub struct PositionStream {
    positions: Subscription,
    metrics: Subscription,
    latest_positions: Option<Value>,
    latest_metrics: Option<Value>,
}

impl PositionStream {
    /// Next merged snapshot. `None` when the multiplexer closes.
    pub async fn next(&mut self) -> Option<Result<Vec<Position>, DxtradeError>> {
        loop {
            tokio::select! {
                body = self.positions.recv() => self.latest_positions = Some(body?),
                body = self.metrics.recv() => self.latest_metrics = Some(body?),
            }
            if let (Some(positions), Some(metrics)) = (&self.latest_positions, &self.latest_metrics)
            {
                return Some(merge_positions(positions, metrics));
            }
        }
    }
}

impl DxtradeClient {
    /// Current merged position set. In persistent mode this waits on both
    /// envelope kinds through the multiplexer; otherwise one ephemeral
    /// connection is read until both kinds have been observed.
    #[instrument(skip(self))]
    pub async fn positions(&self) -> Result<Vec<Position>, DxtradeError> {
        self.ensure_session()?;
        let timeout = self.config().timeout;

        if self.is_connected() {
            let mux = self.multiplexer();
            let (positions, metrics) = tokio::try_join!(
                mux.wait_for(EnvelopeKind::Positions, timeout),
                mux.wait_for(EnvelopeKind::PositionMetrics, timeout),
            )
            .map_err(|e| self.fail(e))?;
            return merge_positions(&positions, &metrics).map_err(|e| self.fail(e));
        }

        let mut stream = self.open_stream().await.map_err(|e| self.fail(e))?;
        let wait = async {
            let mut positions: Option<Value> = None;
            let mut metrics: Option<Value> = None;
            while let Some(frame) = stream.next_frame().await {
                if let Frame::Envelope(envelope) = frame? {
                    match envelope.kind {
                        EnvelopeKind::Positions => positions = Some(envelope.body),
                        EnvelopeKind::PositionMetrics => metrics = Some(envelope.body),
                        _ => {}
                    }
                }
                if let (Some(p), Some(m)) = (&positions, &metrics) {
                    let merged = merge_positions(p, m)?;
                    stream.close().await;
                    return Ok(merged);
                }
            }
            Err(DxtradeError::Transport(
                "stream closed before positions snapshot".to_string(),
            ))
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result.map_err(|e| self.fail(e)),
            Err(_) => Err(self.fail(DxtradeError::Timeout("positions".to_string()))),
        }
    }

    /// Subscribe to live merged positions. Persistent mode only.
    pub fn stream_positions(&self) -> Result<PositionStream, DxtradeError> {
        self.ensure_session()?;
        if !self.is_connected() {
            return Err(self.fail(DxtradeError::StreamRequiresConnect));
        }
        let mux = self.multiplexer();
        Ok(PositionStream {
            positions: mux.subscribe(EnvelopeKind::Positions),
            metrics: mux.subscribe(EnvelopeKind::PositionMetrics),
            latest_positions: mux.get_cached(&EnvelopeKind::Positions),
            latest_metrics: mux.get_cached(&EnvelopeKind::PositionMetrics),
        })
    }

    async fn send_close(&self, payload: Value) -> Result<(), DxtradeError> {
        let session = self.ensure_session()?;
        let request_headers = headers::session_headers(&session.cookie_header, &session.csrf)?;
        self.rest(
            Method::POST,
            &endpoints::close_position(self.base_url()),
            request_headers,
            Some(payload),
        )
        .await
        .map_err(|e| self.wrap(e, DxtradeError::PositionCloseError))?;
        Ok(())
    }

    /// Close one position by code, confirming per the selected strategy.
    /// Returns the last snapshot of the position seen before it closed.
    #[instrument(skip(self, options))]
    pub async fn close_position(
        &self,
        position_code: &str,
        options: ClosePositionOptions,
    ) -> Result<Position, DxtradeError> {
        let positions = self.positions().await?;
        let target = positions
            .into_iter()
            .find(|p| p.position_key.position_code == position_code)
            .ok_or_else(|| self.fail(DxtradeError::PositionNotFound(position_code.to_string())))?;

        let payload = build_close_payload(&target);
        debug!(payload = %payload, "closing position");

        match options.confirmation {
            CloseConfirmation::None => {
                self.send_close(payload).await?;
                Ok(target)
            }
            CloseConfirmation::Stream => {
                let listener = ConfirmationListener::open(self)
                    .await
                    .map_err(|e| self.fail(e))?;
                self.send_close(payload).await?;
                match listener.wait(options.timeout, Some(position_code)).await {
                    Ok(_) => Ok(target),
                    Err(DxtradeError::OrderTimeout) => {
                        Err(self.fail(DxtradeError::PositionCloseTimeout))
                    }
                    Err(DxtradeError::OrderRejected(reason)) => {
                        Err(self.fail(DxtradeError::PositionCloseError(reason)))
                    }
                    Err(error) => Err(self.fail(error)),
                }
            }
            CloseConfirmation::Poll => {
                self.send_close(payload).await?;
                let mut last_seen = target;
                let deadline = tokio::time::Instant::now() + options.timeout;
                loop {
                    tokio::time::sleep(options.poll_interval).await;
                    if tokio::time::Instant::now() >= deadline {
                        return Err(self.fail(DxtradeError::PositionCloseTimeout));
                    }
                    let current = self.positions().await?;
                    match current
                        .into_iter()
                        .find(|p| p.position_key.position_code == position_code)
                    {
                        Some(snapshot) => last_seen = snapshot,
                        None => return Ok(last_seen),
                    }
                }
            }
        }
    }

    /// Close every open position, sequentially, with market orders for the
    /// exact negation of each held quantity. No confirmation wait.
    #[instrument(skip(self))]
    pub async fn close_all_positions(&self) -> Result<(), DxtradeError> {
        let positions = self.positions().await?;
        info!(count = positions.len(), "closing all positions");
        for position in &positions {
            self.send_close(build_close_payload(position)).await?;
        }
        Ok(())
    }
}

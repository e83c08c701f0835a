//! Order submission and the dual-shape confirmation tracker.
//!
//! The gateway reports the same order outcome through two independent
//! envelope shapes: a trade-log `MESSAGE` entry and an `ORDERS` snapshot.
//! The tracker listens to both and settles exactly once on whichever
//! terminal status arrives first.

use crate::client::{endpoints, headers, DxtradeClient};
use crate::core::errors::DxtradeError;
use crate::core::kernel::codec::{EnvelopeKind, Frame};
use crate::core::kernel::multiplexer::{StreamMultiplexer, Subscription};
use crate::core::kernel::ws::EphemeralStream;
use crate::core::types::{
    MessageEntry, OrderLogParams, OrderRequest, OrderResponse, OrderType, OrderUpdate,
    ProtectionLevel, Side, STATUS_FILLED, STATUS_REJECTED,
};
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Terminal outcome extracted from one confirmation envelope, or `None`
/// while the order is still pending.
type Outcome = Option<Result<OrderUpdate, DxtradeError>>;

fn reject(reason: Option<String>) -> Result<OrderUpdate, DxtradeError> {
    Err(DxtradeError::OrderRejected(
        reason.unwrap_or_else(|| "Unknown reason".to_string()),
    ))
}

fn matches_filter(update: &OrderUpdate, position_filter: Option<&str>) -> bool {
    match position_filter {
        Some(code) => update.position_code.as_deref() == Some(code),
        None => true,
    }
}

/// Evaluate a trade-log `MESSAGE` body: the LAST entry with
/// `messageCategory=TRADE_LOG`, `messageType=ORDER`, `historyMessage=false`
/// carries the live order status in its `parametersTO`.
pub(crate) fn evaluate_trade_log(body: &Value, position_filter: Option<&str>) -> Outcome {
    // Entries decode one by one: a malformed neighbor in the batch must not
    // discard a terminal confirmation next to it.
    let entry = body.as_array()?.iter().rev().find_map(|raw| {
        let entry: MessageEntry = serde_json::from_value(raw.clone()).ok()?;
        entry.is_live_order_log().then_some(entry)
    })?;
    let params: OrderLogParams = serde_json::from_value(entry.parameters.clone()).ok()?;

    let update = OrderUpdate {
        order_id: params.order_key.clone(),
        status: params.order_status.clone(),
        symbol: params.symbol.clone(),
        filled_quantity: params.filled_quantity,
        filled_price: params.filled_price,
        position_code: params.position_code.clone(),
        status_description: None,
    };
    if !matches_filter(&update, position_filter) {
        return None;
    }

    match params.order_status.as_str() {
        STATUS_REJECTED => Some(reject(params.reject_reason.map(|r| r.key))),
        STATUS_FILLED => Some(Ok(update)),
        _ => None,
    }
}

/// Evaluate an `ORDERS` body: the first element carries `orderId` and
/// `status` directly.
pub(crate) fn evaluate_orders(body: &Value, position_filter: Option<&str>) -> Outcome {
    let first = body.as_array()?.first()?;
    if first.get("orderId").is_none() {
        return None;
    }
    let update: OrderUpdate = serde_json::from_value(first.clone()).ok()?;
    if !matches_filter(&update, position_filter) {
        return None;
    }

    match update.status.as_str() {
        STATUS_REJECTED => Some(reject(update.status_description.clone())),
        STATUS_FILLED => Some(Ok(update)),
        _ => None,
    }
}

fn evaluate_envelope(kind: &EnvelopeKind, body: &Value, position_filter: Option<&str>) -> Outcome {
    match kind {
        EnvelopeKind::TradeLog => evaluate_trade_log(body, position_filter),
        EnvelopeKind::Orders => evaluate_orders(body, position_filter),
        _ => None,
    }
}

/// Listener for a terminal order confirmation. Opened BEFORE the REST
/// submit so a fast fill cannot slip past it. In persistent mode it rides
/// the shared multiplexer; otherwise it owns a dedicated connection.
pub(crate) enum ConfirmationListener {
    Ephemeral(EphemeralStream),
    Persistent {
        trade_log: Subscription,
        orders: Subscription,
    },
}

impl ConfirmationListener {
    pub(crate) async fn open(client: &DxtradeClient) -> Result<Self, DxtradeError> {
        if client.is_connected() {
            Ok(Self::from_multiplexer(client.multiplexer()))
        } else {
            Ok(Self::Ephemeral(client.open_stream().await?))
        }
    }

    pub(crate) fn from_multiplexer(mux: &StreamMultiplexer) -> Self {
        Self::Persistent {
            trade_log: mux.subscribe(EnvelopeKind::TradeLog),
            orders: mux.subscribe(EnvelopeKind::Orders),
        }
    }

    /// Wait for the first matching terminal status; exactly-once by
    /// construction since the first settle returns.
    pub(crate) async fn wait(
        self,
        timeout: Duration,
        position_filter: Option<&str>,
    ) -> Result<OrderUpdate, DxtradeError> {
        match tokio::time::timeout(timeout, self.run(position_filter)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DxtradeError::OrderTimeout),
        }
    }

    async fn run(self, position_filter: Option<&str>) -> Result<OrderUpdate, DxtradeError> {
        match self {
            Self::Ephemeral(mut stream) => loop {
                match stream.next_frame().await {
                    None => {
                        return Err(DxtradeError::Transport(
                            "stream closed before order confirmation".to_string(),
                        ))
                    }
                    Some(Err(error)) => return Err(error),
                    Some(Ok(Frame::Envelope(envelope))) => {
                        if let Some(outcome) =
                            evaluate_envelope(&envelope.kind, &envelope.body, position_filter)
                        {
                            stream.close().await;
                            return outcome;
                        }
                    }
                    Some(Ok(Frame::Control(_))) => {}
                }
            },
            Self::Persistent {
                mut trade_log,
                mut orders,
            } => loop {
                let (kind, body) = tokio::select! {
                    body = trade_log.recv() => (EnvelopeKind::TradeLog, body),
                    body = orders.recv() => (EnvelopeKind::Orders, body),
                };
                let Some(body) = body else {
                    return Err(DxtradeError::Transport(
                        "multiplexer closed before order confirmation".to_string(),
                    ));
                };
                if let Some(outcome) = evaluate_envelope(&kind, &body, position_filter) {
                    return outcome;
                }
            },
        }
    }
}

fn protection_block(level: &ProtectionLevel, order_type: OrderType, quantity: i64) -> Value {
    let mut block = json!({
        "priceFixed": level.price.is_some(),
        "orderChainId": 0,
        "orderId": 0,
        "orderType": order_type,
        "quantityForProtection": quantity,
        "removed": false,
    });
    if let Some(offset) = level.offset {
        block["fixedOffset"] = json!(offset);
    }
    if let Some(price) = level.price {
        block["fixedPrice"] = json!(price);
    }
    block
}

/// Build the REST order payload. `lot_size` converts the lot-denominated
/// quantity into the signed unit quantity the gateway expects.
pub(crate) fn build_order_payload(request: &OrderRequest, lot_size: f64) -> Value {
    let units = (request.quantity * lot_size).round() as i64;
    let quantity = match request.side {
        Side::Buy => units,
        Side::Sell => -units,
    };

    let mut leg = json!({
        "positionEffect": request.position_effect,
        "ratioQuantity": 1,
        "symbol": &request.symbol,
    });
    if let Some(instrument_id) = request.instrument_id {
        leg["instrumentId"] = json!(instrument_id);
    }
    if let Some(position_code) = &request.position_code {
        leg["positionCode"] = json!(position_code);
    }

    let request_id = request
        .order_code
        .clone()
        .unwrap_or_else(|| format!("gwt-uid-931-{}", Uuid::new_v4()));

    let mut payload = json!({
        "directExchange": false,
        "legs": [leg],
        "orderSide": request.side,
        "orderType": request.order_type,
        "quantity": quantity,
        "requestId": request_id,
        "timeInForce": request.tif,
    });

    if let Some(expire_date) = &request.expire_date {
        payload["expireDate"] = json!(expire_date);
    }
    if let Some(metadata) = &request.metadata {
        payload["metadata"] = json!(metadata);
    }
    if let Some(price) = request.price {
        if request.order_type != OrderType::Market {
            let field = match request.order_type {
                OrderType::Stop => "stopPrice",
                _ => "limitPrice",
            };
            payload[field] = json!(price);
        }
    }
    if let Some(stop_loss) = &request.stop_loss {
        payload["stopLoss"] = protection_block(stop_loss, OrderType::Stop, quantity);
    }
    if let Some(take_profit) = &request.take_profit {
        payload["takeProfit"] = protection_block(take_profit, OrderType::Limit, quantity);
    }
    payload
}

impl DxtradeClient {
    /// Submit a single order and wait for its terminal confirmation.
    ///
    /// The confirmation listener is opened before the REST call; the
    /// overall wait is bounded by the configured timeout.
    #[instrument(skip(self, request), fields(symbol = %request.symbol))]
    pub async fn submit_order(&self, request: OrderRequest) -> Result<OrderUpdate, DxtradeError> {
        let session = self.ensure_session()?;

        let info = self.symbol_info(&request.symbol).await?;
        let payload = build_order_payload(&request, info.lot_size);
        debug!(payload = %payload, "submitting order");

        let listener = ConfirmationListener::open(self)
            .await
            .map_err(|e| self.fail(e))?;

        let request_headers = headers::session_headers(&session.cookie_header, &session.csrf)?;
        let response = self
            .rest(
                Method::POST,
                &endpoints::submit_order(self.base_url()),
                request_headers,
                Some(payload),
            )
            .await
            .map_err(|e| self.wrap(e, DxtradeError::OrderError))?;

        if let Some(on_placed) = &self.config().callbacks.on_order_placed {
            if let Ok(ack) = response.json::<OrderResponse>() {
                on_placed(&ack);
            }
        }

        let update = listener
            .wait(self.config().timeout, None)
            .await
            .map_err(|e| self.fail(e))?;
        if let Some(on_update) = &self.config().callbacks.on_order_update {
            on_update(&update);
        }
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DebugFilter;
    use crate::core::kernel::codec::encode_frame;

    fn trade_log_body(status: &str, order_key: &str) -> Value {
        json!([
            {
                "messageCategory": "TRADE_LOG",
                "messageType": "ORDER",
                "historyMessage": true,
                "parametersTO": {"orderKey": "stale", "orderStatus": "FILLED"}
            },
            {
                "messageCategory": "TRADE_LOG",
                "messageType": "ORDER",
                "historyMessage": false,
                "parametersTO": {
                    "orderKey": order_key,
                    "orderStatus": status,
                    "symbol": "EUR/USD",
                    "filledQuantity": 1000,
                    "filledPrice": 1.0845,
                    "rejectReason": {"key": "INSUFFICIENT_MARGIN", "errorCode": 12}
                }
            }
        ])
    }

    #[test]
    fn trade_log_filled_resolves_with_the_last_live_entry() {
        let outcome = evaluate_trade_log(&trade_log_body("FILLED", "O-7"), None)
            .unwrap()
            .unwrap();
        assert_eq!(outcome.order_id, "O-7");
        assert_eq!(outcome.filled_quantity, Some(1000.0));
    }

    #[test]
    fn trade_log_rejection_carries_the_reason_key() {
        let outcome = evaluate_trade_log(&trade_log_body("REJECTED", "O-8"), None).unwrap();
        match outcome {
            Err(DxtradeError::OrderRejected(reason)) => {
                assert_eq!(reason, "INSUFFICIENT_MARGIN");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn pending_statuses_keep_listening() {
        assert!(evaluate_trade_log(&trade_log_body("PLACED", "O-9"), None).is_none());
        assert!(evaluate_orders(&json!([{"orderId": 1, "status": "WORKING"}]), None).is_none());
        // History-only bodies never settle.
        let history = json!([{
            "messageCategory": "TRADE_LOG",
            "messageType": "ORDER",
            "historyMessage": true,
            "parametersTO": {"orderKey": "x", "orderStatus": "FILLED"}
        }]);
        assert!(evaluate_trade_log(&history, None).is_none());
    }

    #[test]
    fn malformed_sibling_entries_do_not_mask_a_confirmation() {
        let body = json!([
            {
                "messageCategory": "TRADE_LOG",
                "messageType": "ORDER",
                "historyMessage": false,
                "parametersTO": {"orderKey": "O-3", "orderStatus": "FILLED"}
            },
            {"unexpected": "shape"}
        ]);
        let update = evaluate_trade_log(&body, None).unwrap().unwrap();
        assert_eq!(update.order_id, "O-3");
    }

    #[test]
    fn orders_shape_resolves_and_rejects() {
        let filled = json!([{"orderId": "42", "status": "FILLED", "filledQuantity": "500"}]);
        let update = evaluate_orders(&filled, None).unwrap().unwrap();
        assert_eq!(update.order_id, "42");
        assert_eq!(update.filled_quantity, Some(500.0));

        let rejected = json!([{"orderId": "42", "status": "REJECTED"}]);
        match evaluate_orders(&rejected, None).unwrap() {
            Err(DxtradeError::OrderRejected(reason)) => assert_eq!(reason, "Unknown reason"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn position_filter_ignores_other_codes() {
        let body = json!([{
            "orderId": "1", "status": "FILLED", "positionCode": "POS-A"
        }]);
        assert!(evaluate_orders(&body, Some("POS-B")).is_none());
        assert!(evaluate_orders(&body, Some("POS-A")).is_some());
    }

    #[tokio::test]
    async fn confirmation_settles_exactly_once_on_the_first_terminal_envelope() {
        let mux = StreamMultiplexer::new(DebugFilter::Disabled);
        let listener = ConfirmationListener::from_multiplexer(&mux);

        let waiter = tokio::spawn(listener.wait(Duration::from_secs(5), None));
        tokio::task::yield_now().await;

        // Both shapes report the same fill back to back; the tracker must
        // take the first and ignore the second without erroring.
        mux.handle_raw(&encode_frame(&json!({
            "type": "MESSAGE",
            "body": [{
                "messageCategory": "TRADE_LOG",
                "messageType": "ORDER",
                "historyMessage": false,
                "parametersTO": {"orderKey": "O-1", "orderStatus": "FILLED"}
            }]
        })));
        mux.handle_raw(&encode_frame(&json!({
            "type": "ORDERS",
            "body": [{"orderId": "O-1", "status": "FILLED"}]
        })));

        let update = waiter.await.unwrap().unwrap();
        assert_eq!(update.order_id, "O-1");
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_times_out() {
        let mux = StreamMultiplexer::new(DebugFilter::Disabled);
        let listener = ConfirmationListener::from_multiplexer(&mux);
        let result = listener.wait(Duration::from_secs(30), None).await;
        assert!(matches!(result, Err(DxtradeError::OrderTimeout)));
    }

    #[test]
    fn order_payload_scales_quantity_by_lot_size() {
        let request = OrderRequest::market("EUR/USD", Side::Sell, 0.5);
        let payload = build_order_payload(&request, 100_000.0);
        assert_eq!(payload["quantity"], -50_000);
        assert_eq!(payload["orderSide"], "SELL");
        assert_eq!(payload["orderType"], "MARKET");
        assert_eq!(payload["legs"][0]["symbol"], "EUR/USD");
        assert_eq!(payload["legs"][0]["positionEffect"], "OPENING");
        assert!(payload.get("limitPrice").is_none());
        assert!(payload["requestId"]
            .as_str()
            .unwrap()
            .starts_with("gwt-uid-931-"));
    }

    #[test]
    fn limit_and_stop_orders_use_the_right_price_field() {
        let limit = OrderRequest::limit("EUR/USD", Side::Buy, 1.0, 1.08);
        let payload = build_order_payload(&limit, 1000.0);
        assert_eq!(payload["limitPrice"], 1.08);

        let mut stop = OrderRequest::new("EUR/USD", Side::Buy, 1.0, OrderType::Stop);
        stop.price = Some(1.10);
        let payload = build_order_payload(&stop, 1000.0);
        assert_eq!(payload["stopPrice"], 1.10);
        assert!(payload.get("limitPrice").is_none());
    }

    #[test]
    fn protection_blocks_attach_with_signed_quantity() {
        let mut request = OrderRequest::market("EUR/USD", Side::Buy, 1.0);
        request.stop_loss = Some(ProtectionLevel {
            price: Some(1.05),
            offset: None,
        });
        request.take_profit = Some(ProtectionLevel {
            price: None,
            offset: Some(0.002),
        });

        let payload = build_order_payload(&request, 1000.0);
        assert_eq!(payload["stopLoss"]["fixedPrice"], 1.05);
        assert_eq!(payload["stopLoss"]["priceFixed"], true);
        assert_eq!(payload["stopLoss"]["orderType"], "STOP");
        assert_eq!(payload["stopLoss"]["quantityForProtection"], 1000);
        assert_eq!(payload["takeProfit"]["fixedOffset"], 0.002);
        assert_eq!(payload["takeProfit"]["priceFixed"], false);
        assert_eq!(payload["takeProfit"]["orderType"], "LIMIT");
    }
}

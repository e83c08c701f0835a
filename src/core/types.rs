use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Terminal order statuses as they appear on the wire.
pub const STATUS_FILLED: &str = "FILLED";
pub const STATUS_REJECTED: &str = "REJECTED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionEffect {
    Opening,
    Closing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    #[default]
    Gtc,
    Gtd,
    Day,
    Ioc,
    Fok,
}

/// Gateways report some numeric fields as either a JSON number or a quoted
/// string; accept both.
fn de_loose_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Num(f64),
        Str(String),
    }

    Ok(match Option::<Loose>::deserialize(deserializer)? {
        None => None,
        Some(Loose::Num(n)) => Some(n),
        Some(Loose::Str(s)) => s.parse().ok(),
    })
}

/// Stop-loss / take-profit attachment: either an absolute price or an offset
/// from the fill price.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtectionLevel {
    pub price: Option<f64>,
    pub offset: Option<f64>,
}

/// Parameters for a single-order submission.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    /// Quantity in lots; converted to units via the instrument lot size.
    pub quantity: f64,
    pub order_type: OrderType,
    /// Client order code; generated when absent.
    pub order_code: Option<String>,
    /// Limit price (LIMIT) or stop price (STOP); ignored for MARKET.
    pub price: Option<f64>,
    pub instrument_id: Option<i64>,
    pub position_effect: PositionEffect,
    pub position_code: Option<String>,
    pub tif: TimeInForce,
    pub expire_date: Option<String>,
    pub stop_loss: Option<ProtectionLevel>,
    pub take_profit: Option<ProtectionLevel>,
    pub metadata: Option<HashMap<String, String>>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: Side, quantity: f64) -> Self {
        Self::new(symbol, side, quantity, OrderType::Market)
    }

    pub fn limit(symbol: impl Into<String>, side: Side, quantity: f64, price: f64) -> Self {
        let mut request = Self::new(symbol, side, quantity, OrderType::Limit);
        request.price = Some(price);
        request
    }

    pub fn new(symbol: impl Into<String>, side: Side, quantity: f64, order_type: OrderType) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            order_type,
            order_code: None,
            price: None,
            instrument_id: None,
            position_effect: PositionEffect::Opening,
            position_code: None,
            tif: TimeInForce::Gtc,
            expire_date: None,
            stop_loss: None,
            take_profit: None,
            metadata: None,
        }
    }
}

/// Immediate REST acknowledgement of an order submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    #[serde(default)]
    pub update_order_id: Option<i64>,
}

/// Normalized terminal order confirmation, converged from either
/// confirmation shape on the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub order_id: String,
    pub status: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, deserialize_with = "de_loose_f64")]
    pub filled_quantity: Option<f64>,
    #[serde(default, deserialize_with = "de_loose_f64")]
    pub filled_price: Option<f64>,
    #[serde(default)]
    pub position_code: Option<String>,
    #[serde(default)]
    pub status_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionKey {
    pub instrument_id: i64,
    pub position_code: String,
}

/// Open position joined with its live metrics. Metrics fields default to
/// zero until a `POSITION_METRICS` envelope has been observed for the uid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub uid: String,
    #[serde(default)]
    pub account_id: Option<String>,
    pub position_key: PositionKey,
    pub quantity: f64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub cost_basis: f64,
    #[serde(default)]
    pub open_cost: f64,
    #[serde(default)]
    pub margin_rate: f64,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub modified_time: i64,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    // Joined from POSITION_METRICS.
    #[serde(default)]
    pub margin: f64,
    #[serde(default)]
    pub pl_open: f64,
    #[serde(default)]
    pub pl_closed: f64,
    #[serde(default)]
    pub pl_rate: f64,
    #[serde(default)]
    pub total_commissions: f64,
    #[serde(default)]
    pub total_financing: f64,
    #[serde(default)]
    pub average_price: f64,
    #[serde(default)]
    pub market_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMetrics {
    #[serde(default)]
    pub available_funds: f64,
    #[serde(default)]
    pub available_balance: f64,
    #[serde(default)]
    pub cash_balance: f64,
    #[serde(default)]
    pub equity: f64,
    #[serde(default)]
    pub open_pl: f64,
    #[serde(default)]
    pub initial_margin: f64,
    #[serde(default)]
    pub conversion_rate: f64,
    #[serde(default)]
    pub risk_level: f64,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub id: i64,
    pub symbol: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub instrument_type: String,
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub precision: i32,
    #[serde(default)]
    pub pips_size: f64,
    #[serde(default)]
    pub quantity_increment: f64,
    #[serde(default)]
    pub price_increment: f64,
    #[serde(default)]
    pub lot_size: f64,
    #[serde(default)]
    pub multiplier: f64,
    #[serde(default)]
    pub open: bool,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolSuggestion {
    pub id: i64,
    pub name: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    #[serde(default)]
    pub max_volume: f64,
    #[serde(default)]
    pub min_volume: f64,
    #[serde(default)]
    pub volume_step: f64,
    pub lot_size: f64,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolLimits {
    pub symbol: String,
    pub instrument_id: i64,
    #[serde(default)]
    pub limit_stop_distance_type: String,
    #[serde(default)]
    pub limit_stop_distance: f64,
    #[serde(default)]
    pub min_order_size: f64,
    #[serde(default)]
    pub max_order_size: f64,
    #[serde(default)]
    pub min_order_increment: f64,
    #[serde(default)]
    pub limit_type: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OhlcBar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub vwap: f64,
    #[serde(default)]
    pub time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceField {
    Bid,
    Ask,
}

/// Parameters for an OHLC fetch or chart stream.
#[derive(Debug, Clone)]
pub struct OhlcRequest {
    pub symbol: String,
    /// Bar aggregation period in seconds (60 = 1m, 3600 = 1h, ...).
    pub resolution: u32,
    /// Lookback window in seconds from now.
    pub range: u64,
    pub max_bars: u32,
    pub price_field: PriceField,
    /// Wait for the connection's initial burst to go quiet before
    /// subscribing; tuned empirically per gateway.
    pub init_settle: Duration,
    /// Quiescence window after the last bar batch when the feed carries no
    /// explicit snapshot-end marker.
    pub bar_settle: Duration,
}

impl OhlcRequest {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            resolution: 60,
            range: 432_000,
            max_bars: 3_500,
            price_field: PriceField::Bid,
            init_settle: Duration::from_secs(1),
            bar_settle: Duration::from_secs(2),
        }
    }

    pub fn with_resolution(mut self, seconds: u32) -> Self {
        self.resolution = seconds;
        self
    }

    pub fn with_range(mut self, seconds: u64) -> Self {
        self.range = seconds;
        self
    }

    pub fn with_max_bars(mut self, max_bars: u32) -> Self {
        self.max_bars = max_bars;
        self
    }

    pub fn with_price_field(mut self, field: PriceField) -> Self {
        self.price_field = field;
        self
    }
}

/// Broker reason for a rejected order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectReason {
    pub key: String,
    #[serde(default)]
    pub error_code: i64,
}

/// `parametersTO` payload of a trade-log ORDER entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLogParams {
    pub order_key: String,
    #[serde(default)]
    pub symbol: Option<String>,
    pub order_status: String,
    #[serde(default, deserialize_with = "de_loose_f64")]
    pub filled_quantity: Option<f64>,
    #[serde(default, deserialize_with = "de_loose_f64")]
    pub filled_price: Option<f64>,
    #[serde(default)]
    pub position_code: Option<String>,
    #[serde(default)]
    pub reject_reason: Option<RejectReason>,
}

/// One entry of a trade-log `MESSAGE` envelope body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEntry {
    #[serde(default)]
    pub account_id: Option<String>,
    pub message_category: String,
    pub message_type: String,
    #[serde(default)]
    pub history_message: bool,
    #[serde(default)]
    pub time_stamp: i64,
    #[serde(rename = "parametersTO", default)]
    pub parameters: Value,
}

impl MessageEntry {
    pub fn is_live_order_log(&self) -> bool {
        self.message_category == "TRADE_LOG"
            && self.message_type == "ORDER"
            && !self.history_message
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentParams {
    pub from: i64,
    pub to: i64,
    pub instrument: String,
    #[serde(default)]
    pub subtype: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_numbers_accept_strings() {
        let update: OrderUpdate = serde_json::from_str(
            r#"{"orderId":"42","status":"FILLED","filledQuantity":"1000","filledPrice":1.0845}"#,
        )
        .unwrap();
        assert_eq!(update.filled_quantity, Some(1000.0));
        assert_eq!(update.filled_price, Some(1.0845));
    }

    #[test]
    fn position_defaults_metrics_to_zero() {
        let position: Position = serde_json::from_str(
            r#"{"uid":"u1","positionKey":{"instrumentId":3438,"positionCode":"POS-1"},"quantity":1000.0}"#,
        )
        .unwrap();
        assert_eq!(position.pl_open, 0.0);
        assert_eq!(position.margin, 0.0);
    }

    #[test]
    fn trade_log_entry_filter() {
        let entry: MessageEntry = serde_json::from_str(
            r#"{"messageCategory":"TRADE_LOG","messageType":"ORDER","historyMessage":false,"parametersTO":{}}"#,
        )
        .unwrap();
        assert!(entry.is_live_order_log());

        let history: MessageEntry = serde_json::from_str(
            r#"{"messageCategory":"TRADE_LOG","messageType":"ORDER","historyMessage":true,"parametersTO":{}}"#,
        )
        .unwrap();
        assert!(!history.is_live_order_log());
    }
}

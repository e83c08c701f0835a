//! REST and stream URL builders. Every path the gateway exposes lives here;
//! the rest of the crate never concatenates URLs by hand.

/// Query string the gateway's push framework expects on the upgrade request.
/// The tracking id slot is `0` for a fresh connection; later connections
/// reuse the id handed out on the first frame.
fn stream_query(tracking_id: Option<&str>) -> String {
    format!(
        "?X-Atmosphere-tracking-id={}&X-Atmosphere-Framework=2.3.2-javascript\
         &X-Atmosphere-Transport=websocket&X-Atmosphere-TrackMessageSize=true\
         &Content-Type=text/x-gwt-rpc;%20charset=UTF-8&X-atmo-protocol=true\
         &sessionState=dx-new&guest-mode=false",
        tracking_id.unwrap_or("0")
    )
}

pub fn login(base: &str) -> String {
    format!("{base}/api/auth/login")
}

pub fn switch_account(base: &str, account_id: &str) -> String {
    format!("{base}/api/accounts/switch?accountId={account_id}")
}

pub fn suggest(base: &str, text: &str) -> String {
    format!("{base}/api/suggest?text={text}")
}

pub fn instrument_info(base: &str, symbol: &str, tz_offset_minutes: i64) -> String {
    format!("{base}/api/instruments/info?symbol={symbol}&timezoneOffset={tz_offset_minutes}&withExDividends=true")
}

pub fn submit_order(base: &str) -> String {
    format!("{base}/api/orders/single")
}

pub fn close_position(base: &str) -> String {
    format!("{base}/api/positions/close")
}

pub fn assessments(base: &str) -> String {
    format!("{base}/api/assessments")
}

pub fn trade_journal(base: &str, from_ms: i64, to_ms: i64) -> String {
    format!("{base}/api/tradejournal?from={from_ms}&to={to_ms}")
}

pub fn trade_history(base: &str, from_ms: i64, to_ms: i64) -> String {
    format!("{base}/api/tradehistory?from={from_ms}&to={to_ms}")
}

pub fn subscribe_instruments(base: &str) -> String {
    format!("{base}/api/instruments/subscription")
}

pub fn charts(base: &str) -> String {
    format!("{base}/api/charts")
}

/// Stream upgrade URL derived from the REST base (`http` → `ws`,
/// `https` → `wss`), or from an explicit stream host override.
pub fn websocket(base: &str, stream_override: Option<&str>, tracking_id: Option<&str>) -> String {
    let host = stream_override.unwrap_or(base).trim_end_matches('/');
    let host = if let Some(rest) = host.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = host.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if host.starts_with("ws://") || host.starts_with("wss://") {
        host.to_string()
    } else {
        format!("wss://{host}")
    };
    format!("{host}/client/connector{}", stream_query(tracking_id))
}

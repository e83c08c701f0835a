use crate::core::errors::DxtradeError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, COOKIE};

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const REQUESTED_WITH_HEADER: &str = "x-requested-with";

fn value(raw: &str) -> Result<HeaderValue, DxtradeError> {
    HeaderValue::from_str(raw)
        .map_err(|_| DxtradeError::Other(format!("invalid header value: {raw}")))
}

/// Plain JSON headers for unauthenticated requests (login, preflight).
pub fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

/// JSON headers plus the session cookies, for cookie-authenticated GETs
/// that do not require a CSRF token.
pub fn cookie_headers(cookie_header: &str) -> Result<HeaderMap, DxtradeError> {
    let mut headers = json_headers();
    if !cookie_header.is_empty() {
        headers.insert(COOKIE, value(cookie_header)?);
    }
    Ok(headers)
}

/// Headers for mutating requests: session cookies, the CSRF token, and the
/// XHR marker the gateway expects.
pub fn session_headers(cookie_header: &str, csrf: &str) -> Result<HeaderMap, DxtradeError> {
    let mut headers = cookie_headers(cookie_header)?;
    headers.insert(HeaderName::from_static(CSRF_HEADER), value(csrf)?);
    headers.insert(
        HeaderName::from_static(REQUESTED_WITH_HEADER),
        HeaderValue::from_static("XMLHttpRequest"),
    );
    Ok(headers)
}

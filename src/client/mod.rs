//! The client facade: session state (cookies, CSRF, stream correlation id),
//! the REST seam, and the shared multiplexer handle. Domain operations live
//! in [`crate::domains`] as `impl DxtradeClient` blocks.

pub mod cookies;
pub mod endpoints;
pub mod headers;
mod session;

use crate::client::cookies::CookieJar;
use crate::core::config::{DebugFilter, DxtradeConfig};
use crate::core::errors::DxtradeError;
use crate::core::kernel::multiplexer::StreamMultiplexer;
use crate::core::kernel::rest::{ReqwestRest, RestClientConfig, RestResponse, RestTransport};
use crate::core::kernel::ws::EphemeralStream;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::Value;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct SessionState {
    jar: CookieJar,
    csrf: Option<String>,
    /// Correlation id handed out on the first frame of the handshake
    /// stream; embedded in the URL of every later stream connection.
    tracking_id: Option<String>,
}

/// Point-in-time view of the session taken at the start of an authenticated
/// operation.
#[derive(Debug)]
pub(crate) struct SessionSnapshot {
    pub cookie_header: String,
    pub csrf: String,
    pub tracking_id: Option<String>,
}

/// Client for a DXtrade-style broker gateway.
///
/// All domain mutation goes through REST; market and account state arrives
/// over push streams. Call [`connect`](Self::connect) for persistent mode
/// (one shared stream behind the multiplexer) or [`auth`](Self::auth) for
/// the lighter session-only mode where each read opens an ephemeral stream.
pub struct DxtradeClient {
    config: DxtradeConfig,
    base_url: String,
    rest: Arc<dyn RestTransport>,
    state: Mutex<SessionState>,
    mux: StreamMultiplexer,
}

impl DxtradeClient {
    pub fn new(config: DxtradeConfig) -> Result<Self, DxtradeError> {
        let rest = ReqwestRest::new(RestClientConfig {
            timeout: config.timeout,
            max_attempts: config.retries,
            ..RestClientConfig::default()
        })?;
        Ok(Self::with_transport(config, Arc::new(rest)))
    }

    /// Build against a custom REST transport.
    pub fn with_transport(config: DxtradeConfig, rest: Arc<dyn RestTransport>) -> Self {
        let base_url = config.resolve_base_url();
        let mux = StreamMultiplexer::new(config.debug.clone());
        Self {
            config,
            base_url,
            rest,
            state: Mutex::new(SessionState::default()),
            mux,
        }
    }

    pub fn config(&self) -> &DxtradeConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Shared multiplexer. Holds state only after [`connect`](Self::connect).
    pub fn multiplexer(&self) -> &StreamMultiplexer {
        &self.mux
    }

    pub fn is_connected(&self) -> bool {
        self.mux.is_connected()
    }

    // ── Session state helpers ──────────────────────────────────────────

    fn state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Precondition for every authenticated operation: a CSRF token proves
    /// the full handshake sequence completed.
    pub(crate) fn ensure_session(&self) -> Result<SessionSnapshot, DxtradeError> {
        let state = self.state();
        match &state.csrf {
            Some(csrf) => Ok(SessionSnapshot {
                cookie_header: state.jar.header_value(),
                csrf: csrf.clone(),
                tracking_id: state.tracking_id.clone(),
            }),
            None => Err(self.fail(DxtradeError::NoSession)),
        }
    }

    pub(crate) fn cookie_header(&self) -> String {
        self.state().jar.header_value()
    }

    pub(crate) fn merge_cookies<I, S>(&self, set_cookies: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.state().jar.merge_all(set_cookies);
    }

    /// Invoke the error callback, then hand the error back for propagation.
    pub(crate) fn fail(&self, error: DxtradeError) -> DxtradeError {
        if let Some(on_error) = &self.config.callbacks.on_error {
            on_error(&error);
        }
        error
    }

    /// Wrap a non-distinguished failure with domain context; distinguished
    /// errors pass through unchanged.
    pub(crate) fn wrap<F>(&self, error: DxtradeError, wrap: F) -> DxtradeError
    where
        F: FnOnce(String) -> DxtradeError,
    {
        if error.is_distinguished() {
            self.fail(error)
        } else {
            self.fail(wrap(error.to_string()))
        }
    }

    // ── Transport helpers ──────────────────────────────────────────────

    /// Issue a REST call and fold any rotated session cookies back into the
    /// jar before returning.
    pub(crate) async fn rest(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<Value>,
    ) -> Result<RestResponse, DxtradeError> {
        let response = self.rest.request(method, url, headers, body).await?;
        if !response.set_cookies.is_empty() {
            self.merge_cookies(&response.set_cookies);
        }
        Ok(response)
    }

    /// Stream URL for the current session generation.
    pub(crate) fn stream_endpoint(&self) -> String {
        let tracking_id = self.state().tracking_id.clone();
        endpoints::websocket(
            &self.base_url,
            self.config.stream_url.as_deref(),
            tracking_id.as_deref(),
        )
    }

    /// Open a fresh single-purpose stream connection with session cookies.
    pub(crate) async fn open_stream(&self) -> Result<EphemeralStream, DxtradeError> {
        let url = self.stream_endpoint();
        let cookie_header = self.cookie_header();
        EphemeralStream::open(
            &url,
            &cookie_header,
            self.config.timeout,
            self.debug_filter(),
        )
        .await
    }

    pub(crate) fn debug_filter(&self) -> DebugFilter {
        self.config.debug.clone()
    }

    pub(crate) fn set_csrf(&self, csrf: String) {
        self.state().csrf = Some(csrf);
    }

    pub(crate) fn set_tracking_id(&self, tracking_id: Option<String>) {
        if tracking_id.is_some() {
            self.state().tracking_id = tracking_id;
        }
    }

    #[cfg(test)]
    pub(crate) fn force_session_for_tests(&self, csrf: &str) {
        self.state().csrf = Some(csrf.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticated_ops_require_a_session() {
        let client = DxtradeClient::new(DxtradeConfig::new("u", "p", "ftmo")).unwrap();
        let error = client.ensure_session().unwrap_err();
        assert!(matches!(error, DxtradeError::NoSession));

        client.force_session_for_tests("tok");
        assert_eq!(client.ensure_session().unwrap().csrf, "tok");
    }

    #[test]
    fn error_callback_fires_before_propagation() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);

        let mut config = DxtradeConfig::new("u", "p", "ftmo");
        config.callbacks.on_error = Some(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let client = DxtradeClient::new(config).unwrap();
        let _ = client.ensure_session();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}

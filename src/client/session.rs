//! Handshake protocol: preflight, login, CSRF fetch, stream handshake,
//! optional account switch, and the persistent-mode upgrade.

use crate::client::{endpoints, headers, DxtradeClient};
use crate::core::errors::DxtradeError;
use crate::core::kernel::codec::Frame;
use reqwest::header::{HeaderMap, COOKIE, REFERER};
use reqwest::Method;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

const CSRF_MARKER: &str = "name=\"csrf\" content=\"";

/// Extract the CSRF token from the gateway's HTML shell.
fn extract_csrf(html: &str) -> Option<String> {
    let start = html.find(CSRF_MARKER)? + CSRF_MARKER.len();
    let end = html[start..].find('"')?;
    (end > 0).then(|| html[start..start + end].to_string())
}

impl DxtradeClient {
    /// Best-effort GET of the site root to collect anti-bot cookies before
    /// login. Failure is logged and ignored.
    #[instrument(skip(self))]
    pub async fn preflight(&self) {
        let result = self
            .rest(Method::GET, self.base_url(), headers::json_headers(), None)
            .await;
        if let Err(error) = result {
            debug!(%error, "preflight failed, continuing");
        }
    }

    /// Authenticate and merge the returned session cookies.
    #[instrument(skip(self))]
    pub async fn login(&self) -> Result<(), DxtradeError> {
        let body = json!({
            "username": &self.config().username,
            "password": self.config().password(),
            "domain": &self.config().broker,
        });

        let result = self
            .rest(
                Method::POST,
                &endpoints::login(self.base_url()),
                headers::json_headers(),
                Some(body),
            )
            .await;

        match result {
            Ok(_) => {
                info!("login succeeded");
                if let Some(on_login) = &self.config().callbacks.on_login {
                    on_login();
                }
                Ok(())
            }
            Err(DxtradeError::HttpStatus { status, .. }) => {
                Err(self.fail(DxtradeError::LoginFailed { status }))
            }
            Err(error) => Err(self.wrap(error, DxtradeError::LoginError)),
        }
    }

    /// Fetch the site root and scrape the CSRF token from its meta tag.
    #[instrument(skip(self))]
    pub async fn fetch_csrf(&self) -> Result<(), DxtradeError> {
        let mut request_headers = HeaderMap::new();
        let cookie_header = self.cookie_header();
        if !cookie_header.is_empty() {
            request_headers.insert(
                COOKIE,
                cookie_header
                    .parse()
                    .map_err(|_| DxtradeError::Other("invalid cookie header".to_string()))?,
            );
        }
        if let Ok(referer) = self.base_url().parse() {
            request_headers.insert(REFERER, referer);
        }

        let result = self
            .rest(Method::GET, self.base_url(), request_headers, None)
            .await;

        match result {
            Ok(response) => match extract_csrf(&response.body) {
                Some(csrf) => {
                    self.set_csrf(csrf);
                    Ok(())
                }
                None => Err(self.fail(DxtradeError::CsrfNotFound)),
            },
            Err(error) => Err(self.wrap(error, DxtradeError::CsrfError)),
        }
    }

    /// Switch the session to another account. Invalidates the previous
    /// stream addressing, so callers must re-run the stream handshake.
    #[instrument(skip(self))]
    pub async fn switch_account(&self, account_id: &str) -> Result<(), DxtradeError> {
        let session = self.ensure_session()?;
        let request_headers = headers::session_headers(&session.cookie_header, &session.csrf)?;

        let result = self
            .rest(
                Method::POST,
                &endpoints::switch_account(self.base_url(), account_id),
                request_headers,
                None,
            )
            .await;

        match result {
            Ok(_) => {
                info!(account_id, "switched account");
                if let Some(on_switch) = &self.config().callbacks.on_account_switch {
                    on_switch(account_id);
                }
                Ok(())
            }
            Err(error) => Err(self.wrap(error, DxtradeError::AccountSwitchError)),
        }
    }

    /// Wait for the stream to signal a live session: the first envelope
    /// carrying a non-null `accountId`. Retains the correlation id seen in
    /// the earliest raw frame for later stream URLs.
    #[instrument(skip(self))]
    pub(crate) async fn stream_handshake(&self) -> Result<(), DxtradeError> {
        let mut stream = self.open_stream().await.map_err(|e| self.fail(e))?;

        let wait = async {
            while let Some(frame) = stream.next_frame().await {
                if let Frame::Envelope(envelope) = frame? {
                    if envelope.account_id.is_some() {
                        let tracking_id = stream.tracking_id().map(str::to_string);
                        stream.close().await;
                        return Ok(tracking_id);
                    }
                }
            }
            Err(DxtradeError::Transport(
                "stream closed during handshake".to_string(),
            ))
        };

        match tokio::time::timeout(self.config().timeout, wait).await {
            Ok(Ok(tracking_id)) => {
                debug!(?tracking_id, "stream handshake complete");
                self.set_tracking_id(tracking_id);
                Ok(())
            }
            Ok(Err(error)) => Err(self.fail(error)),
            Err(_) => {
                warn!("stream handshake timed out");
                Err(self.fail(DxtradeError::HandshakeTimeout))
            }
        }
    }

    /// Session-only entry point: run the full handshake sequence but do not
    /// open the persistent stream. Domain reads will use ephemeral
    /// connections.
    #[instrument(skip(self))]
    pub async fn auth(&self) -> Result<(), DxtradeError> {
        self.preflight().await;
        self.login().await?;
        self.fetch_csrf().await?;
        self.stream_handshake().await?;

        if let Some(account_id) = self.config().account_id.clone() {
            self.switch_account(&account_id).await?;
            // Switching invalidates the previous stream generation.
            self.stream_handshake().await?;
        }
        Ok(())
    }

    /// Full entry point: [`auth`](Self::auth) plus the persistent-mode
    /// upgrade. The multiplexer becomes the shared backing transport for
    /// all subsequent domain calls until [`disconnect`](Self::disconnect).
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<(), DxtradeError> {
        self.auth().await?;

        let url = self.stream_endpoint();
        let cookie_header = self.cookie_header();
        self.multiplexer()
            .connect(&url, &cookie_header, self.config().timeout)
            .await
            .map_err(|e| self.fail(e))?;
        info!("persistent stream connected");
        Ok(())
    }

    /// Tear down the persistent stream and its cache. Idempotent; the
    /// session cookies and CSRF token stay valid for ephemeral-mode calls.
    pub fn disconnect(&self) {
        self.multiplexer().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csrf_token_is_scraped_from_the_meta_tag() {
        let html = r#"<html><head><meta name="csrf" content="tok-123"/></head></html>"#;
        assert_eq!(extract_csrf(html).as_deref(), Some("tok-123"));
    }

    #[test]
    fn missing_or_empty_csrf_yields_none() {
        assert_eq!(extract_csrf("<html></html>"), None);
        assert_eq!(extract_csrf(r#"<meta name="csrf" content=""/>"#), None);
    }
}

use crate::core::errors::DxtradeError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{instrument, trace, warn};

/// Configuration for the REST transport.
#[derive(Debug, Clone)]
pub struct RestClientConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Max attempts for retryable failures.
    pub max_attempts: u32,
    /// Linear backoff unit: attempt N sleeps `N × backoff_unit`.
    pub backoff_unit: Duration,
    pub user_agent: String,
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
            user_agent: "dxtrade-client/0.1".to_string(),
        }
    }
}

/// Raw REST response. Headers are reduced to what the session layer needs:
/// every `set-cookie` value, surfaced so cookies merge on every response.
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: u16,
    pub set_cookies: Vec<String>,
    pub body: String,
}

impl RestResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, DxtradeError> {
        serde_json::from_str(&self.body).map_err(DxtradeError::from)
    }
}

/// REST transport seam. The gateway is driven entirely through this
/// interface; the stream is receive-only.
#[async_trait]
pub trait RestTransport: Send + Sync {
    /// Issue a request with bounded retry. Transport failures and non-2xx
    /// statuses are retried with linear backoff, except HTTP 429 which
    /// converts immediately into [`DxtradeError::RateLimited`] — retrying
    /// into a rate limit only extends the block. After the attempt budget
    /// the last error propagates unchanged.
    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<Value>,
    ) -> Result<RestResponse, DxtradeError>;
}

/// `RestTransport` implementation backed by reqwest.
///
/// Cookies are managed by the session layer, not reqwest's jar: the gateway
/// rotates session cookies on arbitrary responses and the same jar must be
/// shared with stream connections.
#[derive(Debug, Clone)]
pub struct ReqwestRest {
    client: Client,
    config: RestClientConfig,
}

impl ReqwestRest {
    pub fn new(config: RestClientConfig) -> Result<Self, DxtradeError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .cookie_store(false)
            .build()?;
        Ok(Self { client, config })
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<&Value>,
    ) -> Result<RestResponse, DxtradeError> {
        let mut request = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok().map(str::to_string))
            .collect();
        let body = response.text().await?;
        trace!(status, bytes = body.len(), "rest response");

        Ok(RestResponse {
            status,
            set_cookies,
            body,
        })
    }
}

#[async_trait]
impl RestTransport for ReqwestRest {
    #[instrument(skip(self, headers, body), fields(method = %method, url = %url))]
    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<Value>,
    ) -> Result<RestResponse, DxtradeError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = DxtradeError::Other("request never attempted".to_string());

        for attempt in 1..=max_attempts {
            match self
                .send_once(method.clone(), url, headers.clone(), body.as_ref())
                .await
            {
                Ok(response) if response.status == 429 => {
                    warn!(attempt, "rate limited, not retrying");
                    return Err(DxtradeError::RateLimited);
                }
                Ok(response) if (200..300).contains(&response.status) => return Ok(response),
                Ok(response) => {
                    warn!(attempt, status = response.status, "request failed");
                    last_error = DxtradeError::HttpStatus {
                        status: response.status,
                        body: response.body,
                    };
                }
                Err(error) => {
                    warn!(attempt, %error, "request failed");
                    last_error = error;
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.config.backoff_unit * attempt).await;
            }
        }

        Err(last_error)
    }
}

//! Account metrics, trade history/journal, and assessments.

use crate::client::{endpoints, headers, DxtradeClient};
use crate::core::errors::DxtradeError;
use crate::core::kernel::codec::{EnvelopeKind, Frame};
use crate::core::types::{AccountMetrics, AssessmentParams};
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::instrument;

fn metrics_from_body(body: &Value) -> Result<AccountMetrics, DxtradeError> {
    // The envelope body nests the metrics under `allMetrics`.
    serde_json::from_value(body.get("allMetrics").cloned().unwrap_or(Value::Null))
        .map_err(DxtradeError::from)
}

impl DxtradeClient {
    /// Live account metrics (equity, balance, margin, open P&L).
    pub async fn account_metrics(&self) -> Result<AccountMetrics, DxtradeError> {
        self.account_metrics_with_timeout(self.config().timeout).await
    }

    /// As [`account_metrics`](Self::account_metrics) with a caller-tuned
    /// wait budget.
    #[instrument(skip(self))]
    pub async fn account_metrics_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<AccountMetrics, DxtradeError> {
        self.ensure_session()?;

        if self.is_connected() {
            let body = self
                .multiplexer()
                .wait_for(EnvelopeKind::AccountMetrics, timeout)
                .await
                .map_err(|e| self.fail(e))?;
            return metrics_from_body(&body).map_err(|e| self.fail(e));
        }

        let mut stream = self.open_stream().await.map_err(|e| self.fail(e))?;
        let wait = async {
            while let Some(frame) = stream.next_frame().await {
                if let Frame::Envelope(envelope) = frame? {
                    if envelope.kind == EnvelopeKind::AccountMetrics {
                        stream.close().await;
                        return metrics_from_body(&envelope.body);
                    }
                }
            }
            Err(DxtradeError::Transport(
                "stream closed before account metrics".to_string(),
            ))
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result.map_err(|e| self.fail(e)),
            Err(_) => Err(self.fail(DxtradeError::Timeout("account metrics".to_string()))),
        }
    }

    /// Trade history for a `[from, to]` range of Unix-ms timestamps.
    #[instrument(skip(self))]
    pub async fn trade_history(&self, from_ms: i64, to_ms: i64) -> Result<Value, DxtradeError> {
        let session = self.ensure_session()?;
        let request_headers = headers::session_headers(&session.cookie_header, &session.csrf)?;
        let response = self
            .rest(
                Method::POST,
                &endpoints::trade_history(self.base_url(), from_ms, to_ms),
                request_headers,
                None,
            )
            .await
            .map_err(|e| self.fail(e))?;
        response.json().map_err(|e| self.fail(e))
    }

    /// Trade journal entries for a `[from, to]` range of Unix-ms timestamps.
    #[instrument(skip(self))]
    pub async fn trade_journal(&self, from_ms: i64, to_ms: i64) -> Result<Value, DxtradeError> {
        let session = self.ensure_session()?;
        let request_headers = headers::cookie_headers(&session.cookie_header)?;
        let response = self
            .rest(
                Method::GET,
                &endpoints::trade_journal(self.base_url(), from_ms, to_ms),
                request_headers,
                None,
            )
            .await
            .map_err(|e| self.fail(e))?;
        response.json().map_err(|e| self.fail(e))
    }

    /// Instrument assessment analytics.
    #[instrument(skip(self, params), fields(instrument = %params.instrument))]
    pub async fn assessments(&self, params: AssessmentParams) -> Result<Value, DxtradeError> {
        let session = self.ensure_session()?;
        let request_headers = headers::session_headers(&session.cookie_header, &session.csrf)?;
        let body = json!({
            "from": params.from,
            "to": params.to,
            "instrument": params.instrument,
            "subtype": params.subtype,
        });
        let response = self
            .rest(
                Method::POST,
                &endpoints::assessments(self.base_url()),
                request_headers,
                Some(body),
            )
            .await
            .map_err(|e| self.fail(e))?;
        response.json().map_err(|e| self.fail(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_are_nested_under_all_metrics() {
        let body = json!({"allMetrics": {"equity": 10_000.5, "openPl": -12.25}});
        let metrics = metrics_from_body(&body).unwrap();
        assert_eq!(metrics.equity, 10_000.5);
        assert_eq!(metrics.open_pl, -12.25);
    }

    #[test]
    fn missing_all_metrics_is_an_error() {
        assert!(metrics_from_body(&json!({"other": 1})).is_err());
    }
}
